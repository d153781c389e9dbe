use std::sync::Arc;

use nyaaya_relay::{router, Store};

const DEFAULT_BIND: &str = "127.0.0.1:3001";
const DEFAULT_DATA_FILE: &str = "data/store.json";

/// Command-line arguments for the relay.
struct Args {
    bind: String,
    data_file: String,
}

fn parse_args() -> Args {
    let mut args = std::env::args().skip(1);
    let mut bind = String::new();
    let mut data_file = String::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--bind" => bind = args.next().unwrap_or_default(),
            "--data-file" => data_file = args.next().unwrap_or_default(),
            _ => {}
        }
    }

    if bind.is_empty() {
        bind = std::env::var("NYAAYA_RELAY_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    }
    if data_file.is_empty() {
        data_file = std::env::var("DATA_FILE").unwrap_or_else(|_| DEFAULT_DATA_FILE.to_string());
    }

    Args { bind, data_file }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args();
    let store = Arc::new(Store::open(&args.data_file).expect("failed to open relay store"));
    tracing::info!(path = %store.path().display(), "relay store ready");

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .expect("failed to bind relay address");
    tracing::info!(addr = %args.bind, "nyaaya relay listening");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .expect("server error");
}
