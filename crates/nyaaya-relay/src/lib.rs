//! HTTP relay for nyaaya chat.
//!
//! Stores ciphertext messages and published KEM public keys. It never sees a
//! session key and never decrypts anything.

pub mod error;
pub mod store;

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use nyaaya_chat::{
    Address, ApiResponse, MessageRecord, OutgoingMessage, PublishKeyRequest, PublishedKey,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

pub use error::RelayError;
pub use store::Store;

type SharedStore = Arc<Store>;

/// Build the relay router over `store`.
pub fn router(store: SharedStore) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/messages", get(get_messages).post(post_message))
        .route("/publicKey", get(get_public_key).post(post_public_key))
        .route("/health", get(|| async { "ok" }))
        .layer(cors)
        .with_state(store)
}

/// `from`/`to`, or the older `a`/`b` spelling.
#[derive(Debug, Deserialize)]
struct PairQuery {
    from: Option<String>,
    to: Option<String>,
    a: Option<String>,
    b: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AddressQuery {
    address: Option<String>,
}

/// Raw `POST /messages` body; addresses are validated by hand so a bad one
/// is a 400 with the usual envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostMessageBody {
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    ciphertext: String,
    #[serde(default)]
    nonce: String,
    kem_ciphertext: Option<String>,
    salt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostKeyBody {
    #[serde(default)]
    address: String,
    #[serde(default)]
    algorithm: Option<String>,
    #[serde(default)]
    public_key: String,
}

fn parse_address(raw: Option<&str>, what: &str) -> Result<Address, RelayError> {
    raw.unwrap_or_default()
        .parse()
        .map_err(|_| RelayError::BadRequest(format!("Invalid or missing {what}")))
}

fn check_base64(field: &str, value: &str) -> Result<(), RelayError> {
    STANDARD
        .decode(value)
        .map(|_| ())
        .map_err(|_| RelayError::BadRequest(format!("{field} is not valid base64")))
}

/// Run a store write off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, RelayError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RelayError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RelayError::Internal(format!("store task failed: {e}")))?
}

async fn get_messages(
    State(store): State<SharedStore>,
    query: Result<Query<PairQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<MessageRecord>>>, RelayError> {
    let Query(query) = query.map_err(|e| RelayError::BadRequest(e.body_text()))?;
    let a = parse_address(query.from.as_deref().or(query.a.as_deref()), "from address")?;
    let b = parse_address(query.to.as_deref().or(query.b.as_deref()), "to address")?;

    let messages = store.messages_between(&a, &b);
    tracing::debug!(a = %a, b = %b, count = messages.len(), "served messages");
    Ok(Json(ApiResponse::ok(messages)))
}

async fn post_message(
    State(store): State<SharedStore>,
    body: Result<Json<PostMessageBody>, JsonRejection>,
) -> Result<Json<ApiResponse<MessageRecord>>, RelayError> {
    let Json(body) = body.map_err(|e| RelayError::BadRequest(e.body_text()))?;
    let from = parse_address(Some(&body.from), "from address")?;
    let to = parse_address(Some(&body.to), "to address")?;
    if body.ciphertext.is_empty() || body.nonce.is_empty() {
        return Err(RelayError::BadRequest("Missing ciphertext/nonce".into()));
    }
    check_base64("ciphertext", &body.ciphertext)?;
    check_base64("nonce", &body.nonce)?;
    for (field, value) in [("kemCiphertext", &body.kem_ciphertext), ("salt", &body.salt)] {
        if let Some(value) = value {
            check_base64(field, value)?;
        }
    }

    let message = OutgoingMessage {
        from,
        to,
        ciphertext: body.ciphertext,
        nonce: body.nonce,
        kem_ciphertext: body.kem_ciphertext,
        salt: body.salt,
    };
    let record = blocking(move || store.append_message(message)).await?;
    tracing::debug!(
        id = %record.id,
        from = %record.from,
        to = %record.to,
        bootstrap = record.kem_ciphertext.is_some(),
        "stored message"
    );
    Ok(Json(ApiResponse::ok(record)))
}

async fn get_public_key(
    State(store): State<SharedStore>,
    query: Result<Query<AddressQuery>, QueryRejection>,
) -> Result<Json<ApiResponse<Option<PublishedKey>>>, RelayError> {
    let Query(query) = query.map_err(|e| RelayError::BadRequest(e.body_text()))?;
    let address = parse_address(query.address.as_deref(), "wallet address")?;
    Ok(Json(ApiResponse::ok(store.public_key(&address))))
}

async fn post_public_key(
    State(store): State<SharedStore>,
    body: Result<Json<PostKeyBody>, JsonRejection>,
) -> Result<Json<ApiResponse<()>>, RelayError> {
    let Json(body) = body.map_err(|e| RelayError::BadRequest(e.body_text()))?;
    let address = parse_address(Some(&body.address), "wallet address")?;
    if body.public_key.is_empty() {
        return Err(RelayError::BadRequest("Missing publicKey".into()));
    }
    check_base64("publicKey", &body.public_key)?;
    let algorithm = match body.algorithm.as_deref() {
        None | Some("") => Default::default(),
        Some(tag) => tag
            .parse()
            .map_err(|_| RelayError::BadRequest(format!("Unknown algorithm {tag:?}")))?,
    };

    let request = PublishKeyRequest {
        address,
        algorithm,
        public_key: body.public_key,
    };
    let entry = blocking(move || store.upsert_key(request)).await?;
    tracing::info!(address = %entry.address, algorithm = %entry.algorithm, "published key");
    Ok(Json(ApiResponse::empty()))
}
