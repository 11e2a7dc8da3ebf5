use crate::api::{
    TrustState,
    handlers::{challenge_response, client_address, status_for, user_agent},
};
use crate::error::ErrorKind;
use axum::{
    extract::Extension,
    http::{Extensions, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NonceResponse {
    /// Single-use value bound to the calling client.
    pub nonce: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct NonceValidation {
    pub nonce: String,
}

#[utoipa::path(
    post,
    path= "/nonce",
    responses (
        (status = 200, description = "Nonce issued", body = NonceResponse),
    ),
    tag = "nonce",
)]
/// Issue a nonce bound to the client address and `User-Agent`.
///
/// Always answers with a well-formed nonce, even when it cannot be tracked.
pub async fn create(
    headers: HeaderMap,
    extensions: Extensions,
    state: Extension<Arc<TrustState>>,
) -> impl IntoResponse {
    let address = client_address(&headers, &extensions, &state.trusted_proxies);
    let agent = user_agent(&headers);
    let nonces = state.nonces.clone();

    // create may pause briefly when throttling a client
    let nonce = match tokio::task::spawn_blocking(move || nonces.create(&address, &agent)).await {
        Ok(nonce) => nonce,
        Err(err) => {
            error!("Nonce task failed: {err}");
            crate::id::generate()
        }
    };

    Json(NonceResponse { nonce })
}

#[utoipa::path(
    post,
    path= "/nonce/validate",
    request_body = NonceValidation,
    responses (
        (status = 204, description = "Nonce consumed"),
        (status = 401, description = "Nonce expired, unknown, used or issued to another client"),
        (status = 503, description = "Nonce engine is closed"),
    ),
    tag = "nonce",
)]
/// Consume a nonce for the calling client.
pub async fn validate(
    headers: HeaderMap,
    extensions: Extensions,
    state: Extension<Arc<TrustState>>,
    Json(request): Json<NonceValidation>,
) -> Response {
    let address = client_address(&headers, &extensions, &state.trusted_proxies);
    let agent = user_agent(&headers);

    match state.nonces.validate(&address, &agent, &request.nonce) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            debug!("Nonce rejected: {err}");
            match err.kind() {
                ErrorKind::Authentication => {
                    challenge_response(&err.challenge())
                }
                kind => (status_for(kind), err.to_string()).into_response(),
            }
        }
    }
}
