use crate::api::{
    TrustState,
    handlers::{challenge_response, status_for},
};
use crate::error::{AuthenticationError, ErrorKind};
use axum::{
    extract::Extension,
    http::{HeaderMap, header::AUTHORIZATION},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::debug;
use utoipa::ToSchema;

/// Subject of an authorized bearer token.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionView {
    pub sub: String,
    pub scope: Vec<String>,
    pub attributes: BTreeMap<String, String>,
    /// Seconds until the access token expires.
    pub expires_in: i64,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

#[utoipa::path(
    get,
    path= "/session",
    responses (
        (status = 200, description = "Bearer token is valid", body = SessionView),
        (status = 401, description = "Missing, invalid or expired bearer token"),
    ),
    tag = "session",
)]
/// Authorize the request's bearer token and describe its subject.
pub async fn session(headers: HeaderMap, state: Extension<Arc<TrustState>>) -> Response {
    let Some(token) = bearer_token(&headers) else {
        return challenge_response(&AuthenticationError::bearer(Some(state.issuer.as_str())));
    };

    match state.sessions.authorize_for(&state.audience, token) {
        Ok(authorized) => Json(SessionView {
            sub: authorized.principal_name().unwrap_or_default().to_string(),
            scope: authorized.scopes().into_iter().map(str::to_string).collect(),
            attributes: authorized
                .attributes()
                .into_iter()
                .map(|attribute| (attribute.name.clone(), attribute.value.clone()))
                .collect(),
            expires_in: (authorized.token_expires() - OffsetDateTime::now_utc())
                .whole_seconds()
                .max(0),
        })
        .into_response(),
        Err(err) => {
            debug!("Bearer token rejected: {err}");
            match err.kind() {
                ErrorKind::Authentication => {
                    challenge_response(&err.challenge(Some(state.issuer.as_str())))
                }
                kind => (status_for(kind), err.to_string()).into_response(),
            }
        }
    }
}
