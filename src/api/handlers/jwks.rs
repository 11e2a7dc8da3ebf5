use crate::api::TrustState;
use axum::{
    extract::Extension,
    http::{StatusCode, header::CONTENT_TYPE},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::error;

#[utoipa::path(
    get,
    path= "/jwks.json",
    responses (
        (status = 200, description = "JWKS public keys of the local issuer", body = String, content_type = "application/json"),
        (status = 404, description = "Issuer is not registered"),
    ),
    tag= "session"
)]
pub async fn jwks(state: Extension<Arc<TrustState>>) -> impl IntoResponse {
    let Some(jwks) = state.sessions.jwks(&state.issuer) else {
        return (
            StatusCode::NOT_FOUND,
            [(CONTENT_TYPE, "application/json")],
            "{}".to_string(),
        );
    };

    match jwks.to_json_pretty() {
        Ok(jwks_json) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "application/json")],
            jwks_json,
        ),
        Err(e) => {
            error!("Failed to render JWKS: {e:#}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CONTENT_TYPE, "application/json")],
                "{}".to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::test_support::{self, KEY_ID};
    use crate::token::Jwks;
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::Request,
        routing::get,
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn publishes_issuer_keys() -> anyhow::Result<()> {
        let app = Router::new()
            .route("/jwks.json", get(jwks))
            .layer(Extension(test_support::state()?));

        let response = app
            .oneshot(Request::builder().uri("/jwks.json").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await?;
        let jwks = Jwks::from_json(std::str::from_utf8(&body)?)?;
        let key = jwks.find_by_kid(KEY_ID);
        assert_eq!(key.map(|key| key.kty.as_str()), Some("OKP"));
        Ok(())
    }
}
