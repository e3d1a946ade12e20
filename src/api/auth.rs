use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;

use super::{ApiError, AppState};
use crate::context::Principal;

/// Admits requests carrying `Authorization: Bearer <admin key>`.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<impl IntoResponse, ApiError> {
    let Some(token) = bearer_token(&headers) else {
        return Err(ApiError::Unauthorized(
            "Missing admin credentials".to_string(),
        ));
    };

    if !state.admin_key.verify(token) {
        tracing::warn!("Rejected admin request with an invalid key");
        return Err(ApiError::Unauthorized("Invalid admin key".to_string()));
    }

    tracing::Span::current().record("user_id", "admin");
    request.extensions_mut().insert(Principal::Admin);
    Ok(next.run(request).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_requires_the_scheme() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer deadbeef "),
        );
        assert_eq!(bearer_token(&headers), Some("deadbeef"));
    }
}
