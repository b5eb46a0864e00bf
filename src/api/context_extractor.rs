use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::Json,
};

use crate::api::handlers::ErrorResponse;
use crate::model::RequestContext;

/// Axum extractor for RequestContext from request headers.
///
/// - `X-Organization-Id`: required tenant identifier; its absence rejects
///   the request with 400 before any storage access.
/// - `X-User-Id`: optional; absent callers evaluate under the
///   `"unknown-user"` sentinel.
#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let Some(organization_id) = extract_header_value(headers, "x-organization-id") else {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("missing x-organization-id header")),
            ));
        };

        Ok(match extract_header_value(headers, "x-user-id") {
            Some(user_id) => RequestContext::new(organization_id, user_id),
            None => RequestContext::anonymous(organization_id),
        })
    }
}

fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue, Request};

    async fn extract(headers: Vec<(&'static str, &'static str)>) -> Result<RequestContext, StatusCode> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        }
        let request = builder.body(()).unwrap();
        let (mut parts, _) = request.into_parts();
        RequestContext::from_request_parts(&mut parts, &())
            .await
            .map_err(|(status, _)| status)
    }

    #[tokio::test]
    async fn test_missing_organization_is_rejected() {
        let err = extract(vec![("x-user-id", "user-1")]).await.unwrap_err();
        assert_eq!(err, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_user_defaults_to_sentinel() {
        let ctx = extract(vec![("x-organization-id", "org-1")]).await.unwrap();
        assert_eq!(ctx.organization_id, "org-1");
        assert_eq!(ctx.user_id, "unknown-user");
    }

    #[tokio::test]
    async fn test_both_headers_are_used() {
        let ctx = extract(vec![("x-organization-id", "org-1"), ("x-user-id", "user-9")])
            .await
            .unwrap();
        assert_eq!(ctx.user_id, "user-9");
    }
}
