//! Caller identity as asserted by the fronting authentication proxy.
//!
//! capflow does not authenticate users itself. A reverse proxy that has
//! signed the user in forwards their identity in `X-Capflow-User`; requests
//! without the header are anonymous.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

/// Header carrying the signed-in user's name.
pub const USER_HEADER: &str = "x-capflow-user";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Viewer {
    pub user: Option<String>,
}

impl Viewer {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Name recorded as `triggered_by` / `created_by`.
    pub fn actor(&self, fallback: &str) -> String {
        self.user.clone().unwrap_or_else(|| fallback.to_string())
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Viewer {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        Ok(Self { user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn viewer_for(header: Option<&str>) -> Viewer {
        let mut builder = Request::builder().uri("/s/abc");
        if let Some(value) = header {
            builder = builder.header(USER_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        Viewer::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[tokio::test]
    async fn header_marks_viewer_authenticated() {
        let viewer = viewer_for(Some("dana")).await;
        assert!(viewer.is_authenticated());
        assert_eq!(viewer.actor("anonymous"), "dana");
    }

    #[tokio::test]
    async fn missing_or_blank_header_is_anonymous() {
        assert!(!viewer_for(None).await.is_authenticated());
        assert!(!viewer_for(Some("   ")).await.is_authenticated());
        assert_eq!(viewer_for(None).await.actor("api"), "api");
    }
}
