//! Share links: token-addressed, access-controlled views of execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::artifact::ArtifactRef;

/// Who may resolve a share link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// Anyone holding the token.
    Public,
    /// Token holders who are also signed in.
    Authenticated,
}

impl AccessLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Authenticated => "authenticated",
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "authenticated" => Ok(Self::Authenticated),
            other => Err(format!("unknown access level: '{other}'")),
        }
    }
}

/// Kind of resource a link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareResourceType {
    Execution,
}

/// A published view of an execution's artifacts.
///
/// Revoked and expired links are retained for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareLink {
    pub id: Uuid,
    /// URL-safe token (32 hex characters).
    pub token: String,
    pub resource_type: ShareResourceType,
    pub resource_id: Uuid,
    pub access_level: AccessLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Artifacts exposed through this link.
    pub artifacts: Vec<ArtifactRef>,
    pub revoked: bool,
    pub view_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_viewed_at: Option<DateTime<Utc>>,
}

impl ShareLink {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn link(expires_at: Option<DateTime<Utc>>) -> ShareLink {
        ShareLink {
            id: Uuid::now_v7(),
            token: "0123456789abcdef0123456789abcdef".to_string(),
            resource_type: ShareResourceType::Execution,
            resource_id: Uuid::now_v7(),
            access_level: AccessLevel::Public,
            title: None,
            artifacts: Vec::new(),
            revoked: false,
            view_count: 0,
            created_by: None,
            created_at: Utc::now(),
            expires_at,
            last_viewed_at: None,
        }
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        assert!(!link(None).is_expired_at(now));
        assert!(!link(Some(now + Duration::days(1))).is_expired_at(now));
        assert!(link(Some(now - Duration::seconds(1))).is_expired_at(now));
    }

    #[test]
    fn test_access_level_parse() {
        assert_eq!("public".parse::<AccessLevel>().unwrap(), AccessLevel::Public);
        assert_eq!(AccessLevel::Authenticated.as_str(), "authenticated");
        assert!("private".parse::<AccessLevel>().is_err());
    }
}
