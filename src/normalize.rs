//! Assembles the canonical response envelope (§4.7).

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Schema version stamped on every `ResponseMeta` unless an adapter overrides it.
pub const SCHEMA_VERSION: &str = "1";

/// `RateLimitInfo.limit`/`.remaining` are `u64`; §3 requires `remaining <= limit`,
/// enforced at construction time via [`RateLimitInfo::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: u64,
    #[serde(with = "system_time_secs")]
    pub reset: SystemTime,
}

mod system_time_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(v: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        v.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SystemTime, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(UNIX_EPOCH + Duration::from_secs_f64(secs))
    }
}

impl RateLimitInfo {
    /// Returns `None` if `remaining > limit` (§3: "headers violating bounds yield null").
    pub fn new(limit: u64, remaining: u64, reset: SystemTime) -> Option<Self> {
        if remaining > limit {
            None
        } else {
            Some(Self { limit, remaining, reset })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaginationInfo {
    pub has_next: bool,
    pub cursor: Option<String>,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub provider: String,
    pub request_id: String,
    pub rate_limit: RateLimitInfo,
    pub pagination: Option<PaginationInfo>,
    pub warnings: Vec<String>,
    pub schema_version: String,
}

/// `data` is generic so a caller can deserialize straight into their own type; the
/// envelope itself is immutable once returned (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResponse<T> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T> NormalizedResponse<T> {
    pub fn new(data: T, meta: ResponseMeta) -> Self {
        Self { data, meta }
    }
}

/// Builds a `ResponseMeta`, always overwriting `request_id` with the pipeline-assigned
/// id (§4.9 step 9: "Overwrite meta.requestId with the pipeline's id to guarantee
/// uniqueness").
pub fn assemble_meta(
    provider: &str,
    pipeline_request_id: &str,
    rate_limit: RateLimitInfo,
    pagination: Option<PaginationInfo>,
) -> ResponseMeta {
    ResponseMeta {
        provider: provider.to_string(),
        request_id: pipeline_request_id.to_string(),
        rate_limit,
        pagination,
        warnings: Vec::new(),
        schema_version: SCHEMA_VERSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_info_rejects_remaining_over_limit() {
        assert!(RateLimitInfo::new(10, 20, SystemTime::now()).is_none());
        assert!(RateLimitInfo::new(10, 5, SystemTime::now()).is_some());
    }

    #[test]
    fn assemble_meta_always_uses_pipeline_request_id() {
        let rl = RateLimitInfo::new(100, 50, SystemTime::now()).unwrap();
        let meta = assemble_meta("github", "pipeline-assigned-id", rl, None);
        assert_eq!(meta.request_id, "pipeline-assigned-id");
        assert_eq!(meta.provider, "github");
        assert_eq!(meta.schema_version, SCHEMA_VERSION);
        assert!(meta.pagination.is_none());
        assert!(meta.warnings.is_empty());
    }
}
