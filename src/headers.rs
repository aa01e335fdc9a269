//! Parsing of `Retry-After`, `Link` (RFC 5988), and rate-limit headers into typed values.
//!
//! Every parser here is tolerant: a missing or malformed header yields `None` (or the
//! documented deterministic default), never a panic or an error. The pipeline and rate
//! limiter fall back to their own defaults on `None`.

use crate::normalize::RateLimitInfo;
use reqwest::header::HeaderMap;
use std::time::{Duration, SystemTime};

/// Parses a `Retry-After` header value, either delta-seconds or an HTTP-date.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(raw).ok()?;
    at.duration_since(SystemTime::now()).ok()
}

/// One entry of a parsed `Link` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEntry {
    pub url: String,
    pub rel: String,
}

/// Parses an RFC 5988 `Link` header into its entries.
pub fn parse_link_header(headers: &HeaderMap) -> Vec<LinkEntry> {
    let Some(raw) = headers.get("link").and_then(|v| v.to_str().ok()) else {
        return Vec::new();
    };
    raw.split(',').filter_map(parse_link_entry).collect()
}

fn parse_link_entry(part: &str) -> Option<LinkEntry> {
    let part = part.trim();
    let (url_part, params) = part.split_once(';')?;
    let url = url_part.trim().trim_start_matches('<').trim_end_matches('>').to_string();
    let rel = params.split(';').find_map(|p| {
        let p = p.trim();
        let (key, value) = p.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("rel") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })?;
    Some(LinkEntry { url, rel })
}

/// Finds the `rel="next"` entry, if any, and returns its URL.
pub fn find_next_link(headers: &HeaderMap) -> Option<String> {
    parse_link_header(headers).into_iter().find(|e| e.rel == "next").map(|e| e.url)
}

/// Extracts the `page` query parameter from a URL, used by the Link-header pagination
/// strategy to turn a `rel=next` URL into an opaque cursor value.
pub fn extract_query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        if k == name {
            Some(urlencoding_decode(v))
        } else {
            None
        }
    })
}

fn urlencoding_decode(s: &str) -> String {
    percent_decode(s)
}

fn percent_decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte as char);
                    i += 3;
                    continue;
                }
                out.push('%');
                i += 1;
            }
            b'+' => {
                out.push(' ');
                i += 1;
            }
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    out
}

/// Default rate-limit info used whenever nothing parseable is present: `limit=0,
/// remaining=0, reset` one hour in the future, per §4.1's `rateLimitPolicy` contract.
pub fn default_rate_limit_info() -> RateLimitInfo {
    RateLimitInfo { limit: 0, remaining: 0, reset: SystemTime::now() + Duration::from_secs(3600) }
}

/// Parses the conventional `X-RateLimit-{Limit,Remaining,Reset}` header trio. `reset` is
/// interpreted as Unix seconds. Any bound violation (`remaining > limit`) yields `None`
/// per §3 ("headers violating bounds yield null").
pub fn parse_rate_limit_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let limit = header_u64(headers, "x-ratelimit-limit")?;
    let remaining = header_u64(headers, "x-ratelimit-remaining")?;
    if remaining > limit {
        return None;
    }
    let reset_epoch = header_u64(headers, "x-ratelimit-reset")?;
    let reset = SystemTime::UNIX_EPOCH + Duration::from_secs(reset_epoch);
    Some(RateLimitInfo { limit, remaining, reset })
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// Minimal HTTP-date parser, avoiding a dependency: supports the RFC 7231 IMF-fixdate
/// form (`Sun, 06 Nov 1994 08:49:37 GMT`), which is what `Retry-After` uses in practice.
mod httpdate {
    use std::time::SystemTime;

    pub fn parse_http_date(s: &str) -> Result<SystemTime, ()> {
        chrono::DateTime::parse_from_rfc2822(s).map(|dt| dt.into()).map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                reqwest::header::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    #[test]
    fn parses_retry_after_delta_seconds() {
        let h = headers(&[("retry-after", "2")]);
        let dur = parse_retry_after(&h).unwrap();
        assert_eq!(dur.as_secs(), 2);
    }

    #[test]
    fn missing_retry_after_is_none() {
        let h = headers(&[]);
        assert!(parse_retry_after(&h).is_none());
    }

    #[test]
    fn finds_rel_next_link() {
        let h = headers(&[(
            "link",
            "<https://api.example.com/items?page=2>; rel=\"next\", <https://api.example.com/items?page=1>; rel=\"prev\"",
        )]);
        let next = find_next_link(&h).unwrap();
        assert_eq!(next, "https://api.example.com/items?page=2");
        assert_eq!(extract_query_param(&next, "page").unwrap(), "2");
    }

    #[test]
    fn no_link_header_yields_empty() {
        let h = headers(&[]);
        assert!(parse_link_header(&h).is_empty());
        assert!(find_next_link(&h).is_none());
    }

    #[test]
    fn rate_limit_headers_parse_when_within_bounds() {
        let h = headers(&[
            ("x-ratelimit-limit", "5000"),
            ("x-ratelimit-remaining", "4999"),
            ("x-ratelimit-reset", "2000000000"),
        ]);
        let info = parse_rate_limit_headers(&h).unwrap();
        assert_eq!(info.limit, 5000);
        assert_eq!(info.remaining, 4999);
    }

    #[test]
    fn rate_limit_headers_violating_bounds_yield_none() {
        let h = headers(&[
            ("x-ratelimit-limit", "10"),
            ("x-ratelimit-remaining", "20"),
            ("x-ratelimit-reset", "2000000000"),
        ]);
        assert!(parse_rate_limit_headers(&h).is_none());
    }

    #[test]
    fn default_rate_limit_info_resets_one_hour_out() {
        let info = default_rate_limit_info();
        let delta = info.reset.duration_since(SystemTime::now()).unwrap();
        assert!(delta.as_secs() > 3595 && delta.as_secs() <= 3600);
    }
}
