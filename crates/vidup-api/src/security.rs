//! Input validation for submissions.
//!
//! This module provides:
//! - URL validation with an optional host allowlist (SSRF protection)
//! - Upload file name sanitization
//! - Job id format checks

use std::net::{Ipv4Addr, Ipv6Addr};

use tracing::warn;
use url::{Host, Url};

/// Maximum URL length to prevent DoS attacks.
const MAX_URL_LENGTH: usize = 2048;

/// Maximum length kept from a client file name.
const MAX_FILENAME_LENGTH: usize = 200;

/// Result of URL validation.
#[derive(Debug, PartialEq)]
pub enum UrlValidationResult {
    /// URL is valid and allowed.
    Valid(String),
    /// URL is malformed or uses an unsupported protocol.
    Invalid(String),
    /// URL host is not in the allowlist.
    DomainNotAllowed(String),
    /// URL matches a blocked pattern (e.g., internal IPs).
    Blocked,
    /// URL exceeds maximum length.
    TooLong,
}

impl UrlValidationResult {
    /// Convert to Result for easy error handling.
    pub fn into_result(self, allowed_hosts: &[String]) -> Result<String, String> {
        match self {
            Self::Valid(url) => Ok(url),
            Self::Invalid(msg) => Err(msg),
            Self::DomainNotAllowed(_) => Err(format!(
                "Domain not allowed. Allowed domains: {}",
                allowed_hosts.join(", ")
            )),
            Self::Blocked => Err("URL appears to target an internal or restricted endpoint".to_string()),
            Self::TooLong => Err(format!("URL exceeds maximum length of {} characters", MAX_URL_LENGTH)),
        }
    }
}

/// Validate a download URL.
///
/// `allowed_hosts` entries match the host itself or any subdomain of it; an
/// empty list accepts every public host.
pub fn validate_video_url(url: &str, allowed_hosts: &[String]) -> UrlValidationResult {
    if url.len() > MAX_URL_LENGTH {
        return UrlValidationResult::TooLong;
    }

    let url = url.trim();
    if url.is_empty() {
        return UrlValidationResult::Invalid("URL cannot be empty".to_string());
    }

    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(e) => return UrlValidationResult::Invalid(format!("Invalid URL format: {}", e)),
    };

    match parsed.scheme() {
        "http" | "https" => {}
        _ => return UrlValidationResult::Invalid("URL must use http or https protocol".to_string()),
    }

    let host = match parsed.host() {
        Some(h) => h,
        None => return UrlValidationResult::Invalid("Invalid URL: missing domain".to_string()),
    };
    if is_restricted_host(&host) {
        warn!(url = %url, "Blocked URL targeting an internal host");
        return UrlValidationResult::Blocked;
    }

    let host = host.to_string().to_lowercase();
    if host.is_empty() {
        return UrlValidationResult::Invalid("Invalid URL: missing domain".to_string());
    }

    if !is_host_allowed(&host, allowed_hosts) {
        return UrlValidationResult::DomainNotAllowed(host);
    }

    UrlValidationResult::Valid(url.to_string())
}

/// Loopback, private, link-local and unspecified addresses, plus local and
/// cloud metadata names. The host is already normalized by the URL parser, so
/// decimal, octal and hex IPv4 forms arrive as `Host::Ipv4`.
fn is_restricted_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(name) => {
            let name = name.trim_end_matches('.').to_lowercase();
            name == "localhost" || name.ends_with(".localhost") || name == "metadata" || name.starts_with("metadata.")
        }
        Host::Ipv4(ip) => is_restricted_v4(ip),
        Host::Ipv6(ip) => is_restricted_v6(ip),
    }
}

fn is_restricted_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified() || ip.is_broadcast()
}

fn is_restricted_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_restricted_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

fn is_host_allowed(host: &str, allowed_hosts: &[String]) -> bool {
    allowed_hosts.is_empty()
        || allowed_hosts
            .iter()
            .any(|allowed| host == allowed || host.ends_with(&format!(".{}", allowed)))
}

/// Reduce a client file name to a safe single path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LENGTH)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Job ids are UUIDs; anything longer or with other characters is rejected early.
pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= 64 && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_any_public_host_without_allowlist() {
        assert!(matches!(
            validate_video_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ", &[]),
            UrlValidationResult::Valid(_)
        ));
    }

    #[test]
    fn test_allowlist_accepts_subdomains() {
        let allowed = hosts(&["youtube.com"]);
        assert!(matches!(
            validate_video_url("https://m.youtube.com/watch?v=x", &allowed),
            UrlValidationResult::Valid(_)
        ));
        assert_eq!(
            validate_video_url("https://notyoutube.com/v", &allowed),
            UrlValidationResult::DomainNotAllowed("notyoutube.com".to_string())
        );
    }

    #[test]
    fn test_rejects_bad_scheme_and_internal_hosts() {
        assert!(matches!(
            validate_video_url("ftp://example.com/v.mp4", &[]),
            UrlValidationResult::Invalid(_)
        ));
        assert_eq!(
            validate_video_url("http://169.254.169.254/latest", &[]),
            UrlValidationResult::Blocked
        );
        assert_eq!(
            validate_video_url("http://LOCALHOST:8080/x", &[]),
            UrlValidationResult::Blocked
        );
        assert_eq!(
            validate_video_url(&format!("https://a.com/{}", "x".repeat(3000)), &[]),
            UrlValidationResult::TooLong
        );
    }

    #[test]
    fn test_blocks_internal_hosts_in_any_form() {
        for url in [
            "http://user@127.0.0.1:8080/",
            "http://2130706433/",
            "http://0x7f000001/",
            "http://x@169.254.169.254/latest/meta-data/",
            "http://10.0.0.5/v.mp4",
            "http://172.20.1.1/v.mp4",
            "https://192.168.1.10/v.mp4",
            "http://0.0.0.0/",
            "http://[::1]/",
            "http://[::ffff:127.0.0.1]/",
            "http://[fd12:3456::1]/",
            "http://[fe80::1]/",
            "http://metadata.google.internal/computeMetadata/v1/",
            "http://api.localhost/",
        ] {
            assert_eq!(validate_video_url(url, &[]), UrlValidationResult::Blocked, "{url}");
        }
    }

    #[test]
    fn test_public_ip_hosts_pass() {
        assert!(matches!(
            validate_video_url("http://93.184.216.34/v.mp4", &[]),
            UrlValidationResult::Valid(_)
        ));
        assert!(matches!(
            validate_video_url("https://172.32.0.1/v.mp4", &[]),
            UrlValidationResult::Valid(_)
        ));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("my clip (1).mp4"), "my_clip__1_.mp4");
        assert_eq!(sanitize_filename("C:\\videos\\a.mov"), "a.mov");
        assert_eq!(sanitize_filename("..."), "upload");
    }

    #[test]
    fn test_job_id_format() {
        assert!(is_valid_job_id("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_valid_job_id("../etc"));
        assert!(!is_valid_job_id(""));
    }
}
