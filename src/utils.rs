//! Utility functions for the referral exchange

use crate::error::{QueueError, QueueResult};
use chrono::{DateTime, Utc};
use url::{Host, Url};

/// Default upper bound on referral link length
pub const DEFAULT_MAX_LINK_LENGTH: usize = 512;

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Generate a new correlation id for outbound messages
pub fn generate_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Normalize and syntactically validate a referral link.
///
/// Only the shape of the link is checked: it must parse as an absolute
/// `http`/`https` URL with a DNS or IP host, carry no embedded whitespace and
/// stay within `max_length`. Returns the trimmed link as submitted.
pub fn validate_referral_link(raw: &str, max_length: usize) -> QueueResult<String> {
    let link = raw.trim();

    if link.is_empty() {
        return Err(invalid("link is empty"));
    }
    if link.chars().count() > max_length {
        return Err(invalid(&format!("link is longer than {} characters", max_length)));
    }
    if link.chars().any(char::is_whitespace) {
        return Err(invalid("link contains whitespace"));
    }

    let url =
        Url::parse(link).map_err(|e| invalid(&format!("link is not a valid URL ({})", e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("link must start with http:// or https://"));
    }

    // The parser skips extra slashes, so "https:///host" would otherwise pass
    let authority = link
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    if authority.is_empty() || authority.starts_with(['/', '\\']) {
        return Err(invalid("link has no host"));
    }

    match url.host() {
        Some(Host::Domain(domain)) if is_hostname(domain) => {}
        Some(Host::Ipv4(_)) | Some(Host::Ipv6(_)) => {}
        Some(Host::Domain(_)) => return Err(invalid("link host is not a valid hostname")),
        None => return Err(invalid("link has no host")),
    }

    Ok(link.to_string())
}

/// Dot-separated labels of ASCII letters, digits and hyphens
fn is_hostname(domain: &str) -> bool {
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    !domain.is_empty()
        && domain.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn invalid(reason: &str) -> QueueError {
    QueueError::InvalidLink {
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        let id1 = generate_correlation_id();
        let id2 = generate_correlation_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_valid_links_are_trimmed() {
        let link = validate_referral_link("  https://app.test/ref?code=abc \n", 512).unwrap();
        assert_eq!(link, "https://app.test/ref?code=abc");

        assert!(validate_referral_link("http://example.com", 512).is_ok());
        assert!(validate_referral_link("HTTPS://Example.com/x", 512).is_ok());
        assert!(validate_referral_link("https://user@shop.example.com:8443/r/42#top", 512).is_ok());
        assert!(validate_referral_link("http://192.168.1.10/ref", 512).is_ok());
        assert!(validate_referral_link("https://[::1]/ref", 512).is_ok());
    }

    #[test]
    fn test_invalid_links() {
        for raw in [
            "",
            "   ",
            "example.com/ref",
            "ftp://example.com",
            "https://",
            "https:///path",
            "https://exa mple.com",
            "https://@",
            "https://a:b@",
            "http://<script>",
            "https://%%%/x",
            "https://exa\"mple.com",
            "https://.example.com",
            "https:example.com",
            "mailto:someone@example.com",
        ] {
            let err = validate_referral_link(raw, 512).unwrap_err();
            assert!(
                matches!(err, QueueError::InvalidLink { .. }),
                "{:?} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_link_length_limit() {
        let long = format!("https://example.com/{}", "a".repeat(100));
        assert!(validate_referral_link(&long, 50).is_err());
        assert!(validate_referral_link(&long, 200).is_ok());
    }
}
