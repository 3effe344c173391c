//! Validation of DNS names and subject-alternative-name tokens.
//!
//! Every name that ends up in a certificate subject and every SAN token
//! passes through here before it reaches certificate construction. A
//! malformed SAN must never silently become a wrong or empty certificate
//! field, so [`validate_san`] is called again inside the leaf builder even
//! when the configuration was already validated at load time.

use std::net::IpAddr;

use crate::error::{FerrowheadError, Result};

/// Check that a string is a valid dot-separated sequence of RFC 1035
/// labels: letters, digits, and hyphens, with no leading or trailing
/// hyphen in any segment. Used for cloud and organization names.
pub fn validate_dns_label(candidate: &str) -> Result<()> {
    if check_valid_dns(candidate) {
        Ok(())
    } else {
        Err(FerrowheadError::Validation(format!(
            "'{candidate}' is not a valid DNS name"
        )))
    }
}

fn check_valid_dns(candidate: &str) -> bool {
    if candidate.is_empty() {
        return false;
    }
    candidate.split('.').all(valid_label)
}

fn valid_label(label: &str) -> bool {
    if label.is_empty() {
        return false;
    }
    let bytes = label.as_bytes();
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || *b == b'-')
}

/// Validate one subject-alternative-name token. A token must carry an
/// `ip:` or `dns:` prefix; the remainder must parse as an IP literal or a
/// valid DNS name respectively.
pub fn validate_san(candidate: &str) -> Result<()> {
    if let Some(ip) = candidate.strip_prefix("ip:") {
        if ip.parse::<IpAddr>().is_err() {
            return Err(FerrowheadError::Validation(format!(
                "malformed san ip: '{candidate}'"
            )));
        }
        Ok(())
    } else if let Some(name) = candidate.strip_prefix("dns:") {
        if !check_valid_dns(name) {
            return Err(FerrowheadError::Validation(format!(
                "malformed san dns: '{candidate}'"
            )));
        }
        Ok(())
    } else {
        Err(FerrowheadError::Validation(format!(
            "subject alternative name must start with either 'ip:' or 'dns:', got '{candidate}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_sans() {
        assert!(validate_san("ip:127.0.0.1").is_ok());
        assert!(validate_san("ip:::1").is_ok());
        assert!(validate_san("dns:a.b.com").is_ok());
        assert!(validate_san("dns:localhost").is_ok());
    }

    #[test]
    fn rejects_unknown_prefixes() {
        assert!(validate_san("ips:127.0.0.1").is_err());
        assert!(validate_san("dna:x.y").is_err());
        assert!(validate_san("id:127.0.0.1").is_err());
        assert!(validate_san("127.0.0.1").is_err());
    }

    #[test]
    fn rejects_malformed_remainders() {
        assert!(validate_san("ip:499.200.100.1").is_err());
        assert!(validate_san("ip:127.0.0:1").is_err());
        assert!(validate_san("dns:owl_bear").is_err());
        assert!(validate_san("dns:-hob.goblin").is_err());
        assert!(validate_san("dns:").is_err());
    }

    #[test]
    fn dns_label_grammar() {
        assert!(validate_dns_label("test-cloud").is_ok());
        assert!(validate_dns_label("a.b-c.d0").is_ok());
        assert!(validate_dns_label("arrowhead.eu").is_ok());

        assert!(validate_dns_label("").is_err());
        assert!(validate_dns_label("-leading").is_err());
        assert!(validate_dns_label("trailing-").is_err());
        assert!(validate_dns_label("under_score").is_err());
        assert!(validate_dns_label("double..dot").is_err());
    }
}
