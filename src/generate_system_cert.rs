//! End-entity certificate generation for sysop, core, and client systems.
//!
//! System certificates are the leaves of the hierarchy: not CAs, signed
//! by the cloud tier (sysop and core systems) or the organization tier
//! (client systems, which may move between clouds). The SAN set is built
//! from the system's IP address plus any validated `ip:`/`dns:` tokens.

use std::net::IpAddr;

use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::X509Req;

use crate::error::{FerrowheadError, Result};
use crate::keycert::{generate_private_key, sign_certificate_request, KeyCertPair};
use crate::validation::validate_san;

/// Build a self-signed CSR for a system certificate.
///
/// Every token in `sans` is validated before it reaches the extension
/// builder; a malformed token fails the whole request.
fn generate_system_signing_request(
    common_name: &str,
    ip: Option<&str>,
    sans: Option<&[String]>,
) -> Result<(PKey<Private>, X509Req)> {
    let key = generate_private_key()?;

    let mut name_builder = openssl::x509::X509Name::builder()?;
    name_builder.append_entry_by_nid(openssl::nid::Nid::COMMONNAME, common_name)?;
    let name = name_builder.build();

    let mut req_builder = X509Req::builder()?;
    req_builder.set_subject_name(&name)?;
    req_builder.set_pubkey(&key)?;

    let mut san_builder = SubjectAlternativeName::new();
    let mut san_count = 0;
    if let Some(address) = ip {
        if address.parse::<IpAddr>().is_err() {
            return Err(FerrowheadError::Validation(format!(
                "system address '{address}' is not a valid IP address"
            )));
        }
        san_builder.ip(address);
        san_count += 1;
    }
    for token in sans.unwrap_or_default() {
        validate_san(token)?;
        if let Some(ip) = token.strip_prefix("ip:") {
            san_builder.ip(ip);
        } else if let Some(dns) = token.strip_prefix("dns:") {
            san_builder.dns(dns);
        }
        san_count += 1;
    }

    if san_count > 0 {
        let mut extensions = Stack::new()?;
        extensions.push(san_builder.build(&req_builder.x509v3_context(None))?)?;
        req_builder.add_extensions(&extensions)?;
    }

    req_builder.sign(&key, MessageDigest::sha256())?;

    Ok((key, req_builder.build()))
}

/// Issue a leaf certificate for a named system, signed by `issuer`.
pub fn generate_system_cert(
    common_name: &str,
    ip: Option<&str>,
    sans: Option<&[String]>,
    issuer: &KeyCertPair,
) -> Result<KeyCertPair> {
    let (system_key, system_csr) = generate_system_signing_request(common_name, ip, sans)?;
    let system_cert = sign_certificate_request(&system_csr, &issuer.cert, &issuer.key)?;

    Ok(KeyCertPair::new(system_key, system_cert))
}
