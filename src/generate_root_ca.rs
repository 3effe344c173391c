//! Root CA certificate generation.
//!
//! The root tier is the trust anchor shared by every organization managed
//! on this machine. It is self-signed under the fixed common name
//! `arrowhead.eu` and generated exactly once; later installations load it
//! back from `root-certs/crypto/root.p12` instead of regenerating it.
//!
//! ```text
//! Root CA (self-signed) <- this module
//!   └── Organization CA (signed by root)
//!       └── Cloud CA (signed by organization, pathlen=2)
//!           └── System certificates (sysop, core systems)
//! ```

use openssl::asn1::Asn1Time;
use openssl::hash::MessageDigest;
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName, SubjectKeyIdentifier};
use openssl::x509::X509;

use crate::error::Result;
use crate::keycert::{
    generate_private_key, random_serial, KeyCertPair, VALIDITY_DAYS, X509_VERSION_3,
};

/// Common name of the root certificate, also used as its DNS SAN and the
/// friendly name of the root PKCS#12 entry.
pub const ROOT_COMMON_NAME: &str = "arrowhead.eu";

/// Generate the self-signed root certificate and its private key.
///
/// The certificate is CA-enabled without a path length limit, carries a
/// subject key identifier and a DNS subject-alternative-name equal to the
/// common name, and is valid for ten years.
pub fn generate_root_certificate() -> Result<KeyCertPair> {
    let root_key = generate_private_key()?;

    let mut name_builder = openssl::x509::X509Name::builder()?;
    name_builder.append_entry_by_nid(openssl::nid::Nid::COMMONNAME, ROOT_COMMON_NAME)?;
    let name = name_builder.build();

    let mut builder = X509::builder()?;
    builder.set_version(X509_VERSION_3)?;
    builder.set_serial_number(&*random_serial()?)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
    builder.set_not_after(&*Asn1Time::days_from_now(VALIDITY_DAYS)?)?;
    builder.set_pubkey(&root_key)?;

    let mut bc = BasicConstraints::new();
    bc.ca();
    let bc = bc.build()?;
    builder.append_extension(bc)?;

    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
    builder.append_extension(ski)?;

    let san = SubjectAlternativeName::new()
        .dns(ROOT_COMMON_NAME)
        .build(&builder.x509v3_context(None, None))?;
    builder.append_extension(san)?;

    builder.sign(&root_key, MessageDigest::sha256())?;

    Ok(KeyCertPair::new(root_key, builder.build()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycert::subject_common_name;

    #[test]
    fn root_is_self_signed() {
        let root = generate_root_certificate().unwrap();
        assert_eq!(
            subject_common_name(&root.cert).as_deref(),
            Some(ROOT_COMMON_NAME)
        );
        // Self-signed: verifies under its own public key.
        let pubkey = root.cert.public_key().unwrap();
        assert!(root.cert.verify(&pubkey).unwrap());
    }

    #[test]
    fn root_carries_dns_san() {
        let root = generate_root_certificate().unwrap();
        let sans = root.cert.subject_alt_names().unwrap();
        let dns: Vec<_> = sans.iter().filter_map(|gn| gn.dnsname()).collect();
        assert_eq!(dns, vec![ROOT_COMMON_NAME]);
    }
}
