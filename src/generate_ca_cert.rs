//! Intermediate CA generation for the organization and cloud tiers.
//!
//! Both tiers are produced the same way: a fresh key self-signs a CSR
//! carrying the CA basic constraints and a DNS SAN equal to the common
//! name, and the parent tier's key signs the resulting certificate. The
//! organization tier has no path length limit; the cloud tier is issued
//! with `pathlen=2` so it can sign system certificates but no further CAs.

use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::X509Req;

use crate::error::Result;
use crate::keycert::{generate_private_key, sign_certificate_request, KeyCertPair};

/// Build a self-signed CSR for a CA certificate with the given path
/// length constraint and a DNS SAN equal to the common name.
fn generate_ca_signing_request(
    common_name: &str,
    path_length: Option<u32>,
) -> Result<(PKey<Private>, X509Req)> {
    let key = generate_private_key()?;

    let mut name_builder = openssl::x509::X509Name::builder()?;
    name_builder.append_entry_by_nid(openssl::nid::Nid::COMMONNAME, common_name)?;
    let name = name_builder.build();

    let mut req_builder = X509Req::builder()?;
    req_builder.set_subject_name(&name)?;
    req_builder.set_pubkey(&key)?;

    let mut extensions = Stack::new()?;
    let mut bc = BasicConstraints::new();
    bc.ca();
    if let Some(limit) = path_length {
        bc.pathlen(limit);
    }
    extensions.push(bc.build()?)?;
    extensions.push(
        SubjectAlternativeName::new()
            .dns(common_name)
            .build(&req_builder.x509v3_context(None))?,
    )?;
    req_builder.add_extensions(&extensions)?;

    req_builder.sign(&key, MessageDigest::sha256())?;

    Ok((key, req_builder.build()))
}

/// Issue a CA certificate signed by the given parent tier.
pub fn generate_ca_cert(
    common_name: &str,
    path_length: Option<u32>,
    issuer: &KeyCertPair,
) -> Result<KeyCertPair> {
    let (ca_key, ca_csr) = generate_ca_signing_request(common_name, path_length)?;
    let ca_cert = sign_certificate_request(&ca_csr, &issuer.cert, &issuer.key)?;

    Ok(KeyCertPair::new(ca_key, ca_cert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_root_ca::generate_root_certificate;
    use crate::keycert::subject_common_name;

    #[test]
    fn ca_cert_chains_to_issuer() {
        let root = generate_root_certificate().unwrap();
        let org = generate_ca_cert("test-org.arrowhead.eu", None, &root).unwrap();

        assert_eq!(
            subject_common_name(&org.cert).as_deref(),
            Some("test-org.arrowhead.eu")
        );
        let issuer_cn = org
            .cert
            .issuer_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        assert_eq!(issuer_cn, "arrowhead.eu");
        assert!(org.cert.verify(&root.cert.public_key().unwrap()).unwrap());
    }

    #[test]
    fn path_length_constraints_per_tier() {
        let root = generate_root_certificate().unwrap();
        let org = generate_ca_cert("org.arrowhead.eu", None, &root).unwrap();
        let cloud = generate_ca_cert("cloud.org.arrowhead.eu", Some(2), &org).unwrap();

        // Organization CAs are unconstrained; cloud CAs may only issue
        // down to their own leaves.
        assert_eq!(org.cert.pathlen(), None);
        assert_eq!(cloud.cert.pathlen(), Some(2));
    }

    #[test]
    fn csr_extensions_survive_signing() {
        let root = generate_root_certificate().unwrap();
        let cloud_parent = generate_ca_cert("org.arrowhead.eu", None, &root).unwrap();
        let cloud = generate_ca_cert("cloud.org.arrowhead.eu", Some(2), &cloud_parent).unwrap();

        // The DNS SAN from the CSR must appear on the final certificate.
        let sans = cloud.cert.subject_alt_names().unwrap();
        let dns: Vec<_> = sans.iter().filter_map(|gn| gn.dnsname()).collect();
        assert_eq!(dns, vec!["cloud.org.arrowhead.eu"]);
    }
}
