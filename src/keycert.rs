//! Shared key and certificate primitives.
//!
//! Holds the [`KeyCertPair`] type passed between the tier generators, the
//! certificate store, and the installation transaction, plus the numeric
//! contract every signing operation follows: 2048-bit RSA keys, 128-bit
//! random serial numbers, SHA-256 digests, and a ten-year validity window.

use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{AuthorityKeyIdentifier, SubjectKeyIdentifier};
use openssl::x509::{X509Req, X509};

use crate::error::Result;

/// Fixed RSA modulus size for every key in the hierarchy.
pub const RSA_KEY_SIZE: u32 = 2048;

/// Validity period of every certificate in the chain: 365.25 * 10 days.
pub const VALIDITY_DAYS: u32 = 3652;

/// X509 version 3 is represented by 2.
pub(crate) const X509_VERSION_3: i32 = 2;

/// An owned private key together with its certificate.
///
/// Produced by the generators or loaded back from an existing PKCS#12
/// file. Tiers never share ownership: a child tier borrows its parent's
/// pair only for the duration of signing.
pub struct KeyCertPair {
    pub key: PKey<Private>,
    pub cert: X509,
}

impl KeyCertPair {
    pub fn new(key: PKey<Private>, cert: X509) -> Self {
        Self { key, cert }
    }
}

/// Generate a fresh RSA private key.
pub fn generate_private_key() -> Result<PKey<Private>> {
    let rsa = openssl::rsa::Rsa::generate(RSA_KEY_SIZE)?;
    Ok(PKey::from_rsa(rsa)?)
}

/// Random 128-bit serial number for a new certificate.
pub fn random_serial() -> Result<Asn1Integer> {
    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial.to_asn1_integer()?)
}

/// Sign a certificate request with an issuer's key.
///
/// The issued certificate takes its subject and public key from the
/// request and its issuer name from the issuer's certificate subject. A
/// subject key identifier is derived from the request's public key and an
/// authority key identifier links back to the issuer; every extension
/// present on the request is propagated onto the certificate unchanged.
pub fn sign_certificate_request(
    csr: &X509Req,
    issuer_cert: &X509,
    issuer_key: &PKey<Private>,
) -> Result<X509> {
    let pubkey = csr.public_key()?;

    let mut builder = X509::builder()?;
    builder.set_version(X509_VERSION_3)?;
    builder.set_serial_number(&*random_serial()?)?;
    builder.set_subject_name(csr.subject_name())?;
    builder.set_issuer_name(issuer_cert.subject_name())?;
    builder.set_not_before(&*Asn1Time::days_from_now(0)?)?;
    builder.set_not_after(&*Asn1Time::days_from_now(VALIDITY_DAYS)?)?;
    builder.set_pubkey(&pubkey)?;

    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(Some(issuer_cert), None))?;
    builder.append_extension(ski)?;

    let aki = AuthorityKeyIdentifier::new()
        .keyid(true)
        .build(&builder.x509v3_context(Some(issuer_cert), None))?;
    builder.append_extension(aki)?;

    // A request with no extension attribute yields an error from the
    // underlying X509_REQ_get_extensions call; treat that as empty.
    if let Ok(extensions) = csr.extensions() {
        for extension in extensions.iter() {
            builder.append_extension2(extension)?;
        }
    }

    builder.sign(issuer_key, MessageDigest::sha256())?;

    Ok(builder.build())
}

/// Extract the common name from a certificate subject.
pub fn subject_common_name(cert: &X509) -> Option<String> {
    cert.subject_name()
        .entries_by_nid(openssl::nid::Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_key_has_expected_size() {
        let key = generate_private_key().unwrap();
        assert_eq!(key.rsa().unwrap().size() * 8, RSA_KEY_SIZE);
    }

    #[test]
    fn serials_are_random() {
        let a = random_serial().unwrap();
        let b = random_serial().unwrap();
        assert_ne!(
            a.to_bn().unwrap().to_vec(),
            b.to_bn().unwrap().to_vec()
        );
    }
}
