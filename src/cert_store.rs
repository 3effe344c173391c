//! Serialization of key/certificate pairs to disk.
//!
//! Every tier and system ends up in three sibling files: `basename.crt`
//! (PEM certificate), `basename.key` (PEM private key, optionally
//! password-encrypted), and `basename.p12` (PKCS#12 bundle carrying the
//! key, the certificate, and the trust chain, most-specific CA first).
//! The sysop identity additionally gets a concatenated `.ca` bundle for
//! the management client, and the cloud-wide truststore is assembled by
//! importing the cloud certificate through an external keytool run.
//!
//! Store functions return every path they wrote so the installation
//! transaction can track them for rollback.

use std::fs;
use std::path::{Path, PathBuf};

use openssl::pkcs12::Pkcs12;
use openssl::stack::Stack;
use openssl::symm::Cipher;
use openssl::x509::X509;

use crate::error::{FerrowheadError, Result};
use crate::external::ExternalRunner;
use crate::keycert::{subject_common_name, KeyCertPair};

/// Fixed, well-known password protecting the root PKCS#12 file.
pub const ROOT_P12_PASSWORD: &str = "123456";

fn password_or_empty(password: Option<&str>) -> &str {
    match password {
        Some(p) if !p.is_empty() => p,
        _ => "",
    }
}

/// Write `basename.crt` and `basename.key` under `dir`.
///
/// The key is encrypted with AES-256-CBC when a non-empty password is
/// given, and left unencrypted otherwise.
pub fn store_pem(
    pair: &KeyCertPair,
    dir: &Path,
    basename: &str,
    password: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let crt_path = dir.join(format!("{basename}.crt"));
    fs::write(&crt_path, pair.cert.to_pem()?)?;

    let key_path = dir.join(format!("{basename}.key"));
    let key_pem = match password {
        Some(p) if !p.is_empty() => pair
            .key
            .private_key_to_pem_pkcs8_passphrase(Cipher::aes_256_cbc(), p.as_bytes())?,
        _ => pair.key.private_key_to_pem_pkcs8()?,
    };
    fs::write(&key_path, key_pem)?;

    Ok(vec![crt_path, key_path])
}

/// Write `basename.p12` under `dir`, bundling the key, the certificate,
/// and the given trust chain (most-specific CA first).
pub fn store_p12(
    pair: &KeyCertPair,
    dir: &Path,
    basename: &str,
    friendly_name: &str,
    trust_chain: &[X509],
    password: Option<&str>,
) -> Result<PathBuf> {
    let mut builder = Pkcs12::builder();
    builder.name(friendly_name);
    builder.pkey(&pair.key);
    builder.cert(&pair.cert);
    if !trust_chain.is_empty() {
        let mut cas = Stack::new()?;
        for ca in trust_chain {
            cas.push(ca.clone())?;
        }
        builder.ca(cas);
    }
    let pkcs12 = builder.build2(password_or_empty(password))?;

    let p12_path = dir.join(format!("{basename}.p12"));
    fs::write(&p12_path, pkcs12.to_der()?)?;

    Ok(p12_path)
}

/// Load a key/certificate pair and its CA chain back from a PKCS#12 file.
///
/// A wrong password, a corrupt file, or a bundle without key or
/// certificate is a [`FerrowheadError::CertificateLoad`]; callers must
/// not fall back to regeneration on this error.
pub fn load_p12(path: &Path, password: &str) -> Result<(KeyCertPair, Vec<X509>)> {
    let der = fs::read(path)?;
    let parsed = Pkcs12::from_der(&der)
        .and_then(|p12| p12.parse2(password))
        .map_err(|e| FerrowheadError::CertificateLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let key = parsed.pkey.ok_or_else(|| FerrowheadError::CertificateLoad {
        path: path.to_path_buf(),
        reason: "bundle contains no private key".into(),
    })?;
    let cert = parsed.cert.ok_or_else(|| FerrowheadError::CertificateLoad {
        path: path.to_path_buf(),
        reason: "bundle contains no certificate".into(),
    })?;
    let cas = parsed
        .ca
        .map(|stack| stack.iter().map(|c| c.to_owned()).collect())
        .unwrap_or_default();

    Ok((KeyCertPair::new(key, cert), cas))
}

/// Store the root tier: `root.p12` (fixed password) and `root.crt`.
pub fn store_root_files(root_cert_dir: &Path, root: &KeyCertPair) -> Result<Vec<PathBuf>> {
    let p12_path = store_p12(
        root,
        root_cert_dir,
        "root",
        "arrowhead.eu",
        &[],
        Some(ROOT_P12_PASSWORD),
    )?;
    let crt_path = root_cert_dir.join("root.crt");
    fs::write(&crt_path, root.cert.to_pem()?)?;

    Ok(vec![p12_path, crt_path])
}

/// Store the organization tier: `{org}.{p12,crt,key}` with the root as
/// its single chain entry. The key file is written unencrypted.
pub fn store_org_files(
    org_cert_dir: &Path,
    org_name: &str,
    org: &KeyCertPair,
    root_cert: &X509,
    org_password: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let friendly_name = format!("{org_name}.arrowhead.eu");
    let p12_path = store_p12(
        org,
        org_cert_dir,
        org_name,
        &friendly_name,
        &[root_cert.clone()],
        org_password,
    )?;
    let mut paths = store_pem(org, org_cert_dir, org_name, None)?;
    paths.insert(0, p12_path);

    Ok(paths)
}

/// Store the cloud tier: `{cloud}.{p12,crt,key}` with org and root as
/// its chain. The key file is written unencrypted.
pub fn store_cloud_files(
    cloud_cert_dir: &Path,
    cloud_name: &str,
    org_name: &str,
    cloud: &KeyCertPair,
    org_cert: &X509,
    root_cert: &X509,
    cloud_password: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let friendly_name = format!("{cloud_name}.{org_name}.arrowhead.eu");
    let p12_path = store_p12(
        cloud,
        cloud_cert_dir,
        cloud_name,
        &friendly_name,
        &[org_cert.clone(), root_cert.clone()],
        cloud_password,
    )?;
    let mut paths = store_pem(cloud, cloud_cert_dir, cloud_name, None)?;
    paths.insert(0, p12_path);

    Ok(paths)
}

/// Store one system's files: `{basename}.{p12,crt,key}` with the full
/// cloud/org/root chain. The key is encrypted with the given password.
pub fn store_system_files(
    cert_dir: &Path,
    basename: &str,
    system: &KeyCertPair,
    cloud_cert: &X509,
    org_cert: &X509,
    root_cert: &X509,
    password: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let friendly_name =
        subject_common_name(&system.cert).unwrap_or_else(|| basename.to_string());
    let p12_path = store_p12(
        system,
        cert_dir,
        basename,
        &friendly_name,
        &[cloud_cert.clone(), org_cert.clone(), root_cert.clone()],
        password,
    )?;
    let mut paths = store_pem(system, cert_dir, basename, password)?;
    paths.insert(0, p12_path);

    Ok(paths)
}

/// Store the sysop identity: a normal system store plus a concatenated
/// `sysop.ca` bundle (cloud, org, root certificates in that order). The
/// sysop key is always written unencrypted so the management client can
/// load it without a prompt.
pub fn store_sysop_files(
    cert_dir: &Path,
    cloud_name: &str,
    sysop: &KeyCertPair,
    cloud_cert: &X509,
    org_cert: &X509,
    root_cert: &X509,
    password: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let p12_path = store_p12(
        sysop,
        cert_dir,
        "sysop",
        &format!("sysop.{cloud_name}"),
        &[cloud_cert.clone(), org_cert.clone(), root_cert.clone()],
        password,
    )?;
    let mut paths = store_pem(sysop, cert_dir, "sysop", None)?;
    paths.insert(0, p12_path);

    let ca_path = cert_dir.join("sysop.ca");
    let mut bundle = cloud_cert.to_pem()?;
    bundle.extend_from_slice(&org_cert.to_pem()?);
    bundle.extend_from_slice(&root_cert.to_pem()?);
    fs::write(&ca_path, bundle)?;
    paths.push(ca_path);

    Ok(paths)
}

/// Create or extend the cloud truststore by importing the already-stored
/// cloud certificate through the external keytool utility.
///
/// The entry alias is the cloud certificate's common name; the import
/// file is `{cloud_short_name}.crt` in the same directory. A non-zero
/// keytool exit is a hard failure carrying the captured output.
pub fn store_truststore(
    runner: &dyn ExternalRunner,
    cert_dir: &Path,
    cloud_cert: &X509,
    password: &str,
) -> Result<PathBuf> {
    let cloud_long_name =
        subject_common_name(cloud_cert).ok_or_else(|| FerrowheadError::CertificateLoad {
            path: cert_dir.join("truststore.p12"),
            reason: "cloud certificate has no common name".into(),
        })?;
    let cloud_short_name = cloud_long_name
        .split('.')
        .next()
        .unwrap_or(&cloud_long_name)
        .to_string();

    let truststore_path = cert_dir.join("truststore.p12");
    runner.import_truststore(
        &truststore_path,
        &cert_dir.join(format!("{cloud_short_name}.crt")),
        &cloud_long_name,
        password,
    )?;

    Ok(truststore_path)
}
