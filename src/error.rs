//! Error types for ferrowhead operations.
//!
//! Every fallible operation in this crate returns [`Result`]. The variants
//! mirror the recovery strategies available to a caller: validation errors
//! are fixable input problems, certificate load errors are fatal to the
//! running transaction, external tool errors carry the captured output of
//! the failed utility, and transaction errors wrap whatever brought an
//! installation down after its rollback completed.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FerrowheadError {
    /// Malformed user input: cloud/org names, SAN tokens, or a cloud
    /// configuration file with missing or unknown keys. Raised before any
    /// side effect takes place.
    #[error("validation error: {0}")]
    Validation(String),

    /// An existing PKCS#12 file could not be decrypted or parsed, or its
    /// CA chain did not have the expected shape. Never downgraded to
    /// regeneration: a wrong password must fail the whole run.
    #[error("could not load certificate from {path}: {reason}")]
    CertificateLoad { path: PathBuf, reason: String },

    /// A subprocess (keytool, the SQL init script, the volume manager)
    /// exited non-zero. `output` holds its captured stdout and stderr.
    #[error("external tool '{tool}' failed:\n{output}")]
    ExternalTool { tool: String, output: String },

    /// An installation step failed mid-transaction. Every file created by
    /// the failed run has already been removed when this is returned.
    #[error("installation failed and was rolled back: {source}")]
    Transaction {
        #[source]
        source: Box<FerrowheadError>,
    },

    #[error("registry error: {0}")]
    Registry(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, FerrowheadError>;

impl FerrowheadError {
    /// Wrap an error that interrupted an installation transaction. Applied
    /// once at the transaction boundary, after rollback has run.
    pub fn into_transaction(self) -> FerrowheadError {
        match self {
            err @ FerrowheadError::Transaction { .. } => err,
            other => FerrowheadError::Transaction {
                source: Box::new(other),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_wrapping_is_idempotent() {
        let inner = FerrowheadError::Validation("bad name".into());
        let wrapped = inner.into_transaction().into_transaction();
        match wrapped {
            FerrowheadError::Transaction { source } => {
                assert!(matches!(*source, FerrowheadError::Validation(_)));
            }
            other => panic!("expected transaction error, got {other}"),
        }
    }

    #[test]
    fn external_tool_error_carries_output() {
        let err = FerrowheadError::ExternalTool {
            tool: "keytool".into(),
            output: "keystore was tampered with".into(),
        };
        assert!(err.to_string().contains("keystore was tampered with"));
    }
}
