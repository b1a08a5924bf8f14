//! Error types for the VCS gateway crate.

use std::fmt;

/// Errors from VCS gateway operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VcsError {
    /// The remote host could not be reached (network failure, timeout,
    /// or an unexpected response status).
    Unreachable { reason: String },
    /// The remote rejected the supplied credentials.
    AuthFailed { status: u16 },
    /// The requested ref is not advertised by the remote.
    RefNotFound { ref_name: String },
    /// The remote sent a response that does not parse as a ref
    /// advertisement.
    Protocol { reason: String },
    /// The HTTP client could not be constructed.
    Client { reason: String },
}

impl fmt::Display for VcsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable { reason } => {
                write!(f, "remote repository unreachable: {reason}")
            }
            Self::AuthFailed { status } => {
                write!(f, "remote repository rejected credentials (status {status})")
            }
            Self::RefNotFound { ref_name } => {
                write!(f, "ref not advertised by remote: {ref_name}")
            }
            Self::Protocol { reason } => {
                write!(f, "malformed ref advertisement: {reason}")
            }
            Self::Client { reason } => {
                write!(f, "failed to build vcs http client: {reason}")
            }
        }
    }
}

impl std::error::Error for VcsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreachable_display() {
        let err = VcsError::Unreachable {
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("unreachable"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn ref_not_found_display() {
        let err = VcsError::RefNotFound {
            ref_name: "refs/heads/main".to_string(),
        };
        assert!(err.to_string().contains("refs/heads/main"));
    }

    #[test]
    fn auth_failed_display() {
        let err = VcsError::AuthFailed { status: 401 };
        assert!(err.to_string().contains("401"));
    }
}
