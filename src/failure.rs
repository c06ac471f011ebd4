use thiserror::Error;

use crate::{Error as ProviderError, ErrorKind};

/// Coarse, stable classification of a context-destroying provider error.
///
/// Callers branch on it: a `CredentialFailure` may be retried with other credentials, a
/// `ClientFault` means the peer sent something unacceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticationFailure {
    /// Identity or trust problem: denied logon, unknown credentials, untrusted certificates,
    /// mismatched channel bindings.
    CredentialFailure,
    /// Malformed or policy-incompatible handshake data supplied by the peer.
    ClientFault,
    Unknown,
}

impl From<ErrorKind> for AuthenticationFailure {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::LogonDenied
            | ErrorKind::UnknownCredentials
            | ErrorKind::NoImpersonation
            | ErrorKind::NoAuthenticatingAuthority
            | ErrorKind::UntrustedRoot
            | ErrorKind::CertificateExpired
            | ErrorKind::SmartCardLogonRequired
            | ErrorKind::BadBindings => AuthenticationFailure::CredentialFailure,

            ErrorKind::InvalidToken
            | ErrorKind::IllegalMessage
            | ErrorKind::CannotPack
            | ErrorKind::QopNotSupported
            | ErrorKind::NoCredentials
            | ErrorKind::MessageAltered
            | ErrorKind::OutOfSequence
            | ErrorKind::IncompleteMessage
            | ErrorKind::IncompleteCredentials
            | ErrorKind::WrongPrincipalName
            | ErrorKind::TimeSkew
            | ErrorKind::CertificateUnknown
            | ErrorKind::AlgorithmMismatch
            | ErrorKind::SecurityQosFailed
            | ErrorKind::UnsupportedPreAuth => AuthenticationFailure::ClientFault,

            _ => AuthenticationFailure::Unknown,
        }
    }
}

impl From<&ProviderError> for AuthenticationFailure {
    fn from(err: &ProviderError) -> Self {
        err.error_type.into()
    }
}

/// Terminal error of a handshake session.
#[derive(Debug, Clone, Error)]
pub enum HandshakeError {
    /// The package is unknown or the provider rejected the credential material.
    #[error("failed to acquire credentials: {0}")]
    CredentialAcquisition(#[source] ProviderError),

    /// The provider destroyed the security context. The session is finished.
    #[error("authentication failed ({failure:?}): {source}")]
    Authentication {
        failure: AuthenticationFailure,
        #[source]
        source: ProviderError,
    },

    /// An incoming text token is not valid base64. The session state is unchanged.
    #[error("malformed base64 token: {0}")]
    MalformedToken(#[from] base64::DecodeError),
}

impl HandshakeError {
    pub(crate) fn authentication(source: ProviderError) -> Self {
        Self::Authentication {
            failure: AuthenticationFailure::from(&source),
            source,
        }
    }

    /// Classification of an authentication failure, `None` for the other variants.
    pub fn failure(&self) -> Option<AuthenticationFailure> {
        match self {
            HandshakeError::Authentication { failure, .. } => Some(*failure),
            _ => None,
        }
    }

    /// Provider error kind behind this error, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            HandshakeError::CredentialAcquisition(source) | HandshakeError::Authentication { source, .. } => {
                Some(source.error_type)
            }
            HandshakeError::MalformedToken(_) => None,
        }
    }
}
