//! Handshake session management for Negotiate-family (Negotiate, NTLM, Kerberos) authentication.
//!
//! The crate drives an injected [`SecurityProvider`] through the token exchange until a security
//! context is established, classifies terminal failures into [`AuthenticationFailure`], and keeps
//! recently used credential handles alive in a shared [`CredentialCache`].
//!
//! ```ignore
//! let cache = Arc::new(CredentialCache::new());
//! let mut session = HandshakeSession::builder(provider, cache)
//!     .client()
//!     .with_package(SecurityPackageType::Negotiate)
//!     .with_target_name("HTTP/www.example.com")
//!     .with_context_requirements(ContextFlags::MUTUAL_AUTH | ContextFlags::CONFIDENTIALITY)
//!     .execute()?;
//!
//! let mut incoming = None;
//! loop {
//!     let outgoing = session.exchange_token(incoming.as_deref())?;
//!     if let Some(token) = outgoing {
//!         incoming = send_to_peer(token)?;
//!     }
//!     if session.is_completed() {
//!         break;
//!     }
//! }
//! ```

#[macro_use]
extern crate tracing;

pub mod auth_identity;
pub mod builders;
pub mod channel_bindings;
pub mod credential_cache;
pub mod failure;
pub mod handle;
#[cfg(feature = "logging")]
pub mod logging;
pub mod provider;
mod secret;
pub mod session;
pub mod token;

#[cfg(test)]
mod test_provider;

use std::{error, fmt, io, str, sync};

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};

pub use self::auth_identity::{AuthIdentity, CredentialSource};
pub use self::channel_bindings::ChannelBindings;
pub use self::credential_cache::{CredentialCache, CredentialCacheConfig, CredentialKey};
pub use self::failure::{AuthenticationFailure, HandshakeError};
pub use self::handle::{SafeContextHandle, SafeCredentialsHandle};
pub use self::provider::{
    AcceptContextRequest, ContextResult, InitializeContextRequest, SecurityProvider, UnwrappedMessage,
};
pub use self::secret::Secret;
pub use self::session::{HandshakeSession, Role};

pub type Result<T> = std::result::Result<T, Error>;

pub const NEGOTIATE_PKG_NAME: &str = "Negotiate";
pub const NTLM_PKG_NAME: &str = "NTLM";
pub const KERBEROS_PKG_NAME: &str = "Kerberos";

bitflags! {
    /// Context requirements and attributes shared by both roles.
    ///
    /// Providers translate these into their own initiator/acceptor vocabularies
    /// (`ISC_REQ_*`/`ASC_REQ_*` on Windows, `GSS_C_*` elsewhere).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ContextFlags: u32 {
        const DELEGATE = 0x1;
        const MUTUAL_AUTH = 0x2;
        const REPLAY_DETECT = 0x4;
        const SEQUENCE_DETECT = 0x8;
        const CONFIDENTIALITY = 0x10;
        const USE_SESSION_KEY = 0x20;
        const ALLOCATE_MEMORY = 0x100;
        const CONNECTION = 0x800;
        const INTEGRITY = 0x10_000;
        const IDENTIFY = 0x20_000;
        const NULL_SESSION = 0x40_000;
        const PROXY_BINDINGS = 0x400_0000;
        const ALLOW_MISSING_BINDINGS = 0x1000_0000;
        const UNVERIFIED_TARGET_NAME = 0x2000_0000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EncryptionFlags: u32 {
        const WRAP_OOB_DATA = 0x4000_0000;
        const WRAP_NO_ENCRYPT = 0x8000_0001;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DecryptionFlags: u32 {
        const SIGN_ONLY = 0x8000_0000;
        const WRAP_NO_ENCRYPT = 0x8000_0001;
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum CredentialUse {
    Inbound = 1,
    Outbound = 2,
    Both = 3,
    Default = 4,
}

/// Name of the security package requested from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SecurityPackageType {
    Negotiate,
    Ntlm,
    Kerberos,
    Other(String),
}

impl SecurityPackageType {
    pub fn as_str(&self) -> &str {
        match self {
            SecurityPackageType::Negotiate => NEGOTIATE_PKG_NAME,
            SecurityPackageType::Ntlm => NTLM_PKG_NAME,
            SecurityPackageType::Kerberos => KERBEROS_PKG_NAME,
            SecurityPackageType::Other(name) => name.as_str(),
        }
    }
}

impl fmt::Display for SecurityPackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl str::FromStr for SecurityPackageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            NEGOTIATE_PKG_NAME => SecurityPackageType::Negotiate,
            NTLM_PKG_NAME => SecurityPackageType::Ntlm,
            KERBEROS_PKG_NAME => SecurityPackageType::Kerberos,
            "" => {
                return Err(Error::new(
                    ErrorKind::SecurityPackageNotFound,
                    "security package name is empty",
                ))
            }
            s => SecurityPackageType::Other(s.to_owned()),
        })
    }
}

impl From<&str> for SecurityPackageType {
    fn from(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| SecurityPackageType::Other(s.to_owned()))
    }
}

/// Non-error statuses returned by the provider context calls.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum SecurityStatus {
    Ok = 0,
    ContinueNeeded = 0x0009_0312,
    CompleteNeeded = 0x0009_0313,
    CompleteAndContinue = 0x0009_0314,
    LocalLogon = 0x0009_0315,
    ContextExpired = 0x0009_0317,
    IncompleteCredentials = 0x0009_0320,
    Renegotiate = 0x0009_0321,
    NoLsaContext = 0x0009_0323,
}

impl SecurityStatus {
    /// Whether the provider expects another round trip with the peer.
    pub fn needs_more_data(self) -> bool {
        matches!(
            self,
            SecurityStatus::ContinueNeeded | SecurityStatus::CompleteAndContinue
        )
    }
}

/// The kind of a provider error. Values are the `SEC_E_*` codes so adapters can map raw statuses
/// with `ErrorKind::from_u32`.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum ErrorKind {
    Unknown = 0,
    InsufficientMemory = 0x8009_0300,
    InvalidHandle = 0x8009_0301,
    UnsupportedFunction = 0x8009_0302,
    TargetUnknown = 0x8009_0303,
    /// May correspond to any internal error (lock poisoning, I/O, provider contract violation).
    InternalError = 0x8009_0304,
    SecurityPackageNotFound = 0x8009_0305,
    NotOwned = 0x8009_0306,
    CannotInstall = 0x8009_0307,
    /// Supplied token is missing or malformed.
    InvalidToken = 0x8009_0308,
    CannotPack = 0x8009_0309,
    /// The requested quality of protection is not supported.
    QopNotSupported = 0x8009_030A,
    NoImpersonation = 0x8009_030B,
    LogonDenied = 0x8009_030C,
    UnknownCredentials = 0x8009_030D,
    NoCredentials = 0x8009_030E,
    MessageAltered = 0x8009_030F,
    OutOfSequence = 0x8009_0310,
    NoAuthenticatingAuthority = 0x8009_0311,
    BadPackageId = 0x8009_0316,
    ContextExpired = 0x8009_0317,
    IncompleteMessage = 0x8009_0318,
    IncompleteCredentials = 0x8009_0320,
    BufferTooSmall = 0x8009_0321,
    WrongPrincipalName = 0x8009_0322,
    TimeSkew = 0x8009_0324,
    UntrustedRoot = 0x8009_0325,
    IllegalMessage = 0x8009_0326,
    CertificateUnknown = 0x8009_0327,
    CertificateExpired = 0x8009_0328,
    EncryptFailure = 0x8009_0329,
    DecryptFailure = 0x8009_0330,
    AlgorithmMismatch = 0x8009_0331,
    SecurityQosFailed = 0x8009_0332,
    UnfinishedContextDeleted = 0x8009_0333,
    NoTgtReply = 0x8009_0334,
    NoIpAddress = 0x8009_0335,
    WrongCredentialHandle = 0x8009_0336,
    CryptoSystemInvalid = 0x8009_0337,
    MaxReferralsExceeded = 0x8009_0338,
    MustBeKdc = 0x8009_0339,
    StrongCryptoNotSupported = 0x8009_033A,
    TooManyPrincipals = 0x8009_033B,
    NoPaData = 0x8009_033C,
    PkInitNameMismatch = 0x8009_033D,
    SmartCardLogonRequired = 0x8009_033E,
    ShutdownInProgress = 0x8009_033F,
    KdcInvalidRequest = 0x8009_0340,
    KdcUnknownEType = 0x8009_0341,
    KdcUnknownEType2 = 0x8009_0342,
    UnsupportedPreAuth = 0x8009_0343,
    DelegationRequired = 0x8009_0345,
    BadBindings = 0x8009_0346,
    MultipleAccounts = 0x8009_0347,
    NoKerbKey = 0x8009_0348,
    CertWrongUsage = 0x8009_0349,
    DowngradeDetected = 0x8009_0350,
    SmartCardCertificateRevoked = 0x8009_0351,
    IssuingCAUntrusted = 0x8009_0352,
    RevocationOffline = 0x8009_0353,
    PkInitClientFailure = 0x8009_0354,
    SmartCardCertExpired = 0x8009_0355,
    NoS4uProtSupport = 0x8009_0356,
    CrossRealmDelegationFailure = 0x8009_0357,
    RevocationOfflineKdc = 0x8009_0358,
    IssuingCaUntrustedKdc = 0x8009_0359,
    KdcCertExpired = 0x8009_035A,
    KdcCertRevoked = 0x8009_035B,
    InvalidParameter = 0x8009_035D,
    DelegationPolicy = 0x8009_035E,
    PolicyNtlmOnly = 0x8009_035F,
    NoContext = 0x8009_0361,
    Pku2uCertFailure = 0x8009_0362,
    MutualAuthFailed = 0x8009_0363,
    OnlyHttpsAllowed = 0x8009_0365,
    ApplicationProtocolMismatch = 0x8009_0367,
}

/// Holds the [`ErrorKind`] and the description of the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub error_type: ErrorKind,
    pub description: String,
}

impl Error {
    /// Allows to fill a new error easily, supplying it with a coherent description.
    pub fn new(error_type: ErrorKind, description: impl ToString) -> Self {
        Self {
            error_type,
            description: description.to_string(),
        }
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.description)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::new(ErrorKind::InternalError, format!("IO error: {:?}", err))
    }
}

impl<T> From<sync::PoisonError<T>> for Error {
    fn from(_: sync::PoisonError<T>) -> Self {
        Self::new(ErrorKind::InternalError, "can not lock credential cache: mutex poisoned")
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        io::Error::other(format!("{:?}: {}", err.error_type, err.description))
    }
}
