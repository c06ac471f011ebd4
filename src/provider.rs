//! The boundary between a handshake session and the platform security machinery.
//!
//! A [`SecurityProvider`] wraps whatever actually creates and validates tokens: SSPI on Windows,
//! a GSSAPI binding elsewhere, or a scripted double in tests. The session only orchestrates calls
//! into it and never inspects token contents.

use std::fmt::Debug;

use crate::{
    AuthIdentity, ChannelBindings, ContextFlags, CredentialUse, DecryptionFlags, EncryptionFlags, Result,
    SecurityPackageType, SecurityStatus,
};

/// Input of a single `initialize_security_context` call.
#[derive(Debug, Clone, Copy)]
pub struct InitializeContextRequest<'a> {
    pub target_name: Option<&'a str>,
    pub context_requirements: ContextFlags,
    pub channel_bindings: Option<&'a ChannelBindings>,
    /// Token received from the acceptor, `None` on the first call.
    pub input: Option<&'a [u8]>,
}

/// Input of a single `accept_security_context` call.
#[derive(Debug, Clone, Copy)]
pub struct AcceptContextRequest<'a> {
    pub context_requirements: ContextFlags,
    pub channel_bindings: Option<&'a ChannelBindings>,
    pub input: Option<&'a [u8]>,
}

/// Contains data returned by a successful context call. Failures are reported as `Err` and always
/// leave the context unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextResult {
    pub status: SecurityStatus,
    pub flags: ContextFlags,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwrappedMessage {
    pub data: Vec<u8>,
    pub flags: DecryptionFlags,
}

impl UnwrappedMessage {
    pub fn is_encrypted(&self) -> bool {
        !self.flags.contains(DecryptionFlags::SIGN_ONLY)
    }
}

/// Context-establishment primitives of a security package.
///
/// Every method is a synchronous, potentially expensive call. Handles are plain values owned by
/// the caller and released through [`free_credentials_handle`](SecurityProvider::free_credentials_handle)
/// and [`delete_security_context`](SecurityProvider::delete_security_context).
pub trait SecurityProvider: Send + Sync {
    type CredentialsHandle: Debug + Send + Sync;
    type ContextHandle: Debug + Send;

    /// Upper bound of a token produced by the package. Fails with `SecurityPackageNotFound`
    /// for unknown packages.
    fn query_max_token_size(&self, package: &SecurityPackageType) -> Result<usize>;

    fn acquire_default_credentials_handle(
        &self,
        package: &SecurityPackageType,
        credential_use: CredentialUse,
    ) -> Result<Self::CredentialsHandle>;

    fn acquire_credentials_handle(
        &self,
        package: &SecurityPackageType,
        credential_use: CredentialUse,
        auth_data: &AuthIdentity,
    ) -> Result<Self::CredentialsHandle>;

    /// Creates the context on the first call (when `context` is `None`) and advances it on
    /// subsequent ones. The produced token is appended to `output`.
    fn initialize_security_context(
        &self,
        credentials: &Self::CredentialsHandle,
        context: &mut Option<Self::ContextHandle>,
        request: InitializeContextRequest<'_>,
        output: &mut Vec<u8>,
    ) -> Result<ContextResult>;

    fn accept_security_context(
        &self,
        credentials: &Self::CredentialsHandle,
        context: &mut Option<Self::ContextHandle>,
        request: AcceptContextRequest<'_>,
        output: &mut Vec<u8>,
    ) -> Result<ContextResult>;

    fn complete_auth_token(&self, context: &mut Self::ContextHandle, token: &mut Vec<u8>) -> Result<SecurityStatus>;

    /// Name of the package the context actually negotiated, e.g. `Kerberos` under `Negotiate`.
    fn query_negotiated_package(&self, context: &Self::ContextHandle) -> Result<String>;

    /// Target name the client asked for, as seen by the acceptor.
    fn query_client_target_name(&self, context: &Self::ContextHandle) -> Result<String>;

    fn make_signature(&self, context: &mut Self::ContextHandle, data: &[u8]) -> Result<Vec<u8>>;

    fn verify_signature(&self, context: &mut Self::ContextHandle, data: &[u8], signature: &[u8]) -> Result<bool>;

    fn encrypt_message(
        &self,
        context: &mut Self::ContextHandle,
        flags: EncryptionFlags,
        data: &[u8],
    ) -> Result<Vec<u8>>;

    fn decrypt_message(&self, context: &mut Self::ContextHandle, data: &[u8]) -> Result<UnwrappedMessage>;

    fn free_credentials_handle(&self, credentials: Self::CredentialsHandle);

    fn delete_security_context(&self, context: Self::ContextHandle);
}
