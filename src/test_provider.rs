//! In-memory provider for unit tests. Every context call succeeds after a fixed number of rounds.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::{
    AcceptContextRequest, AuthIdentity, ContextFlags, ContextResult, CredentialUse, DecryptionFlags,
    EncryptionFlags, Error, ErrorKind, InitializeContextRequest, Result, SecurityPackageType, SecurityProvider,
    SecurityStatus, UnwrappedMessage,
};

pub(crate) const MAX_TOKEN_SIZE: usize = 64;

#[derive(Debug, Default)]
pub(crate) struct CountingProvider {
    next_handle: AtomicU32,
    freed_credentials: Mutex<Vec<u32>>,
    deleted_contexts: Mutex<Vec<u32>>,
}

impl CountingProvider {
    pub(crate) fn freed_credentials(&self) -> Vec<u32> {
        self.freed_credentials.lock().unwrap().clone()
    }

    pub(crate) fn deleted_contexts(&self) -> Vec<u32> {
        self.deleted_contexts.lock().unwrap().clone()
    }

    fn step(&self, context: &mut Option<u32>, input: Option<&[u8]>, output: &mut Vec<u8>) -> Result<ContextResult> {
        if input == Some(b"reject".as_slice()) {
            return Err(Error::new(ErrorKind::LogonDenied, "rejected"));
        }

        let rounds = context.get_or_insert_with(|| 0);
        *rounds += 1;
        output.extend_from_slice(&[*rounds as u8; 4]);

        Ok(ContextResult {
            status: if *rounds >= 2 {
                SecurityStatus::Ok
            } else {
                SecurityStatus::ContinueNeeded
            },
            flags: ContextFlags::MUTUAL_AUTH | ContextFlags::INTEGRITY,
        })
    }
}

impl SecurityProvider for CountingProvider {
    type CredentialsHandle = u32;
    type ContextHandle = u32;

    fn query_max_token_size(&self, package: &SecurityPackageType) -> Result<usize> {
        match package {
            SecurityPackageType::Other(name) => Err(Error::new(ErrorKind::SecurityPackageNotFound, name)),
            _ => Ok(MAX_TOKEN_SIZE),
        }
    }

    fn acquire_default_credentials_handle(&self, _: &SecurityPackageType, _: CredentialUse) -> Result<u32> {
        Ok(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    fn acquire_credentials_handle(
        &self,
        _: &SecurityPackageType,
        _: CredentialUse,
        auth_data: &AuthIdentity,
    ) -> Result<u32> {
        if auth_data.password.is_empty() {
            return Err(Error::new(ErrorKind::LogonDenied, "empty password"));
        }

        Ok(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    fn initialize_security_context(
        &self,
        _: &u32,
        context: &mut Option<u32>,
        request: InitializeContextRequest<'_>,
        output: &mut Vec<u8>,
    ) -> Result<ContextResult> {
        self.step(context, request.input, output)
    }

    fn accept_security_context(
        &self,
        _: &u32,
        context: &mut Option<u32>,
        request: AcceptContextRequest<'_>,
        output: &mut Vec<u8>,
    ) -> Result<ContextResult> {
        self.step(context, request.input, output)
    }

    fn complete_auth_token(&self, _: &mut u32, _: &mut Vec<u8>) -> Result<SecurityStatus> {
        Ok(SecurityStatus::Ok)
    }

    fn query_negotiated_package(&self, _: &u32) -> Result<String> {
        Ok(String::from("Kerberos"))
    }

    fn query_client_target_name(&self, _: &u32) -> Result<String> {
        Ok(String::from("HTTP/www.example.com"))
    }

    fn make_signature(&self, _: &mut u32, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.iter().rev().copied().collect())
    }

    fn verify_signature(&self, _: &mut u32, data: &[u8], signature: &[u8]) -> Result<bool> {
        Ok(data.iter().rev().eq(signature.iter()))
    }

    fn encrypt_message(&self, _: &mut u32, _: EncryptionFlags, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decrypt_message(&self, _: &mut u32, data: &[u8]) -> Result<UnwrappedMessage> {
        Ok(UnwrappedMessage {
            data: data.to_vec(),
            flags: DecryptionFlags::SIGN_ONLY,
        })
    }

    fn free_credentials_handle(&self, credentials: u32) {
        self.freed_credentials.lock().unwrap().push(credentials);
    }

    fn delete_security_context(&self, context: u32) {
        self.deleted_contexts.lock().unwrap().push(context);
    }
}
