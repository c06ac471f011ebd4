#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sspi_handshake::{
    AcceptContextRequest, AuthIdentity, ContextFlags, ContextResult, CredentialCache, CredentialUse,
    DecryptionFlags, EncryptionFlags, Error, ErrorKind, HandshakeSession, InitializeContextRequest, Result,
    SecurityPackageType, SecurityProvider, SecurityStatus, UnwrappedMessage,
};

pub const MAX_TOKEN_SIZE: usize = 128;
pub const TARGET_NAME: &str = "HTTP/www.example.com";

const NEGOTIATE: &[u8] = b"NEGOTIATE:";
const CHALLENGE: &[u8] = b"CHALLENGE";
const AUTHENTICATE: &[u8] = b"AUTHENTICATE:";
const MUTUAL: &[u8] = b"MUTUAL";
const COMPLETION_JUNK: &[u8] = b"COMPLETE";
const SESSION_KEY: u32 = 0x5A5A_A5A5;

pub fn init_test_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Handle bookkeeping shared by the test providers.
#[derive(Debug, Default)]
pub struct Ledger {
    next_handle: AtomicU32,
    freed_credentials: Mutex<Vec<u32>>,
    deleted_contexts: Mutex<Vec<u32>>,
    completions: AtomicUsize,
}

impl Ledger {
    fn next_handle(&self) -> u32 {
        self.next_handle.fetch_add(1, Ordering::SeqCst)
    }

    pub fn issued_handles(&self) -> u32 {
        self.next_handle.load(Ordering::SeqCst)
    }

    pub fn freed_credentials(&self) -> Vec<u32> {
        self.freed_credentials.lock().unwrap().clone()
    }

    pub fn deleted_contexts(&self) -> Vec<u32> {
        self.deleted_contexts.lock().unwrap().clone()
    }

    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopbackOptions {
    /// The server answers the last client token with a final token, Kerberos style.
    pub mutual: bool,
    /// The server refuses the client's credentials.
    pub reject_logon: bool,
    pub client_complete_needed: bool,
    pub server_complete_needed: bool,
    /// Package name reported once negotiation is done. Defaults to `NTLM`.
    pub negotiated: Option<String>,
}

#[derive(Debug)]
pub struct LoopbackContext {
    id: u32,
    round: u8,
    client_target: Option<String>,
    flags: ContextFlags,
}

/// A toy three- (or four-) leg protocol shaped like NTLM/Kerberos over Negotiate.
///
/// Client: `NEGOTIATE:<target>`, then `AUTHENTICATE:<channel binding data>`.
/// Server: `CHALLENGE`, then optionally `MUTUAL`.
#[derive(Debug, Default)]
pub struct LoopbackProvider {
    pub options: LoopbackOptions,
    pub ledger: Ledger,
}

impl LoopbackProvider {
    pub fn new(options: LoopbackOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            ledger: Ledger::default(),
        })
    }

    fn new_context<'a>(
        &self,
        context: &'a mut Option<LoopbackContext>,
        flags: ContextFlags,
    ) -> &'a mut LoopbackContext {
        context.get_or_insert_with(|| LoopbackContext {
            id: self.ledger.next_handle(),
            round: 0,
            client_target: None,
            flags,
        })
    }
}

fn invalid_token(expected: &[u8]) -> Error {
    Error::new(
        ErrorKind::InvalidToken,
        format!("expected {} message", String::from_utf8_lossy(expected)),
    )
}

fn checksum(data: &[u8]) -> [u8; 4] {
    let sum = data
        .iter()
        .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(u32::from(*b)));

    (sum ^ SESSION_KEY).to_be_bytes()
}

impl SecurityProvider for LoopbackProvider {
    type CredentialsHandle = u32;
    type ContextHandle = LoopbackContext;

    fn query_max_token_size(&self, package: &SecurityPackageType) -> Result<usize> {
        match package {
            SecurityPackageType::Other(name) => Err(Error::new(
                ErrorKind::SecurityPackageNotFound,
                format!("{name} is not installed"),
            )),
            _ => Ok(MAX_TOKEN_SIZE),
        }
    }

    fn acquire_default_credentials_handle(&self, _: &SecurityPackageType, _: CredentialUse) -> Result<u32> {
        Ok(self.ledger.next_handle())
    }

    fn acquire_credentials_handle(&self, _: &SecurityPackageType, _: CredentialUse, auth_data: &AuthIdentity) -> Result<u32> {
        if auth_data.username.is_empty() {
            return Err(Error::new(ErrorKind::UnknownCredentials, "username is empty"));
        }

        Ok(self.ledger.next_handle())
    }

    fn initialize_security_context(
        &self,
        _: &u32,
        context: &mut Option<LoopbackContext>,
        request: InitializeContextRequest<'_>,
        output: &mut Vec<u8>,
    ) -> Result<ContextResult> {
        let mutual = self.options.mutual;
        let complete_needed = self.options.client_complete_needed;
        let context = self.new_context(context, request.context_requirements & !ContextFlags::DELEGATE);
        context.round += 1;

        let status = match (context.round, request.input) {
            (1, None) => {
                output.extend_from_slice(NEGOTIATE);
                output.extend_from_slice(request.target_name.unwrap_or_default().as_bytes());

                SecurityStatus::ContinueNeeded
            }
            (2, Some(CHALLENGE)) => {
                output.extend_from_slice(AUTHENTICATE);
                if let Some(bindings) = request.channel_bindings {
                    output.extend_from_slice(&bindings.application_data);
                }

                match (mutual, complete_needed) {
                    (true, true) => SecurityStatus::CompleteAndContinue,
                    (true, false) => SecurityStatus::ContinueNeeded,
                    (false, true) => SecurityStatus::CompleteNeeded,
                    (false, false) => SecurityStatus::Ok,
                }
            }
            (3, Some(MUTUAL)) if mutual => SecurityStatus::Ok,
            (2, _) => return Err(invalid_token(CHALLENGE)),
            (3, _) if mutual => return Err(invalid_token(MUTUAL)),
            _ => return Err(Error::new(ErrorKind::OutOfSequence, "unexpected client round")),
        };

        Ok(ContextResult {
            status,
            flags: context.flags,
        })
    }

    fn accept_security_context(
        &self,
        _: &u32,
        context: &mut Option<LoopbackContext>,
        request: AcceptContextRequest<'_>,
        output: &mut Vec<u8>,
    ) -> Result<ContextResult> {
        let input = request.input.unwrap_or_default();

        if context.is_none() && !input.starts_with(NEGOTIATE) {
            return Err(invalid_token(NEGOTIATE));
        }

        let context = self.new_context(context, request.context_requirements);
        context.round += 1;

        let status = match context.round {
            1 => {
                context.client_target = Some(String::from_utf8_lossy(&input[NEGOTIATE.len()..]).into_owned());
                output.extend_from_slice(CHALLENGE);

                SecurityStatus::ContinueNeeded
            }
            2 => {
                let Some(application_data) = input.strip_prefix(AUTHENTICATE) else {
                    return Err(invalid_token(AUTHENTICATE));
                };

                if self.options.reject_logon {
                    return Err(Error::new(ErrorKind::LogonDenied, "the user name or password is incorrect"));
                }

                let expected = request
                    .channel_bindings
                    .map(|bindings| bindings.application_data.as_slice())
                    .unwrap_or_default();
                if application_data != expected {
                    return Err(Error::new(ErrorKind::BadBindings, "channel bindings do not match"));
                }

                if self.options.mutual {
                    output.extend_from_slice(MUTUAL);
                }

                if self.options.server_complete_needed {
                    SecurityStatus::CompleteNeeded
                } else {
                    SecurityStatus::Ok
                }
            }
            _ => return Err(Error::new(ErrorKind::OutOfSequence, "unexpected server round")),
        };

        Ok(ContextResult {
            status,
            flags: context.flags,
        })
    }

    fn complete_auth_token(&self, _: &mut LoopbackContext, _: &mut Vec<u8>) -> Result<SecurityStatus> {
        self.ledger.completions.fetch_add(1, Ordering::SeqCst);

        Ok(SecurityStatus::Ok)
    }

    fn query_negotiated_package(&self, context: &LoopbackContext) -> Result<String> {
        if context.round == 1 {
            // still choosing
            return Ok(String::from("Negotiate"));
        }

        Ok(self.options.negotiated.clone().unwrap_or_else(|| String::from("NTLM")))
    }

    fn query_client_target_name(&self, context: &LoopbackContext) -> Result<String> {
        context
            .client_target
            .clone()
            .ok_or_else(|| Error::new(ErrorKind::TargetUnknown, "client sent no target name"))
    }

    fn make_signature(&self, _: &mut LoopbackContext, data: &[u8]) -> Result<Vec<u8>> {
        Ok(checksum(data).to_vec())
    }

    fn verify_signature(&self, _: &mut LoopbackContext, data: &[u8], signature: &[u8]) -> Result<bool> {
        Ok(checksum(data).as_slice() == signature)
    }

    fn encrypt_message(&self, _: &mut LoopbackContext, flags: EncryptionFlags, data: &[u8]) -> Result<Vec<u8>> {
        let mut message = Vec::with_capacity(data.len() + 1);

        if flags.contains(EncryptionFlags::WRAP_NO_ENCRYPT) {
            message.push(0);
            message.extend_from_slice(data);
        } else {
            message.push(1);
            message.extend(data.iter().map(|b| b ^ 0x5A));
        }

        Ok(message)
    }

    fn decrypt_message(&self, _: &mut LoopbackContext, data: &[u8]) -> Result<UnwrappedMessage> {
        match data.split_first() {
            Some((0, data)) => Ok(UnwrappedMessage {
                data: data.to_vec(),
                flags: DecryptionFlags::SIGN_ONLY,
            }),
            Some((1, data)) => Ok(UnwrappedMessage {
                data: data.iter().map(|b| b ^ 0x5A).collect(),
                flags: DecryptionFlags::empty(),
            }),
            _ => Err(Error::new(ErrorKind::MessageAltered, "unknown message header")),
        }
    }

    fn free_credentials_handle(&self, credentials: u32) {
        self.ledger.freed_credentials.lock().unwrap().push(credentials);
    }

    fn delete_security_context(&self, context: LoopbackContext) {
        self.ledger.deleted_contexts.lock().unwrap().push(context.id);
    }
}

/// One canned answer of a [`ScriptedProvider`] context call.
#[derive(Debug, Clone)]
pub struct ScriptedStep {
    pub result: std::result::Result<SecurityStatus, ErrorKind>,
    pub output: Vec<u8>,
    pub creates_context: bool,
}

impl ScriptedStep {
    pub fn status(status: SecurityStatus, output: &[u8]) -> Self {
        Self {
            result: Ok(status),
            output: output.to_vec(),
            creates_context: true,
        }
    }

    pub fn error(kind: ErrorKind) -> Self {
        Self {
            result: Err(kind),
            output: Vec::new(),
            creates_context: true,
        }
    }

    /// Reports success without ever creating a context.
    pub fn without_context(status: SecurityStatus) -> Self {
        Self {
            result: Ok(status),
            output: Vec::new(),
            creates_context: false,
        }
    }
}

/// Replays a fixed sequence of context call results, for both roles.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedStep>>,
    inputs: Mutex<Vec<Option<Vec<u8>>>>,
    pub ledger: Ledger,
}

impl ScriptedProvider {
    pub fn new(script: impl IntoIterator<Item = ScriptedStep>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            inputs: Mutex::default(),
            ledger: Ledger::default(),
        })
    }

    /// Tokens the provider was called with, in order.
    pub fn inputs(&self) -> Vec<Option<Vec<u8>>> {
        self.inputs.lock().unwrap().clone()
    }

    fn play(&self, context: &mut Option<u32>, input: Option<&[u8]>, output: &mut Vec<u8>) -> Result<ContextResult> {
        self.inputs.lock().unwrap().push(input.map(<[u8]>::to_vec));

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::new(ErrorKind::InternalError, "script exhausted"))?;

        if step.creates_context && context.is_none() {
            *context = Some(self.ledger.next_handle());
        }

        let status = step
            .result
            .map_err(|kind| Error::new(kind, "scripted failure"))?;
        output.extend_from_slice(&step.output);

        Ok(ContextResult {
            status,
            flags: ContextFlags::INTEGRITY,
        })
    }
}

impl SecurityProvider for ScriptedProvider {
    type CredentialsHandle = u32;
    type ContextHandle = u32;

    fn query_max_token_size(&self, _: &SecurityPackageType) -> Result<usize> {
        Ok(MAX_TOKEN_SIZE)
    }

    fn acquire_default_credentials_handle(&self, _: &SecurityPackageType, _: CredentialUse) -> Result<u32> {
        Ok(self.ledger.next_handle())
    }

    fn acquire_credentials_handle(&self, _: &SecurityPackageType, _: CredentialUse, _: &AuthIdentity) -> Result<u32> {
        Ok(self.ledger.next_handle())
    }

    fn initialize_security_context(
        &self,
        _: &u32,
        context: &mut Option<u32>,
        request: InitializeContextRequest<'_>,
        output: &mut Vec<u8>,
    ) -> Result<ContextResult> {
        self.play(context, request.input, output)
    }

    fn accept_security_context(
        &self,
        _: &u32,
        context: &mut Option<u32>,
        request: AcceptContextRequest<'_>,
        output: &mut Vec<u8>,
    ) -> Result<ContextResult> {
        self.play(context, request.input, output)
    }

    fn complete_auth_token(&self, _: &mut u32, output: &mut Vec<u8>) -> Result<SecurityStatus> {
        self.ledger.completions.fetch_add(1, Ordering::SeqCst);
        output.extend_from_slice(COMPLETION_JUNK);

        Ok(SecurityStatus::Ok)
    }

    fn query_negotiated_package(&self, _: &u32) -> Result<String> {
        Err(Error::new(ErrorKind::UnsupportedFunction, "not scripted"))
    }

    fn query_client_target_name(&self, _: &u32) -> Result<String> {
        Ok(TARGET_NAME.to_owned())
    }

    fn make_signature(&self, _: &mut u32, _: &[u8]) -> Result<Vec<u8>> {
        Err(Error::new(ErrorKind::UnsupportedFunction, "not scripted"))
    }

    fn verify_signature(&self, _: &mut u32, _: &[u8], _: &[u8]) -> Result<bool> {
        Err(Error::new(ErrorKind::UnsupportedFunction, "not scripted"))
    }

    fn encrypt_message(&self, _: &mut u32, _: EncryptionFlags, _: &[u8]) -> Result<Vec<u8>> {
        Err(Error::new(ErrorKind::UnsupportedFunction, "not scripted"))
    }

    fn decrypt_message(&self, _: &mut u32, _: &[u8]) -> Result<UnwrappedMessage> {
        Err(Error::new(ErrorKind::UnsupportedFunction, "not scripted"))
    }

    fn free_credentials_handle(&self, credentials: u32) {
        self.ledger.freed_credentials.lock().unwrap().push(credentials);
    }

    fn delete_security_context(&self, context: u32) {
        self.ledger.deleted_contexts.lock().unwrap().push(context);
    }
}

pub fn client<P: SecurityProvider>(provider: &Arc<P>, cache: &Arc<CredentialCache<P>>) -> HandshakeSession<P> {
    HandshakeSession::builder(Arc::clone(provider), Arc::clone(cache))
        .client()
        .with_package(SecurityPackageType::Negotiate)
        .with_target_name(TARGET_NAME)
        .with_context_requirements(ContextFlags::MUTUAL_AUTH | ContextFlags::INTEGRITY | ContextFlags::CONFIDENTIALITY)
        .execute()
        .unwrap()
}

pub fn server<P: SecurityProvider>(provider: &Arc<P>, cache: &Arc<CredentialCache<P>>) -> HandshakeSession<P> {
    HandshakeSession::builder(Arc::clone(provider), Arc::clone(cache))
        .server()
        .with_package(SecurityPackageType::Negotiate)
        .with_context_requirements(ContextFlags::INTEGRITY | ContextFlags::CONFIDENTIALITY)
        .execute()
        .unwrap()
}

/// Drives both sessions until each reports completion. Panics on protocol errors.
pub fn run_handshake<P: SecurityProvider>(client: &mut HandshakeSession<P>, server: &mut HandshakeSession<P>) {
    let mut to_server = client.exchange_token(None).unwrap();

    for _ in 0..5 {
        if !server.is_completed() {
            let to_client = server.exchange_token(to_server.as_deref()).unwrap();

            if !client.is_completed() {
                to_server = client.exchange_token(to_client.as_deref()).unwrap();
            }
        }

        if client.is_completed() && server.is_completed() {
            return;
        }
    }

    panic!("handshake should not exceed 5 round trips");
}
