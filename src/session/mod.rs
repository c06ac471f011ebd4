
use std::fmt;
use std::sync::Arc;

use crate::builders::{EmptyHandshakeSessionBuilder, FilledHandshakeSessionBuilder, HandshakeSessionBuilder};
use crate::{
    token, AcceptContextRequest, ChannelBindings, ContextFlags, ContextResult, CredentialCache, CredentialKey,
    CredentialSource, CredentialUse, EncryptionFlags, Error, ErrorKind, HandshakeError, InitializeContextRequest,
    Result, SafeContextHandle, SafeCredentialsHandle, SecurityPackageType, SecurityProvider, SecurityStatus,
    UnwrappedMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn credential_use(self) -> CredentialUse {
        match self {
            Role::Client => CredentialUse::Outbound,
            Role::Server => CredentialUse::Inbound,
        }
    }
}

/// One authentication attempt against a peer.
///
/// Feed every token received from the peer into [`exchange_token`](Self::exchange_token) and send
/// back whatever it returns, until the session reports completion or returns an error. A session
/// is single-use: once completed (successfully or not) it only serves post-handshake queries.
///
/// The session is not synchronized. Callers serialize their own round trips.
pub struct HandshakeSession<P: SecurityProvider> {
    provider: Arc<P>,
    cache: Arc<CredentialCache<P>>,

    role: Role,
    package: SecurityPackageType,
    target_name: Option<String>,
    requested_flags: ContextFlags,
    negotiated_flags: ContextFlags,
    channel_bindings: Option<ChannelBindings>,
    max_token_size: usize,

    credentials_key: CredentialKey,
    // the session's own reference, given up during the first exchange
    credentials: Option<SafeCredentialsHandle<P>>,
    context: Option<SafeContextHandle<P>>,

    status: Option<SecurityStatus>,
    completed: bool,
    faulted: bool,

    protocol_name: Option<String>,
    client_target_name: Option<String>,
}

impl<P: SecurityProvider> HandshakeSession<P> {
    pub fn builder(provider: Arc<P>, cache: Arc<CredentialCache<P>>) -> EmptyHandshakeSessionBuilder<P> {
        HandshakeSessionBuilder::new(provider, cache)
    }

    #[instrument(level = "debug", skip_all, fields(role = ?builder.role, package = %builder.package))]
    pub(crate) fn new(builder: FilledHandshakeSessionBuilder<P>) -> std::result::Result<Self, HandshakeError> {
        let HandshakeSessionBuilder {
            provider,
            cache,
            role,
            package,
            credentials,
            target_name,
            context_requirements,
            channel_bindings,
            ..
        } = builder;

        let max_token_size = provider
            .query_max_token_size(&package)
            .map_err(HandshakeError::CredentialAcquisition)?;

        let credential_use = role.credential_use();
        let (credentials_key, credentials) = match &credentials {
            CredentialSource::Default => {
                let key = CredentialKey::ambient(package.clone(), credential_use);
                let cached = cache.get(&key).unwrap_or_else(|err| {
                    warn!(%err, "Credential cache lookup failed");
                    None
                });

                let handle = match cached {
                    Some(handle) => {
                        debug!("Reusing cached credentials handle");
                        handle
                    }
                    None => {
                        let handle = provider
                            .acquire_default_credentials_handle(&package, credential_use)
                            .map_err(HandshakeError::CredentialAcquisition)?;
                        SafeCredentialsHandle::new(Arc::clone(&provider), handle)
                    }
                };

                (key, handle)
            }
            CredentialSource::Explicit(identity) => {
                let handle = provider
                    .acquire_credentials_handle(&package, credential_use, identity)
                    .map_err(HandshakeError::CredentialAcquisition)?;

                (
                    CredentialKey::explicit(package.clone(), credential_use, identity),
                    SafeCredentialsHandle::new(Arc::clone(&provider), handle),
                )
            }
        };

        debug!(max_token_size, "Handshake session created");

        Ok(Self {
            provider,
            cache,

            role,
            package,
            target_name,
            requested_flags: context_requirements,
            negotiated_flags: ContextFlags::empty(),
            channel_bindings,
            max_token_size,

            credentials_key,
            credentials: Some(credentials),
            context: None,

            status: None,
            completed: false,
            faulted: false,

            protocol_name: None,
            client_target_name: None,
        })
    }

    /// Runs one round of the handshake.
    ///
    /// `incoming` is the last token received from the peer, `None` for the first client call.
    /// Returns the token to send to the peer, or `None` when there is nothing to send. Keep calling
    /// until [`is_completed`](Self::is_completed) is `true`.
    ///
    /// An absent or empty `incoming` token on an existing context means the peer has nothing more
    /// to say, and the session completes without calling the provider.
    ///
    /// On error the security context is deleted and the session is finished.
    ///
    /// # Panics
    ///
    /// If the session is already completed.
    #[instrument(
        level = "debug",
        skip_all,
        fields(role = ?self.role, package = %self.package, input_len = incoming.map(<[u8]>::len))
    )]
    pub fn exchange_token(&mut self, incoming: Option<&[u8]>) -> std::result::Result<Option<Vec<u8>>, HandshakeError> {
        assert!(!self.completed, "exchange_token called on a completed handshake session");

        let incoming = incoming.filter(|token| !token.is_empty());

        if incoming.is_none() && self.is_valid_context() {
            debug!("No further negotiation data from the peer");
            self.status = Some(SecurityStatus::Ok);
            self.completed = true;

            return Ok(None);
        }

        // Some only on the first exchange. Whatever happens below, the session's own reference
        // does not outlive this call: it either moves into the cache or is dropped here.
        let first_call_credentials = self.credentials.take();

        let context = self
            .context
            .get_or_insert_with(|| SafeContextHandle::new(Arc::clone(&self.provider)));
        if let Some(credentials) = &first_call_credentials {
            context.retain_credentials(credentials.clone());
        }

        let request = InitializeContextRequest {
            target_name: self.target_name.as_deref(),
            context_requirements: self.requested_flags,
            channel_bindings: self.channel_bindings.as_ref(),
            input: incoming,
        };
        let mut output = Vec::with_capacity(self.max_token_size);

        let result = step(self.provider.as_ref(), self.role, context, request, &mut output).and_then(|result| {
            if context.is_valid() {
                Ok(result)
            } else {
                Err(Error::new(
                    ErrorKind::InternalError,
                    "provider reported success without creating a security context",
                ))
            }
        });

        let ContextResult { status, flags } = match result {
            Ok(result) => result,
            Err(err) => {
                debug!(%err, "Security context call failed, deleting the context");

                context.delete();
                self.negotiated_flags = ContextFlags::empty();
                self.status = None;
                self.completed = true;
                self.faulted = true;

                return Err(HandshakeError::authentication(err));
            }
        };

        if let Some(credentials) = first_call_credentials {
            if let Err(err) = self.cache.insert(self.credentials_key.clone(), credentials) {
                warn!(%err, "Failed to cache credentials handle");
            }
        }

        self.negotiated_flags = flags;
        self.status = Some(status);
        self.completed = match status {
            SecurityStatus::Ok => true,
            // the server side never runs the completion step; the handshake is done
            SecurityStatus::CompleteNeeded => self.role == Role::Server,
            _ => false,
        };

        debug!(?status, completed = self.completed, output_len = output.len());

        if output.is_empty() {
            Ok(None)
        } else {
            output.shrink_to_fit();
            Ok(Some(output))
        }
    }

    /// [`exchange_token`](Self::exchange_token) over base64 text tokens.
    ///
    /// A malformed incoming token is reported as [`HandshakeError::MalformedToken`] and leaves the
    /// session untouched.
    ///
    /// # Panics
    ///
    /// If the session is already completed.
    pub fn exchange_token_base64(
        &mut self,
        incoming: Option<&str>,
    ) -> std::result::Result<Option<String>, HandshakeError> {
        let incoming = token::decode_incoming(incoming)?;
        let outgoing = self.exchange_token(incoming.as_deref())?;

        Ok(token::encode_outgoing(outgoing.as_deref()))
    }

    /// Name of the package the provider actually negotiated.
    ///
    /// `None` without a live context. Before completion the provider is asked on every call, since
    /// the selection may still change; after completion the answer is cached.
    pub fn negotiated_protocol_name(&mut self) -> Option<String> {
        if let Some(name) = &self.protocol_name {
            return Some(name.clone());
        }

        let context = self.context.as_ref()?.as_raw()?;

        match self.provider.query_negotiated_package(context) {
            Ok(name) => {
                if self.completed {
                    self.protocol_name = Some(name.clone());
                }

                Some(name)
            }
            Err(err) => {
                warn!(%err, "Failed to query the negotiated package");

                None
            }
        }
    }

    /// Package names are compared ASCII case-insensitively.
    pub fn is_using_protocol(&mut self, name: &str) -> bool {
        self.negotiated_protocol_name()
            .is_some_and(|negotiated| negotiated.eq_ignore_ascii_case(name))
    }

    /// Target name the client authenticated to, as seen by this side.
    ///
    /// # Panics
    ///
    /// If the handshake has not completed successfully.
    pub fn client_target_name(&mut self) -> Result<String> {
        assert!(
            self.completed && self.is_valid_context(),
            "client target name is only available once the handshake has completed successfully"
        );

        if let Some(name) = &self.client_target_name {
            return Ok(name.clone());
        }

        let context = self
            .context
            .as_ref()
            .and_then(SafeContextHandle::as_raw)
            .ok_or_else(|| Error::new(ErrorKind::InvalidHandle, "security context has been deleted"))?;

        let name = self.provider.query_client_target_name(context)?;
        self.client_target_name = Some(name.clone());

        Ok(name)
    }

    #[instrument(level = "trace", skip_all, fields(data_len = data.len()))]
    pub fn sign(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let provider = Arc::clone(&self.provider);

        provider.make_signature(self.established_context_mut()?, data)
    }

    /// `Ok(false)` means the data or the signature was tampered with.
    #[instrument(level = "trace", skip_all, fields(data_len = data.len()))]
    pub fn verify(&mut self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let provider = Arc::clone(&self.provider);

        provider.verify_signature(self.established_context_mut()?, data, signature)
    }

    /// Protects a message for the peer. Without `encrypt` the message is only signed.
    #[instrument(level = "trace", skip_all, fields(data_len = data.len(), encrypt))]
    pub fn wrap(&mut self, data: &[u8], encrypt: bool) -> Result<Vec<u8>> {
        let provider = Arc::clone(&self.provider);
        let flags = if encrypt {
            EncryptionFlags::empty()
        } else {
            EncryptionFlags::WRAP_NO_ENCRYPT
        };

        provider.encrypt_message(self.established_context_mut()?, flags, data)
    }

    #[instrument(level = "trace", skip_all, fields(data_len = data.len()))]
    pub fn unwrap(&mut self, data: &[u8]) -> Result<UnwrappedMessage> {
        let provider = Arc::clone(&self.provider);

        provider.decrypt_message(self.established_context_mut()?, data)
    }

    /// The established acceptor context, for handing off to code that impersonates the client.
    ///
    /// # Panics
    ///
    /// If called on a client session or before the handshake has completed.
    pub fn server_context_handle(&self) -> Result<&P::ContextHandle> {
        assert_eq!(self.role, Role::Server, "server context handle requested on a client session");
        assert!(self.completed, "server context handle requested before the handshake completed");

        self.context
            .as_ref()
            .and_then(SafeContextHandle::as_raw)
            .ok_or_else(|| Error::new(ErrorKind::InvalidHandle, "security context has been deleted"))
    }

    fn established_context_mut(&mut self) -> Result<&mut P::ContextHandle> {
        let completed = self.completed;
        let faulted = self.faulted;

        match self.context.as_mut().and_then(SafeContextHandle::as_raw_mut) {
            Some(context) if completed => Ok(context),
            Some(_) => Err(Error::new(ErrorKind::NoContext, "handshake has not completed yet")),
            None if faulted => Err(Error::new(ErrorKind::InvalidHandle, "security context has been deleted")),
            None => Err(Error::new(ErrorKind::NoContext, "no security context has been established")),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn package(&self) -> &SecurityPackageType {
        &self.package
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target_name.as_deref()
    }

    pub fn requested_flags(&self) -> ContextFlags {
        self.requested_flags
    }

    /// Only meaningful after a successful exchange.
    pub fn negotiated_flags(&self) -> ContextFlags {
        self.negotiated_flags
    }

    pub fn max_token_size(&self) -> usize {
        self.max_token_size
    }

    /// Status of the last successful exchange.
    pub fn status(&self) -> Option<SecurityStatus> {
        self.status
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Completed because the provider failed; the context is gone.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn is_valid_context(&self) -> bool {
        self.context.as_ref().is_some_and(SafeContextHandle::is_valid)
    }

    pub fn is_signed(&self) -> bool {
        self.is_established()
            && self
                .negotiated_flags
                .intersects(ContextFlags::INTEGRITY | ContextFlags::CONFIDENTIALITY)
    }

    pub fn is_encrypted(&self) -> bool {
        self.is_established() && self.negotiated_flags.contains(ContextFlags::CONFIDENTIALITY)
    }

    pub fn is_mutually_authenticated(&self) -> bool {
        self.is_established() && self.negotiated_flags.contains(ContextFlags::MUTUAL_AUTH)
    }

    fn is_established(&self) -> bool {
        self.completed && !self.faulted
    }
}

/// One provider call for the given role, including the client-side completion step.
fn step<P: SecurityProvider>(
    provider: &P,
    role: Role,
    context: &mut SafeContextHandle<P>,
    request: InitializeContextRequest<'_>,
    output: &mut Vec<u8>,
) -> Result<ContextResult> {
    let (credentials, raw_context) = context.parts_mut();
    let credentials = credentials
        .ok_or_else(|| Error::new(ErrorKind::InvalidHandle, "security context has no credentials handle"))?
        .as_raw()?;

    match role {
        Role::Client => {
            let result = provider.initialize_security_context(credentials, raw_context, request, output)?;

            match result.status {
                SecurityStatus::CompleteNeeded | SecurityStatus::CompleteAndContinue => {
                    let raw_context = raw_context.as_mut().ok_or_else(|| {
                        Error::new(ErrorKind::InternalError, "completion requested without a security context")
                    })?;
                    let completion_status = provider.complete_auth_token(raw_context, output)?;
                    debug!(?completion_status, "Completed the authentication token");

                    if result.status == SecurityStatus::CompleteNeeded {
                        // nothing produced by the completion step goes to the peer
                        output.clear();

                        Ok(ContextResult {
                            status: completion_status,
                            ..result
                        })
                    } else {
                        Ok(ContextResult {
                            status: SecurityStatus::ContinueNeeded,
                            ..result
                        })
                    }
                }
                _ => Ok(result),
            }
        }
        Role::Server => provider.accept_security_context(
            credentials,
            raw_context,
            AcceptContextRequest {
                context_requirements: request.context_requirements,
                channel_bindings: request.channel_bindings,
                input: request.input,
            },
            output,
        ),
    }
}

impl<P: SecurityProvider> fmt::Debug for HandshakeSession<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeSession")
            .field("role", &self.role)
            .field("package", &self.package)
            .field("target_name", &self.target_name)
            .field("requested_flags", &self.requested_flags)
            .field("negotiated_flags", &self.negotiated_flags)
            .field("context", &self.context)
            .field("status", &self.status)
            .field("completed", &self.completed)
            .field("faulted", &self.faulted)
            .finish_non_exhaustive()
    }
}
