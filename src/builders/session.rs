use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use super::{Assigned, NotAssigned, ToAssign};
use crate::{
    ChannelBindings, ContextFlags, CredentialCache, CredentialSource, HandshakeError, HandshakeSession, Role,
    SecurityPackageType, SecurityProvider,
};

pub type EmptyHandshakeSessionBuilder<P> = HandshakeSessionBuilder<P, WithoutRole, WithoutPackage>;
pub type FilledHandshakeSessionBuilder<P> = HandshakeSessionBuilder<P, WithRole, WithPackage>;

/// A builder that creates a [`HandshakeSession`]. Returned by [`HandshakeSession::builder`].
///
/// # Requirements for execution
///
/// These methods are required to be called before calling the `execute` method
/// * [`client`](HandshakeSessionBuilder::client) or [`server`](HandshakeSessionBuilder::server)
/// * [`with_package`](HandshakeSessionBuilder::with_package)
pub struct HandshakeSessionBuilder<P, RoleSet, PackageSet>
where
    P: SecurityProvider,
    RoleSet: ToAssign,
    PackageSet: ToAssign,
{
    phantom_role_set: PhantomData<RoleSet>,
    phantom_package_set: PhantomData<PackageSet>,

    pub(crate) provider: Arc<P>,
    pub(crate) cache: Arc<CredentialCache<P>>,

    pub role: Role,
    pub package: SecurityPackageType,
    pub credentials: CredentialSource,
    pub target_name: Option<String>,
    pub context_requirements: ContextFlags,
    pub channel_bindings: Option<ChannelBindings>,
}

impl<P: SecurityProvider> EmptyHandshakeSessionBuilder<P> {
    pub(crate) fn new(provider: Arc<P>, cache: Arc<CredentialCache<P>>) -> Self {
        Self {
            phantom_role_set: PhantomData,
            phantom_package_set: PhantomData,

            provider,
            cache,

            role: Role::Client,
            package: SecurityPackageType::Negotiate,
            credentials: CredentialSource::Default,
            target_name: None,
            context_requirements: ContextFlags::empty(),
            channel_bindings: None,
        }
    }
}

impl<P, RoleSet, PackageSet> HandshakeSessionBuilder<P, RoleSet, PackageSet>
where
    P: SecurityProvider,
    RoleSet: ToAssign,
    PackageSet: ToAssign,
{
    fn transform<NewRoleSet: ToAssign, NewPackageSet: ToAssign>(
        self,
    ) -> HandshakeSessionBuilder<P, NewRoleSet, NewPackageSet> {
        HandshakeSessionBuilder {
            phantom_role_set: PhantomData,
            phantom_package_set: PhantomData,

            provider: self.provider,
            cache: self.cache,

            role: self.role,
            package: self.package,
            credentials: self.credentials,
            target_name: self.target_name,
            context_requirements: self.context_requirements,
            channel_bindings: self.channel_bindings,
        }
    }

    /// The session initiates the handshake and calls `initialize_security_context`.
    pub fn client(self) -> HandshakeSessionBuilder<P, WithRole, PackageSet> {
        HandshakeSessionBuilder {
            role: Role::Client,
            ..self.transform()
        }
    }

    /// The session answers the handshake and calls `accept_security_context`.
    pub fn server(self) -> HandshakeSessionBuilder<P, WithRole, PackageSet> {
        HandshakeSessionBuilder {
            role: Role::Server,
            ..self.transform()
        }
    }

    /// Specifies the security package to negotiate with, e.g. `Negotiate` or `NTLM`.
    pub fn with_package(
        self,
        package: impl Into<SecurityPackageType>,
    ) -> HandshakeSessionBuilder<P, RoleSet, WithPackage> {
        HandshakeSessionBuilder {
            package: package.into(),
            ..self.transform()
        }
    }

    /// Specifies where the credentials come from. Defaults to the ambient identity.
    pub fn with_credentials(self, credentials: impl Into<CredentialSource>) -> Self {
        Self {
            credentials: credentials.into(),
            ..self
        }
    }

    /// Specifies the service principal name of the target. Only meaningful for clients.
    pub fn with_target_name(self, target_name: impl Into<String>) -> Self {
        Self {
            target_name: Some(target_name.into()),
            ..self
        }
    }

    /// Specifies bit flags that indicate requests for the context. Not all packages can support all requirements.
    pub fn with_context_requirements(self, context_requirements: ContextFlags) -> Self {
        Self {
            context_requirements,
            ..self
        }
    }

    pub fn with_channel_bindings(self, channel_bindings: ChannelBindings) -> Self {
        Self {
            channel_bindings: Some(channel_bindings),
            ..self
        }
    }
}

impl<P: SecurityProvider> FilledHandshakeSessionBuilder<P> {
    /// Resolves the token size and the credentials handle, and creates the session.
    pub fn execute(self) -> Result<HandshakeSession<P>, HandshakeError> {
        HandshakeSession::new(self)
    }
}

impl<P, RoleSet, PackageSet> fmt::Debug for HandshakeSessionBuilder<P, RoleSet, PackageSet>
where
    P: SecurityProvider,
    RoleSet: ToAssign,
    PackageSet: ToAssign,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakeSessionBuilder")
            .field("role", &self.role)
            .field("package", &self.package)
            .field("credentials", &self.credentials)
            .field("target_name", &self.target_name)
            .field("context_requirements", &self.context_requirements)
            .field("channel_bindings", &self.channel_bindings)
            .finish()
    }
}

/// Simulates the presence of the role of the `HandshakeSessionBuilder`.
#[derive(Debug)]
pub struct WithRole;
impl ToAssign for WithRole {}
impl Assigned for WithRole {}

/// Simulates the absence of the role of the `HandshakeSessionBuilder`.
#[derive(Debug)]
pub struct WithoutRole;
impl ToAssign for WithoutRole {}
impl NotAssigned for WithoutRole {}

/// Simulates the presence of the package of the `HandshakeSessionBuilder`.
#[derive(Debug)]
pub struct WithPackage;
impl ToAssign for WithPackage {}
impl Assigned for WithPackage {}

/// Simulates the absence of the package of the `HandshakeSessionBuilder`.
#[derive(Debug)]
pub struct WithoutPackage;
impl ToAssign for WithoutPackage {}
impl NotAssigned for WithoutPackage {}
