use serde::{Deserialize, Serialize};

use crate::Secret;

/// Allows you to pass a particular user name and password to the provider for the purpose of authentication
///
/// # MSDN
///
/// * [SEC_WINNT_AUTH_IDENTITY_W structure](https://docs.microsoft.com/en-us/windows/win32/api/sspi/ns-sspi-sec_winnt_auth_identity_w)
#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct AuthIdentity {
    pub username: String,
    pub password: Secret<String>,
    pub domain: Option<String>,
}

impl AuthIdentity {
    /// Builds an identity from a logon name in either `user@DOMAIN` or `DOMAIN\user` form.
    pub fn from_logon_name(logon_name: &str, password: impl Into<Secret<String>>) -> Self {
        let (username, domain) = if let Some((user, domain)) = logon_name.split_once('@') {
            (user, Some(domain))
        } else if let Some((domain, user)) = logon_name.split_once('\\') {
            (user, Some(domain))
        } else {
            (logon_name, None)
        };

        Self {
            username: username.to_owned(),
            password: password.into(),
            domain: domain.filter(|domain| !domain.is_empty()).map(str::to_owned),
        }
    }

    /// `DOMAIN\user`, or just `user` when no domain is set.
    pub fn account_name(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{}\\{}", domain, self.username),
            None => self.username.clone(),
        }
    }
}

/// Where a session takes its credentials from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CredentialSource {
    /// The ambient identity of the current process or logon session.
    #[default]
    Default,
    /// Explicitly supplied credential material.
    Explicit(AuthIdentity),
}

impl From<AuthIdentity> for CredentialSource {
    fn from(identity: AuthIdentity) -> Self {
        Self::Explicit(identity)
    }
}
