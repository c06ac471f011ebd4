use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::{AuthIdentity, CredentialUse, Result, SafeCredentialsHandle, SecurityPackageType, SecurityProvider};

pub const DEFAULT_CREDENTIAL_CACHE_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialCacheConfig {
    /// Maximum number of handles kept alive. Values below one are treated as one.
    pub capacity: usize,
}

impl Default for CredentialCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CREDENTIAL_CACHE_CAPACITY,
        }
    }
}

/// Effective identity a credentials handle was acquired for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub package: SecurityPackageType,
    pub credential_use: CredentialUse,
    /// `None` for the ambient identity, `DOMAIN\user` for explicit credentials.
    pub identity: Option<String>,
}

impl CredentialKey {
    pub fn ambient(package: SecurityPackageType, credential_use: CredentialUse) -> Self {
        Self {
            package,
            credential_use,
            identity: None,
        }
    }

    pub fn explicit(package: SecurityPackageType, credential_use: CredentialUse, identity: &AuthIdentity) -> Self {
        Self {
            package,
            credential_use,
            identity: Some(identity.account_name()),
        }
    }
}

/// Bounded least-recently-used set of credentials handles shared by sessions.
///
/// Each entry is an independent reference, so evicting a handle that an in-flight session still
/// uses only drops the cache's share of it.
pub struct CredentialCache<P: SecurityProvider> {
    capacity: usize,
    // front is the most recently used entry
    entries: Mutex<VecDeque<(CredentialKey, SafeCredentialsHandle<P>)>>,
}

impl<P: SecurityProvider> CredentialCache<P> {
    pub fn new() -> Self {
        Self::with_config(CredentialCacheConfig::default())
    }

    pub fn with_config(config: CredentialCacheConfig) -> Self {
        let capacity = config.capacity.max(1);

        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.entries.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entries.lock()?.is_empty())
    }

    /// Returns the handle cached for `key` and marks it as most recently used.
    pub fn get(&self, key: &CredentialKey) -> Result<Option<SafeCredentialsHandle<P>>> {
        let mut entries = self.entries.lock()?;

        let Some(entry) = entries
            .iter()
            .position(|(cached_key, _)| cached_key == key)
            .and_then(|index| entries.remove(index))
        else {
            return Ok(None);
        };

        let handle = entry.1.clone();
        entries.push_front(entry);

        Ok(Some(handle))
    }

    /// Stores a new reference to `handle` as the most recently used entry.
    ///
    /// An entry with the same key is replaced. If the cache overflows, the least recently used
    /// entry is dropped, releasing the provider handle unless something else still holds it.
    #[instrument(level = "debug", skip(self, handle))]
    pub fn insert(&self, key: CredentialKey, handle: SafeCredentialsHandle<P>) -> Result<()> {
        let evicted = {
            let mut entries = self.entries.lock()?;

            let replaced = entries
                .iter()
                .position(|(cached_key, _)| *cached_key == key)
                .and_then(|index| entries.remove(index));

            entries.push_front((key, handle));

            let mut evicted: Vec<_> = replaced.into_iter().collect();
            while entries.len() > self.capacity {
                evicted.extend(entries.pop_back());
            }

            evicted
        };

        // dropped outside of the lock: releasing a handle calls into the provider
        for (key, handle) in evicted {
            debug!(?key, references = handle.reference_count(), "Evicted credentials handle");
        }

        Ok(())
    }

    pub fn contains(&self, handle: &SafeCredentialsHandle<P>) -> Result<bool> {
        Ok(self
            .entries
            .lock()?
            .iter()
            .any(|(_, cached_handle)| cached_handle.ptr_eq(handle)))
    }

    /// Drops every cached reference.
    pub fn clear(&self) -> Result<()> {
        let entries = std::mem::take(&mut *self.entries.lock()?);
        drop(entries);

        Ok(())
    }
}

impl<P: SecurityProvider> Default for CredentialCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: SecurityProvider> fmt::Debug for CredentialCache<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("CredentialCache");
        debug.field("capacity", &self.capacity);
        match self.entries.lock() {
            Ok(entries) => debug.field("entries", &entries.len()),
            Err(_) => debug.field("entries", &"<poisoned>"),
        };
        debug.finish()
    }
}
