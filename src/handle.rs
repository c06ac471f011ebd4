//! Owners of provider handles. Dropping the last owner releases the handle through the provider,
//! so every exit path of a session (success, failure, panic unwinding, early drop) cleans up.

use std::fmt;
use std::sync::Arc;

use crate::{Error, ErrorKind, Result, SecurityProvider};

struct CredentialsHandleOwner<P: SecurityProvider> {
    provider: Arc<P>,
    handle: Option<P::CredentialsHandle>,
}

impl<P: SecurityProvider> Drop for CredentialsHandleOwner<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(?handle, "Releasing credentials handle");
            self.provider.free_credentials_handle(handle);
        }
    }
}

/// Reference-counted credentials handle.
///
/// Clones share one provider handle; it is freed exactly once, when the last clone is dropped.
pub struct SafeCredentialsHandle<P: SecurityProvider> {
    inner: Arc<CredentialsHandleOwner<P>>,
}

impl<P: SecurityProvider> SafeCredentialsHandle<P> {
    pub fn new(provider: Arc<P>, handle: P::CredentialsHandle) -> Self {
        Self {
            inner: Arc::new(CredentialsHandleOwner {
                provider,
                handle: Some(handle),
            }),
        }
    }

    pub fn as_raw(&self) -> Result<&P::CredentialsHandle> {
        self.inner
            .handle
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::InvalidHandle, "credentials handle has been released"))
    }

    /// Number of live references to the underlying provider handle.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<P: SecurityProvider> Clone for SafeCredentialsHandle<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: SecurityProvider> fmt::Debug for SafeCredentialsHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeCredentialsHandle")
            .field("handle", &self.inner.handle)
            .field("references", &self.reference_count())
            .finish()
    }
}

/// Exclusively owned security context slot.
///
/// The slot starts empty and is filled by the provider during the first context call. While a
/// context lives, the slot also keeps a reference to the credentials it was built from.
pub struct SafeContextHandle<P: SecurityProvider> {
    provider: Arc<P>,
    handle: Option<P::ContextHandle>,
    credentials: Option<SafeCredentialsHandle<P>>,
}

impl<P: SecurityProvider> SafeContextHandle<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            handle: None,
            credentials: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.handle.is_some()
    }

    pub fn as_raw(&self) -> Option<&P::ContextHandle> {
        self.handle.as_ref()
    }

    pub fn as_raw_mut(&mut self) -> Option<&mut P::ContextHandle> {
        self.handle.as_mut()
    }

    pub fn credentials(&self) -> Option<&SafeCredentialsHandle<P>> {
        self.credentials.as_ref()
    }

    pub(crate) fn retain_credentials(&mut self, credentials: SafeCredentialsHandle<P>) {
        self.credentials = Some(credentials);
    }

    /// Splits the slot into the credentials it holds and the raw context the provider mutates.
    pub(crate) fn parts_mut(&mut self) -> (Option<&SafeCredentialsHandle<P>>, &mut Option<P::ContextHandle>) {
        (self.credentials.as_ref(), &mut self.handle)
    }

    /// Deletes the provider context now. The slot stays, permanently invalid.
    pub fn delete(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(?handle, "Deleting security context");
            self.provider.delete_security_context(handle);
        }

        self.credentials = None;
    }
}

impl<P: SecurityProvider> Drop for SafeContextHandle<P> {
    fn drop(&mut self) {
        self.delete();
    }
}

impl<P: SecurityProvider> fmt::Debug for SafeContextHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeContextHandle")
            .field("handle", &self.handle)
            .field("credentials", &self.credentials)
            .finish()
    }
}
