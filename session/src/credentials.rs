//! Ready-made `CredentialSource` implementations.

use std::sync::{PoisonError, RwLock};

use casgate_types::{CredentialSource, Credentials};

/// Credentials fixed at construction, typically from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(Option<Credentials>);

impl StaticCredentials {
    #[must_use]
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self(credentials)
    }
}

impl CredentialSource for StaticCredentials {
    fn credentials(&self) -> Option<Credentials> {
        self.0.clone()
    }
}

/// Credentials the application can set after an interactive login and
/// clear on logout.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    inner: RwLock<Option<Credentials>>,
}

impl MemoryCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, credentials: Credentials) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(credentials);
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl CredentialSource for MemoryCredentials {
    fn credentials(&self) -> Option<Credentials> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
