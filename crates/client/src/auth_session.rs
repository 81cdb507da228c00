//! Authentication session management with on-disk persistence.

use std::sync::{Arc, PoisonError, RwLock};

use captain_shared::{ApiError, AuthResponse, DriverProfile, RegisterRequest};
use serde::{Deserialize, Serialize};

use crate::api_client::ApiClient;
use crate::storage::Storage;

const STORAGE_KEY: &str = "driver_session";

/// Who the driver is, as far as the backend is concerned.
///
/// Either part may be unknown; callers that need one skip their work when it is.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriverIdentity {
    #[serde(default)]
    pub driver_id: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl DriverIdentity {
    pub fn new(driver_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            driver_id: Some(driver_id.into()),
            token: Some(token.into()),
        }
    }

    /// Driver id, if present and not blank.
    pub fn driver_id(&self) -> Option<&str> {
        non_blank(self.driver_id.as_deref())
    }

    /// Bearer token, if present and not blank.
    pub fn token(&self) -> Option<&str> {
        non_blank(self.token.as_deref())
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

/// Shared handle to the current driver identity.
///
/// Clones observe the same identity, so the session facade picks up a login
/// that happens after it was created.
#[derive(Clone, Debug, Default)]
pub struct AuthSession {
    identity: Arc<RwLock<DriverIdentity>>,
    storage: Option<Storage>,
}

impl AuthSession {
    /// In-memory session with a fixed starting identity.
    pub fn with_identity(identity: DriverIdentity) -> Self {
        Self {
            identity: Arc::new(RwLock::new(identity)),
            storage: None,
        }
    }

    /// Session backed by `storage`, restoring any previously saved identity.
    pub fn restore(storage: Storage) -> Self {
        let identity = storage
            .load::<DriverIdentity>(STORAGE_KEY)
            .unwrap_or_default();
        if identity.token().is_some() {
            tracing::info!(driver_id = ?identity.driver_id(), "restored driver session");
        }
        Self {
            identity: Arc::new(RwLock::new(identity)),
            storage: Some(storage),
        }
    }

    pub fn identity(&self) -> DriverIdentity {
        self.identity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn driver_id(&self) -> Option<String> {
        self.identity().driver_id().map(str::to_string)
    }

    pub fn token(&self) -> Option<String> {
        self.identity().token().map(str::to_string)
    }

    /// Check if the driver is authenticated
    pub fn is_authenticated(&self) -> bool {
        self.identity().token().is_some()
    }

    /// Replace the identity and persist it.
    pub fn set_identity(&self, identity: DriverIdentity) {
        if let Some(storage) = &self.storage {
            storage.save(STORAGE_KEY, &identity);
        }
        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = identity;
    }

    /// Log in with phone and password and remember the resulting identity.
    pub async fn login(
        &self,
        api: &ApiClient,
        phone: &str,
        password: &str,
    ) -> Result<DriverProfile, ApiError> {
        let response = api.login(phone, password).await?;
        Ok(self.adopt(response))
    }

    /// Register a new driver account and remember the resulting identity.
    pub async fn register(
        &self,
        api: &ApiClient,
        request: &RegisterRequest,
    ) -> Result<DriverProfile, ApiError> {
        let response = api.register(request).await?;
        Ok(self.adopt(response))
    }

    fn adopt(&self, response: AuthResponse) -> DriverProfile {
        tracing::info!(driver_id = %response.driver.id, "driver authenticated");
        self.set_identity(DriverIdentity::new(
            response.driver.id.clone(),
            response.token,
        ));
        response.driver
    }

    /// Forget the identity, in memory and on disk.
    pub fn logout(&self) {
        if let Some(storage) = &self.storage {
            storage.remove(STORAGE_KEY);
        }
        *self
            .identity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = DriverIdentity::default();
    }
}
