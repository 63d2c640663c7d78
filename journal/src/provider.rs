// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Journal providers.
//!
//! A [`JournalProvider`] is the factory of [`Journal`]s for one backend technology. A
//! provider is created empty, initialized exactly once from its [`Parameters`] (which
//! typically opens a connection and provisions a table) and then creates one journal per
//! stream id.
//!
//! Providers are looked up by type identifier in a [`ProviderRegistry`]. The identifier is
//! the value of the `Provider` key of a configuration string. Registration is explicit.
//!

use crate::{
    config::Parameters,
    error::Error,
    journal::Journal,
    memory::MemoryJournalProvider,
};

use async_trait::async_trait;
use tracing::{debug, error};

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, RwLock},
};

/// Factory of journals for one backend.
///
/// # Initialization
///
/// `initialize` must fail when called a second time on the same instance, when a required
/// parameter is missing or invalid, or when the backend rejects the setup. Provisioning
/// must be idempotent: several instances may be initialized against the same backend
/// resource and all but one discarded.
#[async_trait]
pub trait JournalProvider: Send + Sync + 'static {
    /// Initializes the provider.
    ///
    /// # Arguments
    ///
    /// - parameters: The parsed configuration, including the `Provider` key.
    ///
    /// # Errors
    ///
    /// `Error::ProviderInitialization` if the instance is already initialized, a parameter
    /// is missing or the backend setup fails.
    ///
    async fn initialize(&mut self, parameters: &Parameters) -> Result<(), Error>;

    /// Creates the journal of a stream.
    ///
    /// # Errors
    ///
    /// `Error::ProviderNotInitialized` if `initialize` never succeeded.
    ///
    fn create(&self, stream_id: &str) -> Result<Box<dyn Journal>, Error>;
}

/// Constructor of an empty provider instance.
pub type ProviderFactory =
    Arc<dyn Fn() -> Box<dyn JournalProvider> + Send + Sync>;

/// Table of provider type identifiers.
///
/// The in-memory provider is registered by default under
/// [`MemoryJournalProvider::TYPE_NAME`].
#[derive(Clone)]
pub struct ProviderRegistry {
    factories: Arc<RwLock<HashMap<String, ProviderFactory>>>,
}

impl ProviderRegistry {
    /// Creates a registry without any provider type.
    pub fn empty() -> Self {
        Self {
            factories: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Registers a provider type, replacing any previous one with the same identifier.
    pub fn register<F>(&self, type_name: &str, factory: F) -> Result<(), Error>
    where
        F: Fn() -> Box<dyn JournalProvider> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write().map_err(|e| {
            Error::Backend(format!("Can not lock provider registry: {}", e))
        })?;
        debug!("Registering journal provider type {}", type_name);
        factories.insert(type_name.to_owned(), Arc::new(factory));
        Ok(())
    }

    /// Returns `true` if the provider type is registered.
    pub fn contains(&self, type_name: &str) -> bool {
        self.factories
            .read()
            .map(|factories| factories.contains_key(type_name))
            .unwrap_or(false)
    }

    /// Creates an empty instance of a provider type.
    ///
    /// # Errors
    ///
    /// `Error::ProviderTypeResolution` if the type is not registered.
    ///
    pub fn instantiate(
        &self,
        type_name: &str,
    ) -> Result<Box<dyn JournalProvider>, Error> {
        let factory = {
            let factories = self.factories.read().map_err(|e| {
                Error::Backend(format!(
                    "Can not lock provider registry: {}",
                    e
                ))
            })?;
            factories.get(type_name).cloned()
        };
        match factory {
            Some(factory) => Ok(factory()),
            None => {
                error!("Unknown journal provider type {}", type_name);
                Err(Error::ProviderTypeResolution(type_name.to_owned()))
            }
        }
    }

    /// Builds and initializes a provider from a configuration string.
    ///
    /// # Errors
    ///
    /// `Error::ProviderTypeResolution` if the `Provider` key is absent or unknown, and any
    /// error raised by the provider's `initialize`.
    ///
    pub async fn provider_from_configuration(
        &self,
        configuration: &str,
    ) -> Result<Box<dyn JournalProvider>, Error> {
        let parameters = Parameters::parse(configuration);
        let type_name = parameters.provider().ok_or_else(|| {
            error!("Configuration has no {} key", crate::config::PROVIDER_KEY);
            Error::ProviderTypeResolution(format!(
                "configuration has no {} key",
                crate::config::PROVIDER_KEY
            ))
        })?;
        let mut provider = self.instantiate(type_name)?;
        debug!("Initializing journal provider {}", type_name);
        provider.initialize(&parameters).await.map_err(|e| {
            error!("Can't initialize journal provider {}: {}", type_name, e);
            e
        })?;
        Ok(provider)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let memory: ProviderFactory = Arc::new(|| {
            Box::new(MemoryJournalProvider::default()) as Box<dyn JournalProvider>
        });
        let factories =
            HashMap::from([(MemoryJournalProvider::TYPE_NAME.to_owned(), memory)]);
        Self {
            factories: Arc::new(RwLock::new(factories)),
        }
    }
}

impl Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<String> = self
            .factories
            .read()
            .map(|factories| factories.keys().cloned().collect())
            .unwrap_or_default();
        types.sort();
        f.debug_struct("ProviderRegistry").field("types", &types).finish()
    }
}
