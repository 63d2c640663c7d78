// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Provider resolution and lifecycle.
//!
//! The [`JournalProviderManager`] turns an actor type into an initialized
//! [`JournalProvider`]:
//!
//! 1. actor type to provider name, from [`Journaled::JOURNAL_PROVIDER`] or an explicit
//!    [`JournalProviderManager::declare`] call, cached per type;
//! 2. provider name to an already installed provider instance, if any;
//! 3. provider name to configuration string, through the [`Settings`] lookup;
//! 4. configuration to a new provider instance, initialized and then installed.
//!
//! No lock is held while a provider initializes. Concurrent first resolutions of the same
//! provider name may therefore initialize several instances; the first one installed wins
//! and the others are dropped. Failed instances are never installed.
//!
//! On top of that, [`JournalProviderManager::journal_provider`] memoizes one shared
//! resolution per actor type, so every activation of a type awaits the same future.
//!

use crate::{
    actor::Journaled,
    config::{EnvSettings, Settings},
    error::Error,
    provider::{JournalProvider, ProviderRegistry},
};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use tracing::{debug, error, info, warn};

use std::{
    any::TypeId,
    collections::{hash_map::Entry, HashMap},
    sync::{Arc, Mutex, PoisonError, RwLock},
};

type ProviderHandle =
    Shared<BoxFuture<'static, Result<Arc<dyn JournalProvider>, Error>>>;

/// Resolves and caches journal providers.
///
/// Clones share the same caches.
#[derive(Clone)]
pub struct JournalProviderManager {
    settings: Arc<dyn Settings>,
    registry: ProviderRegistry,
    actor_providers: Arc<RwLock<HashMap<TypeId, String>>>,
    providers: Arc<RwLock<HashMap<String, Arc<dyn JournalProvider>>>>,
    handles: Arc<Mutex<HashMap<TypeId, ProviderHandle>>>,
}

impl JournalProviderManager {
    /// Creates a manager with the default provider types.
    pub fn new<S: Settings + 'static>(settings: S) -> Self {
        Self::with_registry(settings, ProviderRegistry::default())
    }

    /// Creates a manager over an existing registry.
    pub fn with_registry<S: Settings + 'static>(
        settings: S,
        registry: ProviderRegistry,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            registry,
            actor_providers: Arc::new(RwLock::new(HashMap::new())),
            providers: Arc::new(RwLock::new(HashMap::new())),
            handles: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Registers a provider type and returns the manager.
    pub fn with_provider_type<F>(
        self,
        type_name: &str,
        factory: F,
    ) -> Result<Self, Error>
    where
        F: Fn() -> Box<dyn JournalProvider> + Send + Sync + 'static,
    {
        self.register_provider_type(type_name, factory)?;
        Ok(self)
    }

    /// Registers a provider type.
    pub fn register_provider_type<F>(
        &self,
        type_name: &str,
        factory: F,
    ) -> Result<(), Error>
    where
        F: Fn() -> Box<dyn JournalProvider> + Send + Sync + 'static,
    {
        self.registry.register(type_name, factory)
    }

    /// The provider type registry.
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Declares the provider name of an actor type.
    ///
    /// Takes precedence over [`Journaled::JOURNAL_PROVIDER`]. Must be called before the
    /// type is first resolved to have any effect on an already memoized handle.
    pub fn declare<A: Journaled>(&self, provider_name: &str) -> Result<(), Error> {
        let mut actor_providers = self.actor_providers.write().map_err(|e| {
            Error::Backend(format!("Can not lock provider declarations: {}", e))
        })?;
        debug!(
            "Actor type {} declared with journal provider {}",
            A::TYPE_NAME,
            provider_name
        );
        actor_providers.insert(TypeId::of::<A>(), provider_name.to_owned());
        Ok(())
    }

    /// Builds and initializes a provider from a configuration string, bypassing the caches.
    pub async fn provider_from_configuration(
        &self,
        configuration: &str,
    ) -> Result<Box<dyn JournalProvider>, Error> {
        self.registry.provider_from_configuration(configuration).await
    }

    /// Resolves the provider of an actor type.
    ///
    /// # Errors
    ///
    /// - `Error::ProviderDeclarationMissing` if the type has no provider name.
    /// - `Error::ProviderConfigurationMissing` if the settings have no configuration for it.
    /// - `Error::ProviderTypeResolution` if the configured provider type is unknown.
    /// - Any error raised by the provider's `initialize`.
    ///
    pub async fn resolve_provider<A: Journaled>(
        &self,
    ) -> Result<Arc<dyn JournalProvider>, Error> {
        let provider_name = self.provider_name::<A>()?;
        if let Some(provider) = self.installed_provider(&provider_name)? {
            debug!("Journal provider {} found in cache", provider_name);
            return Ok(provider);
        }

        debug!(
            "Journal provider {} not cached, reading its configuration",
            provider_name
        );
        let configuration =
            self.settings.setting(&provider_name).ok_or_else(|| {
                error!(
                    "Configuration for journal provider {} not found",
                    provider_name
                );
                Error::ProviderConfigurationMissing(provider_name.clone())
            })?;
        let provider: Arc<dyn JournalProvider> = Arc::from(
            self.registry
                .provider_from_configuration(&configuration)
                .await?,
        );
        self.install(&provider_name, provider)
    }

    /// Returns the provider of an actor type, resolved once for all its instances.
    ///
    /// Every caller awaits the same resolution. A failed resolution is forgotten so the
    /// next call starts over.
    pub async fn journal_provider<A: Journaled>(
        &self,
    ) -> Result<Arc<dyn JournalProvider>, Error> {
        let type_id = TypeId::of::<A>();
        let handle = self.handle::<A>();
        let result = handle.clone().await;
        if let Err(e) = &result {
            if e.is_provider_error() {
                warn!(
                    "Journal provider of {} failed to resolve: {}",
                    A::TYPE_NAME,
                    e
                );
            } else {
                error!(
                    "Unexpected failure resolving the journal provider of {}: {}",
                    A::TYPE_NAME,
                    e
                );
            }
            // The map holds no invariant a panicking holder could break.
            let mut handles =
                self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            if handles
                .get(&type_id)
                .map(|current| current.ptr_eq(&handle))
                .unwrap_or(false)
            {
                handles.remove(&type_id);
            }
        }
        result
    }

    fn handle<A: Journaled>(&self) -> ProviderHandle {
        let mut handles =
            self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let handle = handles.entry(TypeId::of::<A>()).or_insert_with(|| {
            let manager = self.clone();
            async move { manager.resolve_provider::<A>().await }
                .boxed()
                .shared()
        });
        handle.clone()
    }

    fn provider_name<A: Journaled>(&self) -> Result<String, Error> {
        let type_id = TypeId::of::<A>();
        {
            let actor_providers = self.actor_providers.read().map_err(|e| {
                Error::Backend(format!(
                    "Can not lock provider declarations: {}",
                    e
                ))
            })?;
            if let Some(name) = actor_providers.get(&type_id) {
                return Ok(name.clone());
            }
        }

        let name = A::JOURNAL_PROVIDER.ok_or_else(|| {
            error!(
                "Actor type {} does not declare a journal provider",
                A::TYPE_NAME
            );
            Error::ProviderDeclarationMissing(A::TYPE_NAME.to_owned())
        })?;
        let mut actor_providers = self.actor_providers.write().map_err(|e| {
            Error::Backend(format!("Can not lock provider declarations: {}", e))
        })?;
        Ok(actor_providers
            .entry(type_id)
            .or_insert_with(|| name.to_owned())
            .clone())
    }

    fn installed_provider(
        &self,
        provider_name: &str,
    ) -> Result<Option<Arc<dyn JournalProvider>>, Error> {
        let providers = self.providers.read().map_err(|e| {
            Error::Backend(format!("Can not lock providers: {}", e))
        })?;
        Ok(providers.get(provider_name).cloned())
    }

    fn install(
        &self,
        provider_name: &str,
        provider: Arc<dyn JournalProvider>,
    ) -> Result<Arc<dyn JournalProvider>, Error> {
        let mut providers = self.providers.write().map_err(|e| {
            Error::Backend(format!("Can not lock providers: {}", e))
        })?;
        match providers.entry(provider_name.to_owned()) {
            Entry::Occupied(entry) => {
                warn!(
                    "Journal provider {} already installed, discarding the new instance",
                    provider_name
                );
                Ok(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                info!("Journal provider {} installed", provider_name);
                Ok(entry.insert(provider).clone())
            }
        }
    }
}

impl Default for JournalProviderManager {
    fn default() -> Self {
        Self::new(EnvSettings)
    }
}
