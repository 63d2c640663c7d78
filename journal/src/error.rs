// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Journal Error Types
//!
//! This module defines every error condition the journal engine can raise. The errors
//! fall into three groups:
//!
//! ### Provider Resolution Errors
//! - **ProviderDeclarationMissing**: an actor type does not name a journal provider
//! - **ProviderConfigurationMissing**: the settings lookup has nothing for a provider name
//! - **ProviderTypeResolution**: the configured provider type identifier is unknown
//! - **ProviderInitialization**: a provider rejected its parameters or the backend failed setup
//! - **ProviderNotInitialized**: a provider was asked for a journal before `initialize`
//!
//! These are fatal for the activation that triggered them. A provider instance that failed
//! to initialize is never cached, so a later activation starts from scratch.
//!
//! ### Journal Errors
//! - **DuplicateEvent**: an append reused an identifier already present in the stream
//! - **Backend**: append, read, clear or state persistence failed in the storage layer
//!
//! `DuplicateEvent` is not retryable: it means the writer assigned an identifier twice.
//! `Backend` errors are propagated verbatim and never retried by the engine. An append may
//! only be retried by a caller that can guarantee the same identifier.
//!
//! ### Host Errors
//! - **Codec**: a method invocation could not be encoded or decoded
//! - **Apply**: the host failed to apply a replayed invocation to the actor
//!
//! All variants carry owned strings so the type is `Clone`. This is required because the
//! per-actor-type provider handle is a shared future whose output is handed to every
//! waiting activation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the journal engine and its providers.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq)]
pub enum Error {
    /// An event with this identifier already exists in the stream.
    #[error("Event {id} already exists in the journal of stream {stream}.")]
    DuplicateEvent {
        /// The stream the append targeted.
        stream: String,
        /// The identifier that was reused.
        id: u64,
    },

    /// The actor type carries no journal provider declaration.
    #[error("Actor type {0} does not declare a journal provider.")]
    ProviderDeclarationMissing(String),

    /// The settings lookup returned nothing for the provider name.
    #[error("Configuration for journal provider {0} not found.")]
    ProviderConfigurationMissing(String),

    /// The provider type identifier does not resolve to a registered provider type.
    #[error("Can't resolve journal provider type: {0}")]
    ProviderTypeResolution(String),

    /// Provider setup failed: invalid parameters, double initialization or backend rejection.
    #[error("Can't initialize journal provider: {0}")]
    ProviderInitialization(String),

    /// A journal was requested from a provider that was never initialized.
    #[error("Journal provider {0} has not been initialized.")]
    ProviderNotInitialized(String),

    /// Storage layer failure during append, read, clear or state persistence.
    #[error("Backend error: {0}")]
    Backend(String),

    /// A method invocation could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// The host failed to apply an invocation to the actor.
    #[error("Can't apply request: {0}")]
    Apply(String),
}

impl Error {
    /// Returns `true` for errors raised while resolving or initializing a provider.
    ///
    /// These errors make actor activation fail and are never cached.
    pub fn is_provider_error(&self) -> bool {
        matches!(
            self,
            Error::ProviderDeclarationMissing(_)
                | Error::ProviderConfigurationMissing(_)
                | Error::ProviderTypeResolution(_)
                | Error::ProviderInitialization(_)
                | Error::ProviderNotInitialized(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(error: bincode::Error) -> Self {
        Error::Codec(error.to_string())
    }
}
