// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Journal module.
//!
//! Event sourcing for actors: an append-only journal per actor instance, pluggable journal
//! providers selected by configuration, and the per-instance protocol that journals calls
//! before they take effect, snapshots the state periodically and replays unapplied events
//! on activation.
//!

pub mod actor;
pub mod config;
pub mod error;
pub mod event;
pub mod journal;
pub mod manager;
pub mod memory;
pub mod provider;

pub use actor::{
    ActorJournal, Journaled, JournaledActor, JournaledState, StateContainer,
};
pub use config::{
    EnvSettings, JournalOptions, MemorySettings, Parameters, Settings,
    DEFAULT_SNAPSHOT_INTERVAL, PROVIDER_KEY,
};
pub use error::Error;
pub use event::{
    event_key, parse_event_key, stream_id, ActorIdentity, Event,
    MethodInvocation,
};
pub use journal::{EventStream, Journal};
pub use manager::JournalProviderManager;
pub use memory::{MemoryJournal, MemoryJournalProvider};
pub use provider::{JournalProvider, ProviderFactory, ProviderRegistry};
