// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Event sourcing journal for actors.
//! Every state-mutating call of an actor is journaled before it takes effect, the actor
//! state is snapshotted periodically and unapplied events are replayed on activation.
//! Journals are created by pluggable providers, selected per actor type through
//! configuration strings such as `Provider=Sqlite;Table=events;ConnectionStringSetting=Db`.

pub use journal::{
    event_key, parse_event_key, stream_id, test_journal_trait, ActorIdentity,
    ActorJournal, EnvSettings, Error, Event, EventStream, Journal,
    JournalOptions, JournalProvider, JournalProviderManager, Journaled,
    JournaledActor, JournaledState, MemoryJournal, MemoryJournalProvider,
    MemorySettings, MethodInvocation, Parameters, ProviderFactory,
    ProviderRegistry, Settings, StateContainer, DEFAULT_SNAPSHOT_INTERVAL,
    PROVIDER_KEY,
};

#[cfg(feature = "sqlite")]
pub use sqlite_db::{SqliteJournal, SqliteJournalProvider};
