// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor journal.
//!
//! The [`ActorJournal`] gives an actor instance durable, replayable memory. Every
//! state-mutating call is journaled before its effect commits, the state container is
//! snapshotted every [`JournalOptions::snapshot_interval`] writes, and on activation the
//! events past the snapshot are replayed against the actor.
//!
//! The hosting runtime stays outside of this crate. It plugs in through
//! [`JournaledActor`], which exposes the in-flight call of an actor, applies a replayed
//! call to it and hands out its [`StateContainer`].
//!
//! ```text
//!             write_journal            replay_unapplied_events
//!   Idle  ------------------> Writing       Idle ------------> Replaying
//!    ^                           |           ^                     |
//!    +---------------------------+           +---------------------+
//! ```
//!
//! Writing and replaying never overlap: a write requested while replaying is a no-op.
//! Calls on one instance must be sequential, which the runtime guarantees by running at
//! most one call per actor instance at a time.
//!

use crate::{
    config::JournalOptions,
    error::Error,
    event::{stream_id, ActorIdentity, MethodInvocation},
    journal::Journal,
    manager::JournalProviderManager,
    provider::JournalProvider,
};

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use std::{
    marker::PhantomData,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

/// Static journal declaration of an actor type.
pub trait Journaled: 'static {
    /// Name of the journal provider used by every instance of the type.
    ///
    /// `None` means the type must be declared through
    /// [`JournalProviderManager::declare`].
    const JOURNAL_PROVIDER: Option<&'static str> = None;

    /// Type name used in stream ids.
    ///
    /// Part of every persisted stream key, so it must not change once events are written.
    const TYPE_NAME: &'static str;
}

/// Persisted state of an actor, owned by the runtime.
///
/// The journal only reads and writes the id of the last event reflected in the state, and
/// asks the runtime to persist or clear the whole container.
#[async_trait]
pub trait StateContainer: Send + Sync {
    /// Id of the last event reflected in the state.
    fn current_event_id(&self) -> u64;

    /// Sets the id of the last event reflected in the state.
    fn set_current_event_id(&mut self, id: u64);

    /// Persists the container as it is.
    async fn write_state(&mut self) -> Result<(), Error>;

    /// Clears the persisted container.
    async fn clear_state(&mut self) -> Result<(), Error>;
}

/// Serializable state shape: the actor value plus the last reflected event id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournaledState<T> {
    /// Id of the last event reflected in `value`.
    pub current_event_id: u64,
    /// Actor-defined state.
    pub value: T,
}

/// What the hosting runtime exposes of an actor instance.
#[async_trait]
pub trait JournaledActor: Journaled + Send + Sync {
    /// State container of the actor.
    type State: StateContainer;

    /// Identity of the instance.
    fn identity(&self) -> ActorIdentity;

    /// The state container.
    fn state(&self) -> &Self::State;

    /// The state container, mutably.
    fn state_mut(&mut self) -> &mut Self::State;

    /// The call currently being processed, if any.
    fn current_request(&self) -> Option<MethodInvocation>;

    /// Executes a call against the actor.
    ///
    /// Invoked during replay. Any journal write the call performs is ignored.
    ///
    async fn apply_request(
        &mut self,
        invocation: MethodInvocation,
    ) -> Result<(), Error>;
}

/// Resets the replay flag when dropped.
struct ReplayGuard<'a>(&'a AtomicBool);

impl Drop for ReplayGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Journal of one actor instance.
///
/// Methods take `&self`, so the journal can be shared with the actor behind an `Arc` and
/// reached again from inside [`JournaledActor::apply_request`].
pub struct ActorJournal<A> {
    journal: Box<dyn Journal>,
    options: JournalOptions,
    journaled_since_snapshot: AtomicU32,
    replaying: AtomicBool,
    _actor: PhantomData<fn() -> A>,
}

impl<A: JournaledActor> ActorJournal<A> {
    /// Opens the journal of an actor instance.
    ///
    /// # Errors
    ///
    /// `Error::ProviderNotInitialized` or any backend error raised by `create`.
    ///
    pub fn new(
        provider: &dyn JournalProvider,
        actor: &A,
        options: JournalOptions,
    ) -> Result<Self, Error> {
        let stream_id = stream_id(A::TYPE_NAME, &actor.identity());
        let journal = provider.create(&stream_id)?;
        debug!("Journal opened for stream {}", stream_id);
        Ok(Self {
            journal,
            options,
            journaled_since_snapshot: AtomicU32::new(0),
            replaying: AtomicBool::new(false),
            _actor: PhantomData,
        })
    }

    /// Activates the journal of an actor instance.
    ///
    /// Awaits the provider shared by every instance of the type, opens the stream and
    /// replays the events the state container does not reflect yet.
    ///
    /// # Errors
    ///
    /// Provider resolution errors, and any error raised by the replay.
    ///
    pub async fn activate(
        manager: &JournalProviderManager,
        actor: &mut A,
        options: JournalOptions,
    ) -> Result<Self, Error> {
        let provider = manager.journal_provider::<A>().await?;
        let journal = Self::new(provider.as_ref(), actor, options)?;
        info!(
            "Stream {} recovering from event {}",
            journal.stream_id(),
            actor.state().current_event_id()
        );
        journal.replay_unapplied_events(actor).await?;
        info!(
            "Stream {} recovered to event {}",
            journal.stream_id(),
            actor.state().current_event_id()
        );
        Ok(journal)
    }

    /// Stream id of the actor instance.
    pub fn stream_id(&self) -> &str {
        self.journal.stream_id()
    }

    /// Returns `true` while events are being replayed.
    pub fn is_replaying(&self) -> bool {
        self.replaying.load(Ordering::SeqCst)
    }

    /// Id of the last event reflected in the actor state.
    pub fn last_journaled_event_id(&self, actor: &A) -> u64 {
        actor.state().current_event_id()
    }

    /// Journals the call in flight, before its effect is allowed to commit.
    ///
    /// Every `snapshot_interval` calls the state is snapshotted first, as it is before the
    /// new event id is assigned. Does nothing while replaying.
    ///
    /// # Errors
    ///
    /// `Error::Codec` if the invocation can't be encoded, `Error::DuplicateEvent` or
    /// `Error::Backend` if the append fails, and any snapshot error.
    ///
    pub async fn write_journal(&self, actor: &mut A) -> Result<(), Error> {
        if self.is_replaying() {
            debug!("Stream {} is replaying, write ignored", self.stream_id());
            return Ok(());
        }

        let interval = self.options.snapshot_interval;
        if interval > 0 {
            let journaled = self
                .journaled_since_snapshot
                .fetch_add(1, Ordering::SeqCst)
                + 1;
            if journaled >= interval {
                self.journaled_since_snapshot.store(0, Ordering::SeqCst);
                self.write_snapshot(actor).await?;
            }
        }

        let Some(invocation) = actor.current_request() else {
            return Ok(());
        };
        let payload = invocation.encode()?;
        let id = actor
            .state()
            .current_event_id()
            .checked_add(1)
            .ok_or_else(|| {
                Error::Backend(format!(
                    "Event ids exhausted in stream {}",
                    self.stream_id()
                ))
            })?;
        self.journal.append(payload, id).await.map_err(|e| {
            error!("Can't journal event {} of {}: {}", id, self.stream_id(), e);
            e
        })?;
        actor.state_mut().set_current_event_id(id);
        debug!(
            "Journaled event {} ({}:{}) in stream {}",
            id,
            invocation.interface_id,
            invocation.method_id,
            self.stream_id()
        );
        Ok(())
    }

    /// Replays the events the state does not reflect yet.
    ///
    /// Not reentrant: a replay requested while replaying returns at once. The replay flag
    /// is cleared on every exit path.
    ///
    /// # Errors
    ///
    /// Errors yielded by the journal read, `Error::Codec` for an undecodable event, and
    /// errors returned by [`JournaledActor::apply_request`].
    ///
    pub async fn replay_unapplied_events(
        &self,
        actor: &mut A,
    ) -> Result<(), Error> {
        if self.replaying.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = ReplayGuard(&self.replaying);

        let start = actor.state().current_event_id();
        debug!("Replaying stream {} from event {}", self.stream_id(), start);
        let mut events = self.journal.read_from(start);
        let mut replayed = 0u64;
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| {
                error!("Can't read stream {}: {}", self.stream_id(), e);
                e
            })?;
            if event.id > actor.state().current_event_id() {
                actor.state_mut().set_current_event_id(event.id);
            }
            let invocation = event.invocation()?;
            actor.apply_request(invocation).await.map_err(|e| {
                error!(
                    "Can't apply event {} of {}: {}",
                    event.id,
                    self.stream_id(),
                    e
                );
                e
            })?;
            replayed += 1;
        }
        debug!("Replayed {} events of stream {}", replayed, self.stream_id());
        Ok(())
    }

    /// Persists the state container as it is.
    pub async fn write_snapshot(&self, actor: &mut A) -> Result<(), Error> {
        debug!(
            "Snapshot of stream {} at event {}",
            self.stream_id(),
            actor.state().current_event_id()
        );
        actor.state_mut().write_state().await
    }

    /// Deletes every journaled event and clears the persisted state.
    ///
    /// Not reversible.
    pub async fn delete(&self, actor: &mut A) -> Result<(), Error> {
        let up_to = actor.state().current_event_id().saturating_add(1);
        self.journal.clear(up_to).await?;
        actor.state_mut().clear_state().await?;
        self.journaled_since_snapshot.store(0, Ordering::SeqCst);
        info!("Stream {} deleted", self.stream_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{MemorySettings, Parameters},
        event::Event,
        journal::EventStream,
        memory::MemoryJournalProvider,
    };

    use futures::stream;

    use tracing_test::traced_test;

    use std::sync::Arc;

    const INTERFACE: i32 = 7;
    const ADD: i32 = 1;
    const FAIL: i32 = 2;

    #[derive(Default)]
    struct TestState {
        current_event_id: u64,
        snapshots: Vec<u64>,
        cleared: bool,
    }

    #[async_trait]
    impl StateContainer for TestState {
        fn current_event_id(&self) -> u64 {
            self.current_event_id
        }

        fn set_current_event_id(&mut self, id: u64) {
            self.current_event_id = id;
        }

        async fn write_state(&mut self) -> Result<(), Error> {
            self.snapshots.push(self.current_event_id);
            Ok(())
        }

        async fn clear_state(&mut self) -> Result<(), Error> {
            self.current_event_id = 0;
            self.cleared = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Counter {
        state: TestState,
        total: i64,
        request: Option<MethodInvocation>,
        applied: Vec<MethodInvocation>,
        journal: Option<Arc<ActorJournal<Counter>>>,
    }

    impl Journaled for Counter {
        const JOURNAL_PROVIDER: Option<&'static str> = Some("CounterJournal");
        const TYPE_NAME: &'static str = "Counter";
    }

    #[async_trait]
    impl JournaledActor for Counter {
        type State = TestState;

        fn identity(&self) -> ActorIdentity {
            ActorIdentity::new("1")
        }

        fn state(&self) -> &TestState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut TestState {
            &mut self.state
        }

        fn current_request(&self) -> Option<MethodInvocation> {
            self.request.clone()
        }

        async fn apply_request(
            &mut self,
            invocation: MethodInvocation,
        ) -> Result<(), Error> {
            if invocation.method_id == FAIL {
                return Err(Error::Apply("failing method".to_owned()));
            }
            self.applied.push(invocation.clone());
            self.add(invocation.argument(0)?).await
        }
    }

    impl Counter {
        async fn add(&mut self, amount: i64) -> Result<(), Error> {
            if let Some(journal) = self.journal.clone() {
                self.request = Some(
                    MethodInvocation::new(INTERFACE, ADD)
                        .with_argument(&amount)?,
                );
                let result = journal.write_journal(self).await;
                self.request = None;
                result?;
            }
            self.total += amount;
            Ok(())
        }
    }

    async fn provider() -> MemoryJournalProvider {
        let mut provider = MemoryJournalProvider::default();
        provider
            .initialize(&Parameters::parse("Provider=Memory"))
            .await
            .unwrap();
        provider
    }

    fn add(amount: i64) -> MethodInvocation {
        MethodInvocation::new(INTERFACE, ADD)
            .with_argument(&amount)
            .unwrap()
    }

    #[tokio::test]
    async fn test_snapshot_cadence() {
        let provider = provider().await;
        let mut actor = Counter::default();
        let journal = ActorJournal::new(
            &provider,
            &actor,
            JournalOptions::default().with_snapshot_interval(3),
        )
        .unwrap();
        assert_eq!(journal.stream_id(), "Counter_1");

        for amount in 1..=3 {
            actor.request = Some(add(amount));
            journal.write_journal(&mut actor).await.unwrap();
            assert_eq!(actor.state.current_event_id, amount as u64);
        }
        // Taken on the third call, before its event id was assigned.
        assert_eq!(actor.state.snapshots, vec![2]);
        assert_eq!(journal.last_journaled_event_id(&actor), 3);

        let events = provider
            .create("Counter_1")
            .unwrap()
            .read_all_from(0)
            .await
            .unwrap();
        let ids: Vec<u64> = events.iter().map(|event| event.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(events[2].invocation().unwrap(), add(3));

        for amount in 4..=6 {
            actor.request = Some(add(amount));
            journal.write_journal(&mut actor).await.unwrap();
        }
        assert_eq!(actor.state.snapshots, vec![2, 5]);
    }

    #[tokio::test]
    async fn test_write_without_request() {
        let provider = provider().await;
        let mut actor = Counter::default();
        let journal = ActorJournal::new(
            &provider,
            &actor,
            JournalOptions::default().with_snapshot_interval(2),
        )
        .unwrap();

        journal.write_journal(&mut actor).await.unwrap();
        journal.write_journal(&mut actor).await.unwrap();
        assert_eq!(actor.state.current_event_id, 0);
        assert_eq!(actor.state.snapshots, vec![0]);
        assert!(provider
            .create("Counter_1")
            .unwrap()
            .read_all_from(0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_zero_interval_disables_snapshots() {
        let provider = provider().await;
        let mut actor = Counter::default();
        let journal = ActorJournal::new(
            &provider,
            &actor,
            JournalOptions::default().with_snapshot_interval(0),
        )
        .unwrap();
        for amount in 1..=5 {
            actor.request = Some(add(amount));
            journal.write_journal(&mut actor).await.unwrap();
        }
        assert!(actor.state.snapshots.is_empty());
        assert_eq!(actor.state.current_event_id, 5);
    }

    #[tokio::test]
    async fn test_duplicate_id_does_not_advance() {
        let provider = provider().await;
        let stream = provider.create("Counter_1").unwrap();
        stream.append(vec![], 1).await.unwrap();

        let mut actor = Counter::default();
        let journal =
            ActorJournal::new(&provider, &actor, JournalOptions::default())
                .unwrap();
        actor.request = Some(add(1));
        assert!(matches!(
            journal.write_journal(&mut actor).await,
            Err(Error::DuplicateEvent { id: 1, .. })
        ));
        assert_eq!(actor.state.current_event_id, 0);
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let provider = provider().await;
        let stream = provider.create("Counter_1").unwrap();
        for (id, amount) in [(1u64, 10i64), (2, 20), (3, 30)] {
            stream.append(add(amount).encode().unwrap(), id).await.unwrap();
        }

        let mut actor = Counter::default();
        let journal = Arc::new(
            ActorJournal::new(&provider, &actor, JournalOptions::default())
                .unwrap(),
        );
        actor.journal = Some(journal.clone());

        journal.replay_unapplied_events(&mut actor).await.unwrap();
        assert_eq!(actor.total, 60);
        assert_eq!(actor.applied.len(), 3);
        assert_eq!(actor.state.current_event_id, 3);
        assert_eq!(journal.last_journaled_event_id(&actor), 3);
        assert!(!journal.is_replaying());
        // Writes issued by the replayed calls were ignored.
        assert_eq!(stream.read_all_from(0).await.unwrap().len(), 3);

        journal.replay_unapplied_events(&mut actor).await.unwrap();
        assert_eq!(actor.applied.len(), 3);
        assert_eq!(actor.state.current_event_id, 3);

        // Live writes continue after the replayed events.
        actor.add(5).await.unwrap();
        assert_eq!(actor.state.current_event_id, 4);
        assert_eq!(actor.total, 65);
    }

    #[tokio::test]
    async fn test_replay_starts_after_snapshot() {
        let provider = provider().await;
        let stream = provider.create("Counter_1").unwrap();
        for id in 1..=4u64 {
            stream.append(add(id as i64).encode().unwrap(), id).await.unwrap();
        }

        let mut actor = Counter::default();
        actor.state.current_event_id = 2;
        let journal =
            ActorJournal::new(&provider, &actor, JournalOptions::default())
                .unwrap();
        journal.replay_unapplied_events(&mut actor).await.unwrap();
        assert_eq!(actor.total, 7);
        assert_eq!(actor.state.current_event_id, 4);
    }

    #[tokio::test]
    async fn test_replay_failure_resets_state() {
        let provider = provider().await;
        let stream = provider.create("Counter_1").unwrap();
        stream.append(add(1).encode().unwrap(), 1).await.unwrap();
        stream
            .append(MethodInvocation::new(INTERFACE, FAIL).encode().unwrap(), 2)
            .await
            .unwrap();
        stream.append(add(3).encode().unwrap(), 3).await.unwrap();

        let mut actor = Counter::default();
        let journal =
            ActorJournal::new(&provider, &actor, JournalOptions::default())
                .unwrap();
        assert!(matches!(
            journal.replay_unapplied_events(&mut actor).await,
            Err(Error::Apply(_))
        ));
        assert!(!journal.is_replaying());
        assert_eq!(actor.total, 1);
        assert_eq!(actor.state.current_event_id, 2);
    }

    #[tokio::test]
    async fn test_replay_undecodable_event() {
        let provider = provider().await;
        provider
            .create("Counter_1")
            .unwrap()
            .append(vec![0xFF], 1)
            .await
            .unwrap();

        let mut actor = Counter::default();
        let journal =
            ActorJournal::new(&provider, &actor, JournalOptions::default())
                .unwrap();
        assert!(matches!(
            journal.replay_unapplied_events(&mut actor).await,
            Err(Error::Codec(_))
        ));
        assert!(!journal.is_replaying());
    }

    /// Yields its first event, then fails.
    struct BrokenJournal;

    #[async_trait]
    impl Journal for BrokenJournal {
        fn stream_id(&self) -> &str {
            "Counter_1"
        }

        async fn append(
            &self,
            payload: Vec<u8>,
            id: u64,
        ) -> Result<Event, Error> {
            Ok(Event::new(id, payload))
        }

        fn read_from(&self, _id: u64) -> EventStream<'_> {
            Box::pin(stream::iter(vec![
                Ok(Event::new(1, add(1).encode().unwrap())),
                Err(Error::Backend("read failed".to_owned())),
            ]))
        }

        async fn clear(&self, _id: u64) -> Result<(), Error> {
            Ok(())
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl JournalProvider for BrokenProvider {
        async fn initialize(
            &mut self,
            _parameters: &Parameters,
        ) -> Result<(), Error> {
            Ok(())
        }

        fn create(&self, _stream_id: &str) -> Result<Box<dyn Journal>, Error> {
            Ok(Box::new(BrokenJournal))
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_replay_read_failure() {
        let mut actor = Counter::default();
        let journal = ActorJournal::new(
            &BrokenProvider,
            &actor,
            JournalOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            journal.replay_unapplied_events(&mut actor).await,
            Err(Error::Backend(_))
        ));
        assert!(!journal.is_replaying());
        assert_eq!(actor.total, 1);
        assert_eq!(actor.state.current_event_id, 1);
        assert!(logs_contain("Can't read stream Counter_1"));
    }

    #[tokio::test]
    async fn test_delete() {
        let provider = provider().await;
        let mut actor = Counter::default();
        let journal =
            ActorJournal::new(&provider, &actor, JournalOptions::default())
                .unwrap();
        for amount in 1..=3 {
            actor.request = Some(add(amount));
            journal.write_journal(&mut actor).await.unwrap();
        }

        journal.delete(&mut actor).await.unwrap();
        assert!(actor.state.cleared);
        assert_eq!(journal.last_journaled_event_id(&actor), 0);
        assert!(provider
            .create("Counter_1")
            .unwrap()
            .read_all_from(0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_activate() {
        let manager = JournalProviderManager::new(
            MemorySettings::new().with("CounterJournal", "Provider=Memory"),
        );
        let mut actor = Counter::default();
        let journal = Arc::new(
            ActorJournal::activate(
                &manager,
                &mut actor,
                JournalOptions::default(),
            )
            .await
            .unwrap(),
        );
        actor.journal = Some(journal.clone());
        actor.add(2).await.unwrap();
        actor.add(3).await.unwrap();
        drop(actor);

        // Same provider, fresh instance: the events are replayed.
        let mut actor = Counter::default();
        let journal = ActorJournal::activate(
            &manager,
            &mut actor,
            JournalOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(actor.total, 5);
        assert_eq!(journal.last_journaled_event_id(&actor), 2);
        assert!(logs_contain("Stream Counter_1 recovering from event 0"));
        assert!(logs_contain("Stream Counter_1 recovered to event 2"));
    }

    #[tokio::test]
    async fn test_activate_without_configuration() {
        let manager = JournalProviderManager::new(MemorySettings::new());
        let mut actor = Counter::default();
        assert!(matches!(
            ActorJournal::activate(
                &manager,
                &mut actor,
                JournalOptions::default()
            )
            .await,
            Err(Error::ProviderConfigurationMissing(_))
        ));
    }
}
