// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Journal contract.
//!
//! A [`Journal`] is the append-only, ordered log of one stream. Backends implement it and
//! hand out instances through a [`JournalProvider`](crate::JournalProvider).
//!
//! ## Contract
//!
//! - **append** stores an event under the stream keyed by its id. An id that already
//!   exists in the stream must fail with [`Error::DuplicateEvent`] and leave the stored
//!   event untouched. Every backend enforces this, whether by an explicit check or by a
//!   uniqueness constraint of the storage layer.
//! - **read_from** yields every event with an id strictly greater than the given one, in
//!   strictly increasing id order. The stream is lazy and ends after the last stored event.
//!   A storage failure is yielded as an `Err` item, after which the stream ends. Events
//!   appended to the same stream during a read may or may not be observed, but already
//!   yielded events are never reordered.
//! - **clear** deletes every event with an id lower than or equal to the given one. No
//!   matching events is not an error. Backends with batch limits chunk the deletion.
//!
//! The [`test_journal_trait!`](crate::test_journal_trait) macro checks a provider
//! against this contract.
//!

use crate::{error::Error, event::Event};

use async_trait::async_trait;
use futures::{stream::BoxStream, TryStreamExt};

/// Ordered sequence of events returned by [`Journal::read_from`].
pub type EventStream<'a> = BoxStream<'a, Result<Event, Error>>;

/// Append-only event log of one stream.
#[async_trait]
pub trait Journal: Send + Sync {
    /// The stream this journal is bound to.
    fn stream_id(&self) -> &str;

    /// Appends an event.
    ///
    /// # Arguments
    ///
    /// - payload: The event payload.
    /// - id: The event id, assigned by the writer.
    ///
    /// # Returns
    ///
    /// The stored event.
    ///
    /// # Errors
    ///
    /// `Error::DuplicateEvent` if `id` already exists in the stream, `Error::Backend` if
    /// the storage layer fails.
    ///
    async fn append(&self, payload: Vec<u8>, id: u64) -> Result<Event, Error>;

    /// Returns the events with an id strictly greater than `id`, in increasing id order.
    fn read_from(&self, id: u64) -> EventStream<'_>;

    /// Deletes every event with an id lower than or equal to `id`.
    ///
    /// # Errors
    ///
    /// `Error::Backend` if the storage layer fails.
    ///
    async fn clear(&self, id: u64) -> Result<(), Error>;

    /// Collects the events with an id strictly greater than `id`.
    async fn read_all_from(&self, id: u64) -> Result<Vec<Event>, Error> {
        self.read_from(id).try_collect().await
    }
}

/// Generates the journal contract tests for a provider.
///
/// The first argument names the generated module, the second builds a fresh, not yet
/// initialized provider, and the third gives the parameters to initialize it with. Both
/// expressions are evaluated once per test.
///
/// ```ignore
/// test_journal_trait! {
///     memory_journal: MemoryJournalProvider::default(), Parameters::parse("Provider=Memory")
/// }
/// ```
#[macro_export]
macro_rules! test_journal_trait {
    ($name:ident: $provider:expr, $params:expr) => {
        #[cfg(test)]
        mod $name {
            use super::*;
            use $crate::{Error, Journal, JournalProvider};

            async fn initialized() -> Box<dyn JournalProvider> {
                let mut provider: Box<dyn JournalProvider> =
                    Box::new($provider);
                provider.initialize(&$params).await.unwrap();
                provider
            }

            fn ids(events: &[$crate::Event]) -> Vec<u64> {
                events.iter().map(|event| event.id).collect()
            }

            #[tokio::test]
            async fn test_append_and_read() {
                let provider = initialized().await;
                let journal = provider.create("stream").unwrap();
                assert_eq!(journal.stream_id(), "stream");
                for id in 1..=3u64 {
                    let event =
                        journal.append(vec![id as u8; 3], id).await.unwrap();
                    assert_eq!(event.id, id);
                    assert_eq!(event.payload, vec![id as u8; 3]);
                }
                let events = journal.read_all_from(0).await.unwrap();
                assert_eq!(ids(&events), vec![1, 2, 3]);
                assert_eq!(events[1].payload, vec![2u8; 3]);
            }

            #[tokio::test]
            async fn test_read_from_is_exclusive() {
                let provider = initialized().await;
                let journal = provider.create("stream").unwrap();
                for id in 1..=5u64 {
                    journal.append(vec![], id).await.unwrap();
                }
                let events = journal.read_all_from(3).await.unwrap();
                assert_eq!(ids(&events), vec![4, 5]);
                let events = journal.read_all_from(5).await.unwrap();
                assert!(events.is_empty());
            }

            #[tokio::test]
            async fn test_read_empty_stream() {
                let provider = initialized().await;
                let journal = provider.create("empty").unwrap();
                assert!(journal.read_all_from(0).await.unwrap().is_empty());
            }

            #[tokio::test]
            async fn test_read_orders_out_of_order_appends() {
                let provider = initialized().await;
                let journal = provider.create("stream").unwrap();
                journal.append(vec![3], 300).await.unwrap();
                journal.append(vec![1], 1).await.unwrap();
                journal.append(vec![2], 16).await.unwrap();
                let events = journal.read_all_from(0).await.unwrap();
                assert_eq!(ids(&events), vec![1, 16, 300]);
            }

            #[tokio::test]
            async fn test_duplicate_event() {
                let provider = initialized().await;
                let journal = provider.create("stream").unwrap();
                journal.append(b"first".to_vec(), 1).await.unwrap();
                let result = journal.append(b"second".to_vec(), 1).await;
                assert_eq!(
                    result,
                    Err(Error::DuplicateEvent {
                        stream: "stream".to_owned(),
                        id: 1
                    })
                );
                let events = journal.read_all_from(0).await.unwrap();
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].payload, b"first".to_vec());
            }

            #[tokio::test]
            async fn test_clear() {
                let provider = initialized().await;
                let journal = provider.create("stream").unwrap();
                for id in 1..=4u64 {
                    journal.append(vec![], id).await.unwrap();
                }
                journal.clear(2).await.unwrap();
                let events = journal.read_all_from(0).await.unwrap();
                assert_eq!(ids(&events), vec![3, 4]);
                journal.clear(10).await.unwrap();
                assert!(journal.read_all_from(0).await.unwrap().is_empty());
            }

            #[tokio::test]
            async fn test_clear_without_events() {
                let provider = initialized().await;
                let journal = provider.create("stream").unwrap();
                journal.clear(0).await.unwrap();
                journal.clear(u64::MAX).await.unwrap();
                assert!(journal.read_all_from(0).await.unwrap().is_empty());
            }

            #[tokio::test]
            async fn test_clear_many_events() {
                let provider = initialized().await;
                let journal = provider.create("stream").unwrap();
                for id in 1..=250u64 {
                    journal.append(vec![], id).await.unwrap();
                }
                journal.clear(249).await.unwrap();
                let events = journal.read_all_from(0).await.unwrap();
                assert_eq!(ids(&events), vec![250]);
            }

            #[tokio::test]
            async fn test_streams_are_isolated() {
                let provider = initialized().await;
                let first = provider.create("first").unwrap();
                let second = provider.create("second").unwrap();
                first.append(vec![1], 1).await.unwrap();
                second.append(vec![2], 1).await.unwrap();
                second.append(vec![2], 2).await.unwrap();
                first.clear(5).await.unwrap();
                assert!(first.read_all_from(0).await.unwrap().is_empty());
                assert_eq!(
                    ids(&second.read_all_from(0).await.unwrap()),
                    vec![1, 2]
                );
            }

            #[tokio::test]
            async fn test_recreated_journal_sees_events() {
                let provider = initialized().await;
                let journal = provider.create("stream").unwrap();
                journal.append(vec![1], 1).await.unwrap();
                drop(journal);
                let journal = provider.create("stream").unwrap();
                assert_eq!(ids(&journal.read_all_from(0).await.unwrap()), vec![1]);
                assert!(matches!(
                    journal.append(vec![1], 1).await,
                    Err(Error::DuplicateEvent { .. })
                ));
            }

            #[tokio::test]
            async fn test_initialize_twice() {
                let mut provider: Box<dyn JournalProvider> =
                    Box::new($provider);
                let parameters = $params;
                provider.initialize(&parameters).await.unwrap();
                assert!(matches!(
                    provider.initialize(&parameters).await,
                    Err(Error::ProviderInitialization(_))
                ));
            }

            #[tokio::test]
            async fn test_create_before_initialize() {
                let provider: Box<dyn JournalProvider> = Box::new($provider);
                assert!(matches!(
                    provider.create("stream"),
                    Err(Error::ProviderNotInitialized(_))
                ));
            }
        }
    };
}
