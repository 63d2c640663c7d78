// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Memory journal implementation.
//!

use crate::{
    config::Parameters,
    error::Error,
    event::Event,
    journal::{EventStream, Journal},
    provider::JournalProvider,
};

use async_trait::async_trait;
use futures::stream;
use tracing::debug;

use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::{Arc, RwLock},
};

type StreamData = Arc<RwLock<BTreeMap<u64, Vec<u8>>>>;

type MemoryData = Arc<RwLock<HashMap<String, StreamData>>>;

/// A provider whose journals live in memory.
///
/// Journals created for the same stream id share their events, so an actor that is
/// re-activated against the same provider instance replays what it wrote before.
#[derive(Default, Clone)]
pub struct MemoryJournalProvider {
    streams: MemoryData,
    initialized: bool,
}

impl MemoryJournalProvider {
    /// Provider type identifier.
    pub const TYPE_NAME: &'static str = "Memory";
}

#[async_trait]
impl JournalProvider for MemoryJournalProvider {
    async fn initialize(&mut self, parameters: &Parameters) -> Result<(), Error> {
        if self.initialized {
            return Err(Error::ProviderInitialization(
                "Instance already initialized.".to_owned(),
            ));
        }
        debug!("Memory journal provider initialized with {}", parameters);
        self.initialized = true;
        Ok(())
    }

    fn create(&self, stream_id: &str) -> Result<Box<dyn Journal>, Error> {
        if !self.initialized {
            return Err(Error::ProviderNotInitialized(Self::TYPE_NAME.to_owned()));
        }
        let mut streams = self.streams.write().map_err(|e| {
            Error::Backend(format!("Can not lock provider data: {}", e))
        })?;
        let events = streams.entry(stream_id.to_owned()).or_default().clone();
        Ok(Box::new(MemoryJournal {
            stream_id: stream_id.to_owned(),
            events,
        }))
    }
}

/// A journal that stores its events in memory.
pub struct MemoryJournal {
    stream_id: String,
    events: StreamData,
}

#[async_trait]
impl Journal for MemoryJournal {
    fn stream_id(&self) -> &str {
        &self.stream_id
    }

    async fn append(&self, payload: Vec<u8>, id: u64) -> Result<Event, Error> {
        let mut lock = self
            .events
            .write()
            .map_err(|e| Error::Backend(format!("Can not lock data: {}", e)))?;
        if lock.contains_key(&id) {
            return Err(Error::DuplicateEvent {
                stream: self.stream_id.clone(),
                id,
            });
        }
        lock.insert(id, payload.clone());
        Ok(Event::new(id, payload))
    }

    fn read_from(&self, id: u64) -> EventStream<'_> {
        let events = self.events.clone();
        // The cursor is the last yielded id; `None` once the stream has failed.
        Box::pin(stream::unfold(Some(id), move |cursor| {
            let events = events.clone();
            async move {
                let Some(cursor) = cursor else {
                    return None;
                };
                let next = match events.read() {
                    Ok(lock) => lock
                        .range((Bound::Excluded(cursor), Bound::Unbounded))
                        .next()
                        .map(|(id, payload)| Event::new(*id, payload.clone())),
                    Err(e) => {
                        return Some((
                            Err(Error::Backend(format!(
                                "Can not lock data: {}",
                                e
                            ))),
                            None,
                        ))
                    }
                };
                next.map(|event| {
                    let id = event.id;
                    (Ok(event), Some(id))
                })
            }
        }))
    }

    async fn clear(&self, id: u64) -> Result<(), Error> {
        let mut lock = self
            .events
            .write()
            .map_err(|e| Error::Backend(format!("Can not lock data: {}", e)))?;
        lock.retain(|key, _| *key > id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_journal_trait;

    use futures::StreamExt;

    test_journal_trait! {
        unit_test_memory_journal: MemoryJournalProvider::default(),
            Parameters::parse("Provider=Memory")
    }

    #[tokio::test]
    async fn test_read_is_lazy() {
        let mut provider = MemoryJournalProvider::default();
        provider.initialize(&Parameters::default()).await.unwrap();
        let journal = provider.create("stream").unwrap();
        journal.append(vec![1], 1).await.unwrap();

        let mut events = journal.read_from(0);
        assert_eq!(events.next().await.unwrap().unwrap().id, 1);
        // Appended after the read started but past the cursor: observed, in order.
        journal.append(vec![2], 2).await.unwrap();
        assert_eq!(events.next().await.unwrap().unwrap().id, 2);
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_streams() {
        let mut provider = MemoryJournalProvider::default();
        provider.initialize(&Parameters::default()).await.unwrap();
        let other = provider.clone();
        provider.create("a").unwrap().append(vec![], 1).await.unwrap();
        let events = other.create("a").unwrap().read_all_from(0).await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
