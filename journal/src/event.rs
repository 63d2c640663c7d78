// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Event and stream model.
//!
//! An [`Event`] is an immutable `(id, payload)` pair appended to the stream of one actor
//! instance. Identifiers are assigned by the writer, start at 1 and grow by one per append.
//!
//! The payload of every event written by an [`ActorJournal`](crate::ActorJournal) is an
//! encoded [`MethodInvocation`]: the call that was in flight when the event was journaled.
//!

use crate::error::Error;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// A journaled event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Identifier, unique within its stream.
    pub id: u64,
    /// Raw event payload.
    pub payload: Vec<u8>,
}

impl Event {
    /// Creates a new event.
    pub fn new(id: u64, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Decodes the payload as a method invocation.
    pub fn invocation(&self) -> Result<MethodInvocation, Error> {
        MethodInvocation::decode(&self.payload)
    }
}

/// The identity of an actor instance.
///
/// The optional extension distinguishes instances sharing the same primary key.
/// A blank extension is the same as no extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActorIdentity {
    /// Primary key of the instance.
    pub primary_key: String,
    /// Optional sub-identity.
    pub extension: Option<String>,
}

impl ActorIdentity {
    /// Creates an identity without extension.
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            extension: None,
        }
    }

    /// Sets the extension.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// Returns the extension, if any and not blank.
    pub fn extension(&self) -> Option<&str> {
        self.extension
            .as_deref()
            .filter(|extension| !extension.trim().is_empty())
    }
}

/// Derives the stream id of an actor instance.
///
/// The format is `{type_name}_{primary_key}`, followed by `_{extension}` when the
/// identity carries a non-blank extension.
pub fn stream_id(type_name: &str, identity: &ActorIdentity) -> String {
    match identity.extension() {
        Some(extension) => {
            format!("{}_{}_{}", type_name, identity.primary_key, extension)
        }
        None => format!("{}_{}", type_name, identity.primary_key),
    }
}

/// Formats an event id as a sort key: 16 upper-case hex digits, zero-padded.
///
/// Lexicographic order of the keys equals numeric order of the ids.
pub fn event_key(id: u64) -> String {
    format!("{:016X}", id)
}

/// Parses a sort key produced by [`event_key`].
pub fn parse_event_key(key: &str) -> Result<u64, Error> {
    u64::from_str_radix(key, 16)
        .map_err(|e| Error::Backend(format!("Invalid event key {}: {}", key, e)))
}

/// A call made against an actor.
///
/// Arguments are opaque to the journal: each one is encoded on its own by the host.
/// [`MethodInvocation::with_argument`] and [`MethodInvocation::argument`] encode and
/// decode them with the same codec as the invocation itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MethodInvocation {
    /// Identifier of the interface the method belongs to.
    pub interface_id: i32,
    /// Identifier of the method within the interface.
    pub method_id: i32,
    /// Encoded arguments, in call order.
    pub arguments: Vec<Vec<u8>>,
}

impl MethodInvocation {
    /// Creates an invocation without arguments.
    pub fn new(interface_id: i32, method_id: i32) -> Self {
        Self {
            interface_id,
            method_id,
            arguments: Vec::new(),
        }
    }

    /// Appends an argument.
    ///
    /// # Errors
    ///
    /// `Error::Codec` if the argument can't be encoded.
    ///
    pub fn with_argument<T: Serialize>(
        mut self,
        argument: &T,
    ) -> Result<Self, Error> {
        self.arguments.push(bincode::serialize(argument)?);
        Ok(self)
    }

    /// Decodes the argument at `index`.
    ///
    /// # Errors
    ///
    /// `Error::Codec` if there is no such argument or it can't be decoded as `T`.
    ///
    pub fn argument<T: DeserializeOwned>(&self, index: usize) -> Result<T, Error> {
        let bytes = self.arguments.get(index).ok_or_else(|| {
            Error::Codec(format!(
                "Invocation {}:{} has no argument {}",
                self.interface_id, self.method_id, index
            ))
        })?;
        Ok(bincode::deserialize(bytes)?)
    }

    /// Encodes the invocation as an event payload.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(bincode::serialize(self)?)
    }

    /// Decodes an invocation from an event payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_id() {
        let identity = ActorIdentity::new("42");
        assert_eq!(stream_id("app::Stack", &identity), "app::Stack_42");

        let identity = ActorIdentity::new("42").with_extension("eu");
        assert_eq!(stream_id("app::Stack", &identity), "app::Stack_42_eu");

        let identity = ActorIdentity::new("42").with_extension("  ");
        assert_eq!(stream_id("app::Stack", &identity), "app::Stack_42");
    }

    #[test]
    fn test_event_key_order() {
        assert_eq!(event_key(0), "0000000000000000");
        assert_eq!(event_key(255), "00000000000000FF");
        assert_eq!(event_key(u64::MAX), "FFFFFFFFFFFFFFFF");
        assert!(event_key(9) < event_key(10));
        assert!(event_key(0xFF) < event_key(0x100));
        assert_eq!(parse_event_key(&event_key(12345)).unwrap(), 12345);
        assert!(parse_event_key("not-hex").is_err());
    }

    #[test]
    fn test_invocation_arguments() {
        let invocation = MethodInvocation::new(1, 2)
            .with_argument(&7i32)
            .unwrap()
            .with_argument(&"text".to_owned())
            .unwrap();
        let event = Event::new(1, invocation.encode().unwrap());
        let decoded = event.invocation().unwrap();
        assert_eq!(decoded, invocation);
        assert_eq!(decoded.argument::<i32>(0).unwrap(), 7);
        assert_eq!(decoded.argument::<String>(1).unwrap(), "text");
        assert!(matches!(decoded.argument::<i32>(2), Err(Error::Codec(_))));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            MethodInvocation::decode(&[0xFF]),
            Err(Error::Codec(_))
        ));
    }
}
