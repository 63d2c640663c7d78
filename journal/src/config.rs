// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Journal configuration.
//!
//! A journal provider is selected and parametrized by a flat configuration string:
//!
//! ```text
//! Provider=Sqlite;Table=grainJournal;ConnectionStringSetting=JournalConnection
//! ```
//!
//! Entries are `Key=Value` pairs separated by `;`. The reserved key `Provider` holds the
//! provider type identifier; every other key is handed to the provider as a parameter.
//! Parsing never fails: a bare token becomes a key with an empty value, stray separators
//! are skipped and a value runs up to the next `;`, so it may itself contain `=`. When a
//! key repeats, the last occurrence wins.
//!
//! Configuration strings are found by provider name through a [`Settings`] lookup. The
//! default lookup reads the process environment.
//!

use crate::error::Error;

use std::{
    collections::{BTreeMap, HashMap},
    convert::Infallible,
    fmt,
    str::FromStr,
};

/// Reserved key holding the provider type identifier.
pub const PROVIDER_KEY: &str = "Provider";

/// Default number of journal writes between two snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: u32 = 100;

/// Provider parameters parsed from a configuration string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    entries: BTreeMap<String, String>,
}

impl Parameters {
    /// Parses a configuration string.
    pub fn parse(configuration: &str) -> Self {
        let mut entries = BTreeMap::new();
        let mut rest = configuration;
        while let Some(start) = rest.find(|c| c != '=' && c != ';') {
            rest = &rest[start..];
            let end = rest.find(['=', ';']).unwrap_or(rest.len());
            let key = &rest[..end];
            rest = &rest[end..];
            let value = match rest.strip_prefix('=') {
                Some(tail) => {
                    let end = tail.find(';').unwrap_or(tail.len());
                    rest = &tail[end..];
                    &tail[..end]
                }
                None => "",
            };
            entries.insert(key.to_owned(), value.to_owned());
        }
        Self { entries }
    }

    /// Returns the provider type identifier, if present.
    pub fn provider(&self) -> Option<&str> {
        self.get(PROVIDER_KEY)
    }

    /// Returns the value of a parameter.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns the value of a parameter that must be present and not blank.
    ///
    /// # Errors
    ///
    /// `Error::ProviderInitialization` naming the parameter.
    ///
    pub fn require(&self, key: &str) -> Result<&str, Error> {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(Error::ProviderInitialization(format!(
                "missing required parameter {}",
                key
            ))),
        }
    }

    /// Returns `true` if the parameter is `true`, ignoring case.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromStr for Parameters {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                write!(f, ";")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Settings lookup: returns the configuration string registered under a name.
pub trait Settings: Send + Sync {
    /// Returns the setting, or `None` if it is not defined.
    fn setting(&self, name: &str) -> Option<String>;
}

impl<F> Settings for F
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn setting(&self, name: &str) -> Option<String> {
        self(name)
    }
}

/// Settings read from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSettings;

impl Settings for EnvSettings {
    fn setting(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Settings held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    values: HashMap<String, String>,
}

impl MemorySettings {
    /// Creates empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a setting.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a setting.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }
}

impl Settings for MemorySettings {
    fn setting(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Per-actor journal options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalOptions {
    /// Journal writes between two snapshots. Zero disables periodic snapshots.
    pub snapshot_interval: u32,
}

impl JournalOptions {
    /// Sets the number of journal writes between two snapshots.
    pub fn with_snapshot_interval(mut self, snapshot_interval: u32) -> Self {
        self.snapshot_interval = snapshot_interval;
        self
    }
}

impl Default for JournalOptions {
    fn default() -> Self {
        Self {
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
        }
    }
}
