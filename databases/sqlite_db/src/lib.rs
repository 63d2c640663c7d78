// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # SQLite database module.
//!
//! This module contains the SQLite journal provider.
//!

mod sqlite;

pub use sqlite::{SqliteJournal, SqliteJournalProvider};
