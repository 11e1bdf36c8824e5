// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Broker-side half of the token ledger.
//!
//! One ledger per client session, one integer balance per consumed source.
//! A balance is decremented exactly once when a frame is accepted for
//! dispatch and incremented exactly once when a response carrying
//! `return_token = true` is sent. The client mirrors these balances
//! independently; the two sides stay consistent purely by protocol
//! discipline.

use std::collections::HashMap;

/// Outcome of an admission attempt against a ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeOutcome {
    /// Balance decremented; the frame may proceed to the dispatcher
    Taken,
    /// The source has no balance entry (not consumed by any worker)
    NoSource,
    /// The balance was zero
    Empty,
}

/// Per-session token balances, keyed by source name.
#[derive(Debug, Default)]
pub struct TokenLedger {
    balances: HashMap<String, u32>,
}

impl TokenLedger {
    pub fn new() -> Self {
        TokenLedger {
            balances: HashMap::new(),
        }
    }

    /// Install a full balance for a newly consumed source.
    pub fn seed(&mut self, source_name: &str, tokens: u32) {
        self.balances.insert(source_name.to_string(), tokens);
    }

    /// Drop the balance entry when a source stops being consumed.
    pub fn remove(&mut self, source_name: &str) {
        self.balances.remove(source_name);
    }

    pub fn balance(&self, source_name: &str) -> Option<u32> {
        self.balances.get(source_name).copied()
    }

    /// Decrement the balance for one accepted frame.
    pub fn try_take(&mut self, source_name: &str) -> TakeOutcome {
        match self.balances.get_mut(source_name) {
            None => TakeOutcome::NoSource,
            Some(0) => TakeOutcome::Empty,
            Some(balance) => {
                *balance -= 1;
                TakeOutcome::Taken
            }
        }
    }

    /// Return one token for a resolved frame.
    ///
    /// Returns false when the source's entry no longer exists (the source was
    /// deregistered while the frame was in flight); the token is then
    /// intentionally dropped with the entry.
    pub fn put(&mut self, source_name: &str) -> bool {
        match self.balances.get_mut(source_name) {
            Some(balance) => {
                *balance += 1;
                true
            }
            None => false,
        }
    }
}
