// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Client-side half of the token ledger.
//!
//! One counting bucket per source, seeded from the server's welcome. The
//! producer scheduler suspends on [`TokenBucket::take`] until a token is
//! available; every response with `return_token` puts one back. A reconnect
//! rebuilds all buckets from the next welcome, discarding local debt.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

/// A bounded counting semaphore over one source's tokens.
pub struct TokenBucket {
    permits: Semaphore,
}

impl TokenBucket {
    pub fn new(tokens: u32) -> Self {
        TokenBucket {
            permits: Semaphore::new(tokens as usize),
        }
    }

    /// Take one token, suspending until one is available.
    pub async fn take(&self) {
        // The semaphore is never closed, so acquire can only succeed
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }

    /// Return one token, waking one waiter.
    pub fn put(&self) {
        self.permits.add_permits(1);
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Registry of per-source buckets shared between the producer tasks and the
/// consumer loop.
#[derive(Default)]
pub struct TokenBuckets {
    inner: Mutex<HashMap<String, Arc<TokenBucket>>>,
    changed: Notify,
}

impl TokenBuckets {
    pub fn new() -> Self {
        TokenBuckets::default()
    }

    /// Install a bucket for a newly advertised source. Existing buckets are
    /// left untouched so a mid-session welcome cannot mint tokens.
    pub fn seed(&self, source_name: &str, tokens: u32) {
        let mut inner = self.inner.lock();
        if !inner.contains_key(source_name) {
            inner.insert(source_name.to_string(), Arc::new(TokenBucket::new(tokens)));
            drop(inner);
            self.changed.notify_waiters();
        }
    }

    /// Drop every bucket; the next welcome reseeds them. Used across
    /// reconnects so local token debt is discarded.
    pub fn reset(&self) {
        self.inner.lock().clear();
        self.changed.notify_waiters();
    }

    pub fn get(&self, source_name: &str) -> Option<Arc<TokenBucket>> {
        self.inner.lock().get(source_name).cloned()
    }

    /// Suspend until a bucket for the source exists.
    pub async fn wait_for(&self, source_name: &str) -> Arc<TokenBucket> {
        loop {
            // Register before checking so a concurrent seed cannot be lost
            let notified = self.changed.notified();
            if let Some(bucket) = self.get(source_name) {
                return bucket;
            }
            notified.await;
        }
    }

    /// Return a token to the source's current bucket, if it exists.
    pub fn release(&self, source_name: &str) {
        if let Some(bucket) = self.get(source_name) {
            bucket.put();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn take_blocks_until_put() {
        let bucket = Arc::new(TokenBucket::new(1));
        bucket.take().await;
        assert_eq!(bucket.available(), 0);

        let waiter = {
            let bucket = Arc::clone(&bucket);
            tokio::spawn(async move {
                bucket.take().await;
            })
        };
        // The waiter cannot finish until a token is returned.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        bucket.put();
        waiter.await.unwrap();
        assert_eq!(bucket.available(), 0);
    }

    #[tokio::test]
    async fn wait_for_resolves_after_seed() {
        let buckets = Arc::new(TokenBuckets::new());
        let waiter = {
            let buckets = Arc::clone(&buckets);
            tokio::spawn(async move { buckets.wait_for("camera").await.available() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        buckets.seed("camera", 3);
        assert_eq!(waiter.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn reseed_does_not_mint_tokens() {
        let buckets = TokenBuckets::new();
        buckets.seed("camera", 2);
        let bucket = buckets.get("camera").unwrap();
        bucket.take().await;

        // A repeated welcome mid-session leaves the balance alone.
        buckets.seed("camera", 2);
        assert_eq!(buckets.get("camera").unwrap().available(), 1);

        // A reconnect reset rebuilds from scratch.
        buckets.reset();
        buckets.seed("camera", 2);
        assert_eq!(buckets.get("camera").unwrap().available(), 2);
    }
}
