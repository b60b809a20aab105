// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reference-counted pool of [`Connection`]s keyed by host URI, so that
//! multiple queues (and, above this crate, multiple Managers) sharing a
//! broker host reuse one transport instead of dialing one each.

use crate::connection::Connection;
use crate::error::Result;
use std::collections::HashMap;
use tokio::sync::Mutex;

struct PoolEntry {
    connection: Connection,
    ref_count: u32,
}

/// A pool of broker connections, keyed by canonical host URI.
#[derive(Default)]
pub struct ConnectionPool {
    entries: Mutex<HashMap<String, PoolEntry>>,
}

impl ConnectionPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the connection for `uri`, creating and `connect()`-ing it if
    /// this is the first reference, and incrementing its reference count by
    /// `ref_delta`.
    pub async fn get_connection(&self, uri: &str, ref_delta: u32) -> Result<Connection> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(uri) {
            entry.ref_count += ref_delta;
            return Ok(entry.connection.clone());
        }
        let connection = Connection::from_uri(uri)?;
        connection.connect().await?;
        entries.insert(
            uri.to_string(),
            PoolEntry {
                connection: connection.clone(),
                ref_count: ref_delta,
            },
        );
        Ok(connection)
    }

    /// Decrement the reference count for `uri` by `n`, closing and removing
    /// the connection once it reaches zero.
    pub async fn remove_connection(&self, uri: &str, n: u32) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(uri) else {
            return Ok(());
        };
        entry.ref_count = entry.ref_count.saturating_sub(n);
        if entry.ref_count == 0 {
            let entry = entries.remove(uri).expect("just matched above");
            entry.connection.close().await?;
        }
        Ok(())
    }

    /// Current reference count for `uri`, or `0` if not present.
    pub async fn ref_count(&self, uri: &str) -> u32 {
        self.entries
            .lock()
            .await
            .get(uri)
            .map_or(0, |e| e.ref_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ref_counting_removes_at_zero() {
        let pool = ConnectionPool::new();
        assert_eq!(pool.ref_count("amqp://localhost").await, 0);
        // Connection::from_uri dials lazily in the background, so this does
        // not require a reachable broker to exercise the bookkeeping.
        let _ = pool.get_connection("amqp://localhost", 2).await;
        assert_eq!(pool.ref_count("amqp://localhost").await, 2);
        let _ = pool.remove_connection("amqp://localhost", 1).await;
        assert_eq!(pool.ref_count("amqp://localhost").await, 1);
        let _ = pool.remove_connection("amqp://localhost", 1).await;
        assert_eq!(pool.ref_count("amqp://localhost").await, 0);
    }
}
