//! The state counter: a cumulative fingerprint of everything we have seen.
//!
//! The counter is the wraparound sum of the ids of every message this
//! process has applied or acknowledged observing. Two peers whose counters
//! are equal have (very probably) seen the same history; the counter is
//! only ever compared for equality, never used to reconstruct anything.
//! The sum is not collision-proof: distinct histories can sum equal. That
//! is an accepted property of the scheme.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use parley_core::Message;

use crate::error::{Result, StoreError};
use crate::migration::{self, Schema};

const COUNTER_KEY: &str = "counter";

/// Durable, cached state counter.
///
/// Reads come from the in-memory cache; every update writes through to
/// disk synchronously and rolls the cache back if the write fails.
pub struct StateCell {
    inner: Mutex<StateInner>,
}

struct StateInner {
    conn: Connection,
    cached: u64,
}

impl StateCell {
    /// Open or create the state database at the given path and cache the
    /// stored counter (a missing record reads as zero).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn, Schema::State)?;
        let cached = load(&conn)?;
        Ok(Self {
            inner: Mutex::new(StateInner { conn, cached }),
        })
    }

    /// Open an in-memory state cell. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn, Schema::State)?;
        let cached = load(&conn)?;
        Ok(Self {
            inner: Mutex::new(StateInner { conn, cached }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, StateInner>> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// The current counter value.
    pub fn current(&self) -> Result<u64> {
        Ok(self.lock()?.cached)
    }

    /// Record that `msg` has been observed: advance the counter by its id
    /// (mod 2^64) and persist. As a side effect the *pre-update* counter
    /// value is written into `msg.state_at` for the orchestrator's use.
    ///
    /// If the write fails, the cache is rolled back to its prior value,
    /// `msg` is left untouched, and the error is returned.
    pub fn update(&self, msg: &mut Message) -> Result<()> {
        let mut inner = self.lock()?;
        let original = inner.cached;
        inner.cached = original.wrapping_add(msg.id.as_u64());

        if let Err(err) = save(&inner.conn, inner.cached) {
            inner.cached = original;
            return Err(err);
        }

        msg.state_at = original;
        Ok(())
    }

    /// Close the underlying database connection.
    pub fn close(self) -> Result<()> {
        let inner = self.inner.into_inner().map_err(|_| StoreError::LockPoisoned)?;
        inner
            .conn
            .close()
            .map_err(|(_, err)| StoreError::Database(err))
    }
}

fn load(conn: &Connection) -> Result<u64> {
    let value: Option<Vec<u8>> = conn
        .query_row(
            "SELECT value FROM state WHERE key = ?1",
            params![COUNTER_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        Some(bytes) => {
            let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                StoreError::Migration(format!(
                    "state counter has {} bytes, expected 8",
                    bytes.len()
                ))
            })?;
            Ok(u64::from_le_bytes(arr))
        }
        None => Ok(0),
    }
}

fn save(conn: &Connection, value: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![COUNTER_KEY, value.to_le_bytes().to_vec()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::MessageId;
    use tempfile::TempDir;

    fn msg_with_id(id: u64) -> Message {
        let mut msg = Message::new(vec![]);
        msg.id = MessageId(id);
        msg
    }

    #[test]
    fn test_opens_at_zero() {
        let state = StateCell::open_memory().unwrap();
        assert_eq!(state.current().unwrap(), 0);
    }

    #[test]
    fn test_update_accumulates() {
        let state = StateCell::open_memory().unwrap();

        state.update(&mut msg_with_id(20)).unwrap();
        state.update(&mut msg_with_id(30)).unwrap();
        state.update(&mut msg_with_id(40)).unwrap();

        assert_eq!(state.current().unwrap(), 90);
    }

    #[test]
    fn test_update_sets_state_at_to_pre_update_value() {
        let state = StateCell::open_memory().unwrap();

        let mut first = msg_with_id(20);
        state.update(&mut first).unwrap();
        assert_eq!(first.state_at, 0);

        let mut second = msg_with_id(30);
        state.update(&mut second).unwrap();
        assert_eq!(second.state_at, 20);
    }

    #[test]
    fn test_update_wraps_around() {
        let state = StateCell::open_memory().unwrap();

        state.update(&mut msg_with_id(u64::MAX)).unwrap();
        state.update(&mut msg_with_id(2)).unwrap();

        assert_eq!(state.current().unwrap(), 1);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.db");

        let state = StateCell::open(&path).unwrap();
        state.update(&mut msg_with_id(50)).unwrap();
        state.close().unwrap();

        let state = StateCell::open(&path).unwrap();
        assert_eq!(state.current().unwrap(), 50);
    }
}
