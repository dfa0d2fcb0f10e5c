//! The durable outbound queue.
//!
//! Messages land here when they are applied locally and leave only when a
//! remote peer explicitly acknowledges receipt. Emptiness is a normal
//! state, not a failure: `peek` and `dequeue` return `Ok(None)` on an
//! empty queue.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use parley_core::Message;

use crate::error::{Result, StoreError};
use crate::migration::{self, Schema};

/// Durable FIFO of messages awaiting remote acknowledgment.
///
/// Thread-safe via an internal mutex; every enqueued message survives
/// process restart until it is explicitly dequeued.
pub struct SyncQueue {
    conn: Mutex<Connection>,
}

impl SyncQueue {
    /// Open or create a queue database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn, Schema::Queue)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory queue. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn, Schema::Queue)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Add a message to the end of the queue.
    pub fn enqueue(&self, msg: &Message) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_queue (body) VALUES (?1)",
            params![msg.encode()],
        )?;
        Ok(())
    }

    /// Look at the next message without removing it.
    pub fn peek(&self) -> Result<Option<Message>> {
        let conn = self.lock()?;
        let body: Option<Vec<u8>> = conn
            .query_row(
                "SELECT body FROM sync_queue ORDER BY id ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|b| Message::decode(&b).map_err(StoreError::from))
            .transpose()
    }

    /// Remove and return the oldest message.
    pub fn dequeue(&self) -> Result<Option<Message>> {
        let conn = self.lock()?;
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT id, body FROM sync_queue ORDER BY id ASC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (id, body) = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        Ok(Some(Message::decode(&body)?))
    }

    /// Number of messages currently enqueued.
    pub fn size(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Close the underlying database connection.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner().map_err(|_| StoreError::LockPoisoned)?;
        conn.close().map_err(|(_, err)| StoreError::Database(err))
    }
}
