//! The history stack: applied messages kept for conflict arbitration.
//!
//! Newest first. History exists to explain the operations this process
//! actually performed; it is consulted when peers have diverged and is
//! cleared outright once both peers' state counters are observed equal,
//! because at that point no latent conflict can remain.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use parley_core::Message;

use crate::error::{Result, StoreError};
use crate::migration::{self, Schema};

/// Durable LIFO of applied messages.
///
/// Thread-safe via an internal mutex. The same mutex backs [`HistoryIter`],
/// so an open iterator blocks every concurrent `push`/`pop`/`clear` until
/// it is dropped.
pub struct HistoryStack {
    conn: Mutex<Connection>,
}

impl HistoryStack {
    /// Open or create a history database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn, Schema::History)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory history. Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn, Schema::History)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Add a message to the top of the stack.
    pub fn push(&self, msg: &Message) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO history (body) VALUES (?1)",
            params![msg.encode()],
        )?;
        Ok(())
    }

    /// Remove and return the newest message.
    pub fn pop(&self) -> Result<Option<Message>> {
        let conn = self.lock()?;
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT id, body FROM history ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (id, body) = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        conn.execute("DELETE FROM history WHERE id = ?1", params![id])?;
        Ok(Some(Message::decode(&body)?))
    }

    /// Look at the newest message without removing it.
    pub fn peek(&self) -> Result<Option<Message>> {
        self.peek_by_offset(0)
    }

    /// Look at the message `offset` entries below the top (0 = newest).
    pub fn peek_by_offset(&self, offset: u64) -> Result<Option<Message>> {
        let conn = self.lock()?;
        peek_at(&conn, offset)
    }

    /// Number of messages in the stack.
    pub fn size(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Drop every entry. The stack is immediately reusable.
    pub fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM history", [])?;
        Ok(())
    }

    /// Begin iterating from newest to oldest.
    ///
    /// The iterator holds the store's lock for its whole lifetime, so the
    /// walk sees a stable snapshot; callers must keep that lifetime short
    /// (it is bounded by history size and decision-callback cost). The lock
    /// is released when the iterator is dropped, on every exit path.
    pub fn iter(&self) -> Result<HistoryIter<'_>> {
        let conn = self.lock()?;
        Ok(HistoryIter { conn, offset: 0 })
    }

    /// Close the underlying database connection.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner().map_err(|_| StoreError::LockPoisoned)?;
        conn.close().map_err(|(_, err)| StoreError::Database(err))
    }
}

fn peek_at(conn: &Connection, offset: u64) -> Result<Option<Message>> {
    // SQLite offsets are i64; anything larger is past the end of any
    // possible stack.
    let offset = match i64::try_from(offset) {
        Ok(offset) => offset,
        Err(_) => return Ok(None),
    };

    let body: Option<Vec<u8>> = conn
        .query_row(
            "SELECT body FROM history ORDER BY id DESC LIMIT 1 OFFSET ?1",
            params![offset],
            |row| row.get(0),
        )
        .optional()?;

    body.map(|b| Message::decode(&b).map_err(StoreError::from))
        .transpose()
}

/// A locked walk over the history stack, newest to oldest.
pub struct HistoryIter<'a> {
    conn: MutexGuard<'a, Connection>,
    offset: u64,
}

impl HistoryIter<'_> {
    /// The next message, or `None` once the walk reaches the oldest entry.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Message>> {
        let msg = peek_at(&self.conn, self.offset)?;
        if msg.is_some() {
            self.offset += 1;
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn msg(payload: &[u8]) -> Message {
        Message::new(payload.to_vec())
    }

    #[test]
    fn test_lifo_order() {
        let stack = HistoryStack::open_memory().unwrap();
        let (m1, m2, m3) = (msg(b"one"), msg(b"two"), msg(b"three"));

        stack.push(&m1).unwrap();
        stack.push(&m2).unwrap();
        stack.push(&m3).unwrap();

        assert_eq!(stack.peek_by_offset(0).unwrap().unwrap(), m3);
        assert_eq!(stack.peek_by_offset(1).unwrap().unwrap(), m2);
        assert_eq!(stack.peek_by_offset(2).unwrap().unwrap(), m1);
        assert!(stack.peek_by_offset(3).unwrap().is_none());
        // Offsets beyond i64 range are past the end, not entry zero.
        assert!(stack.peek_by_offset(u64::MAX).unwrap().is_none());
        assert!(stack.peek_by_offset(i64::MAX as u64 + 1).unwrap().is_none());

        assert_eq!(stack.pop().unwrap().unwrap(), m3);
        assert_eq!(stack.pop().unwrap().unwrap(), m2);
        assert_eq!(stack.pop().unwrap().unwrap(), m1);
        assert!(stack.pop().unwrap().is_none());
    }

    #[test]
    fn test_clear_leaves_reusable_stack() {
        let stack = HistoryStack::open_memory().unwrap();
        stack.push(&msg(b"a")).unwrap();
        stack.push(&msg(b"b")).unwrap();

        stack.clear().unwrap();
        assert_eq!(stack.size().unwrap(), 0);

        let m = msg(b"after clear");
        stack.push(&m).unwrap();
        assert_eq!(stack.size().unwrap(), 1);
        assert_eq!(stack.peek().unwrap().unwrap(), m);
    }

    #[test]
    fn test_iterator_walks_newest_to_oldest() {
        let stack = HistoryStack::open_memory().unwrap();
        let (m1, m2, m3) = (msg(b"one"), msg(b"two"), msg(b"three"));
        stack.push(&m1).unwrap();
        stack.push(&m2).unwrap();
        stack.push(&m3).unwrap();

        let mut it = stack.iter().unwrap();
        assert_eq!(it.next().unwrap().unwrap(), m3);
        assert_eq!(it.next().unwrap().unwrap(), m2);
        assert_eq!(it.next().unwrap().unwrap(), m1);
        assert!(it.next().unwrap().is_none());
        // Exhausted iterators stay exhausted.
        assert!(it.next().unwrap().is_none());
    }

    #[test]
    fn test_iterator_blocks_writers_until_dropped() {
        let stack = Arc::new(HistoryStack::open_memory().unwrap());
        stack.push(&msg(b"held")).unwrap();

        let it = stack.iter().unwrap();

        let writer = {
            let stack = Arc::clone(&stack);
            std::thread::spawn(move || {
                stack.push(&msg(b"blocked")).unwrap();
            })
        };

        // The writer cannot finish while the iterator holds the lock.
        std::thread::sleep(Duration::from_millis(50));
        assert!(!writer.is_finished());

        drop(it);
        writer.join().unwrap();
        assert_eq!(stack.size().unwrap(), 2);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history.db");
        let m = msg(b"durable");

        let stack = HistoryStack::open(&path).unwrap();
        stack.push(&m).unwrap();
        stack.close().unwrap();

        let stack = HistoryStack::open(&path).unwrap();
        assert_eq!(stack.size().unwrap(), 1);
        assert_eq!(stack.peek().unwrap().unwrap(), m);
    }
}
