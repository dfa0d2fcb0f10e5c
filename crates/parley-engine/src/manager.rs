//! The Manager trait: where application-specific logic lives.

use parley_core::Message;
use parley_store::HistoryIter;

/// Application callbacks invoked by the engine.
///
/// Both callbacks run under the engine's global lock (and `should_process`
/// additionally under the history store's lock), so they must return
/// quickly; anything slow belongs on the application's side of the fence.
pub trait Manager: Send + Sync {
    /// Apply a message's side effects. Called for locally created messages
    /// and for messages accepted from a remote peer, distinguished by
    /// `from_remote`.
    ///
    /// Resolve whatever you can internally: a returned error tells the
    /// engine the situation is unrecoverable and the whole process shuts
    /// down.
    fn process(&self, msg: &Message, from_remote: bool) -> anyhow::Result<()>;

    /// Decide whether a remote message should be applied when the peers
    /// have diverged. `history` walks this process's applied messages from
    /// newest to oldest; it may be read freely but holds the history lock,
    /// so keep the decision fast.
    fn should_process(&self, msg: &Message, history: &mut HistoryIter<'_>) -> bool;
}
