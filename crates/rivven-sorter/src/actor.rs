//! # Actor mailbox transport
//!
//! In actor mode the table pipeline is driven by a table actor polling its
//! nodes; nodes nudge the actor through control messages sent to its
//! mailbox: [`ControlMessage::Tick`] when output is ready,
//! [`ControlMessage::Barrier`] for an interpolated resolved ts and
//! [`ControlMessage::Stop`] on a fatal error.

use crate::common::{Result, SorterError, TableId, Ts};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Mailbox address of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(u64);

impl ActorId {
    /// Create an id from a raw value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Derive the id of a table actor from its changefeed and table.
    pub fn for_table(changefeed: &str, table_id: TableId) -> Self {
        let mut h = DefaultHasher::new();
        changefeed.hash(&mut h);
        table_id.hash(&mut h);
        Self(h.finish())
    }

    /// Raw value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

/// Control messages a node sends to its table actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Output is ready to be polled
    Tick,
    /// Everything up to this ts has been forwarded
    Barrier(Ts),
    /// Stop the table
    Stop,
}

/// Delivers control messages to actor mailboxes.
#[async_trait]
pub trait ActorRouter: Send + Sync {
    /// Non-blocking send; fails if the mailbox is full or missing.
    fn send(&self, id: ActorId, msg: ControlMessage) -> Result<()>;

    /// Send, waiting for mailbox capacity unless `cancel` fires first.
    async fn send_blocking(
        &self,
        cancel: &CancellationToken,
        id: ActorId,
        msg: ControlMessage,
    ) -> Result<()>;
}

/// In-process router over bounded mailboxes.
#[derive(Debug, Default)]
pub struct MailboxRouter {
    mailboxes: DashMap<ActorId, mpsc::Sender<ControlMessage>>,
}

impl MailboxRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mailbox for `id`, replacing any previous one.
    pub fn register(&self, id: ActorId, capacity: usize) -> mpsc::Receiver<ControlMessage> {
        let (tx, rx) = mpsc::channel(capacity);
        if self.mailboxes.insert(id, tx).is_some() {
            debug!(actor = %id, "replaced existing mailbox");
        }
        rx
    }

    /// Remove the mailbox of `id`.
    pub fn deregister(&self, id: ActorId) -> bool {
        self.mailboxes.remove(&id).is_some()
    }

    /// Number of registered mailboxes.
    pub fn len(&self) -> usize {
        self.mailboxes.len()
    }

    /// Check if no mailbox is registered.
    pub fn is_empty(&self) -> bool {
        self.mailboxes.is_empty()
    }

    fn mailbox(&self, id: ActorId) -> Result<mpsc::Sender<ControlMessage>> {
        self.mailboxes
            .get(&id)
            .map(|tx| tx.clone())
            .ok_or(SorterError::ActorNotFound(id))
    }
}

#[async_trait]
impl ActorRouter for MailboxRouter {
    fn send(&self, id: ActorId, msg: ControlMessage) -> Result<()> {
        match self.mailbox(id)?.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SorterError::MailboxFull(id)),
            Err(TrySendError::Closed(_)) => Err(SorterError::channel_closed(id.to_string())),
        }
    }

    async fn send_blocking(
        &self,
        cancel: &CancellationToken,
        id: ActorId,
        msg: ControlMessage,
    ) -> Result<()> {
        let tx = self.mailbox(id)?;
        tokio::select! {
            _ = cancel.cancelled() => Err(SorterError::invalid_state("send cancelled")),
            res = tx.send(msg) => res.map_err(|_| SorterError::channel_closed(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_id_for_table() {
        let a = ActorId::for_table("cf-1", 42);
        let b = ActorId::for_table("cf-1", 42);
        let c = ActorId::for_table("cf-1", 43);
        let d = ActorId::for_table("cf-2", 42);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert!(a.to_string().starts_with("actor-"));
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let router = MailboxRouter::new();
        let id = ActorId::new(1);
        let mut rx = router.register(id, 4);

        router.send(id, ControlMessage::Tick).unwrap();
        router.send(id, ControlMessage::Barrier(7)).unwrap();

        assert_eq!(rx.recv().await, Some(ControlMessage::Tick));
        assert_eq!(rx.recv().await, Some(ControlMessage::Barrier(7)));
    }

    #[test]
    fn test_send_to_unknown_actor() {
        let router = MailboxRouter::new();
        let err = router.send(ActorId::new(9), ControlMessage::Tick).unwrap_err();
        assert!(matches!(err, SorterError::ActorNotFound(_)));
    }

    #[test]
    fn test_send_to_full_mailbox() {
        let router = MailboxRouter::new();
        let id = ActorId::new(1);
        let _rx = router.register(id, 1);

        router.send(id, ControlMessage::Tick).unwrap();
        let err = router.send(id, ControlMessage::Tick).unwrap_err();
        assert!(matches!(err, SorterError::MailboxFull(_)));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_send_blocking_waits_for_capacity() {
        let router = std::sync::Arc::new(MailboxRouter::new());
        let id = ActorId::new(1);
        let mut rx = router.register(id, 1);
        router.send(id, ControlMessage::Tick).unwrap();

        let cancel = CancellationToken::new();
        let task = {
            let router = router.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { router.send_blocking(&cancel, id, ControlMessage::Stop).await })
        };

        assert_eq!(rx.recv().await, Some(ControlMessage::Tick));
        task.await.unwrap().unwrap();
        assert_eq!(rx.recv().await, Some(ControlMessage::Stop));
    }

    #[tokio::test]
    async fn test_send_blocking_cancelled() {
        let router = MailboxRouter::new();
        let id = ActorId::new(1);
        let _rx = router.register(id, 1);
        router.send(id, ControlMessage::Tick).unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(router
            .send_blocking(&cancel, id, ControlMessage::Stop)
            .await
            .is_err());
    }

    #[test]
    fn test_deregister() {
        let router = MailboxRouter::new();
        let id = ActorId::new(3);
        let _rx = router.register(id, 1);
        assert_eq!(router.len(), 1);
        assert!(router.deregister(id));
        assert!(router.is_empty());
        assert!(!router.deregister(id));
    }
}
