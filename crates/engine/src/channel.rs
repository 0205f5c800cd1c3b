use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use common::{Command, Result};

/// Persistent mirror of the command slot.
#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn save(&self, command: &Command) -> Result<()>;
    async fn load(&self) -> Result<Option<Command>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published(Uuid),
    /// The slot still holds an unacknowledged command; the new one was
    /// discarded.
    Dropped { pending: Command },
}

#[derive(Debug, Error, PartialEq)]
pub enum ChannelError {
    #[error("no pending command")]
    NothingPending,
    #[error("acknowledged {got} but pending command is {expected}")]
    IdMismatch { expected: Uuid, got: Uuid },
}

/// Single-slot handoff between the decision loop and the actuation loop.
///
/// At most one `New` command is in flight. Publishing while one is pending
/// drops the new command with a warning; the consumer frees the slot with
/// [`acknowledge`](Self::acknowledge).
#[derive(Clone)]
pub struct CommandChannel {
    slot: Arc<Mutex<Option<Command>>>,
    store: Option<Arc<dyn SlotStore>>,
}

impl CommandChannel {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            store: None,
        }
    }

    /// Build a channel mirrored into `store`, restoring its last record.
    ///
    /// A persisted `Done` command is kept so duplicate detection survives a
    /// restart. A persisted `New` command was never confirmed and is stale by
    /// now; it is discarded.
    pub async fn restore(store: Arc<dyn SlotStore>) -> Result<Self> {
        let restored = match store.load().await? {
            Some(cmd) if cmd.is_new() => {
                warn!(intent = %cmd.intent_text, id = %cmd.id, "Discarding stale unprocessed command");
                let done = cmd.done();
                store.save(&done).await?;
                None
            }
            Some(cmd) => {
                info!(intent = %cmd.intent_text, "Restored last processed command");
                Some(cmd)
            }
            None => None,
        };
        Ok(Self {
            slot: Arc::new(Mutex::new(restored)),
            store: Some(store),
        })
    }

    pub async fn publish(&self, command: Command) -> PublishOutcome {
        let mut slot = self.slot.lock().await;
        if let Some(pending) = slot.as_ref().filter(|c| c.is_new()) {
            warn!(
                pending = %pending.intent_text,
                dropped = %command.intent_text,
                "Previous command not yet acknowledged, dropping new command"
            );
            return PublishOutcome::Dropped {
                pending: pending.clone(),
            };
        }

        let id = command.id;
        info!(intent = %command.intent_text, %id, "Command published");
        self.persist(&command).await;
        *slot = Some(command);
        PublishOutcome::Published(id)
    }

    /// The live `New` command, if any.
    pub async fn pending(&self) -> Option<Command> {
        self.slot.lock().await.clone().filter(Command::is_new)
    }

    /// The most recently acknowledged command, used for duplicate detection.
    pub async fn last_done(&self) -> Option<Command> {
        self.slot
            .lock()
            .await
            .clone()
            .filter(|c| !c.is_new())
    }

    /// Mark the pending command `Done`, freeing the slot.
    pub async fn acknowledge(&self, id: Uuid) -> std::result::Result<Command, ChannelError> {
        let mut slot = self.slot.lock().await;
        let pending = slot
            .as_ref()
            .filter(|c| c.is_new())
            .ok_or(ChannelError::NothingPending)?;
        if pending.id != id {
            return Err(ChannelError::IdMismatch {
                expected: pending.id,
                got: id,
            });
        }

        let done = pending.done();
        self.persist(&done).await;
        *slot = Some(done.clone());
        Ok(done)
    }

    /// The slot is authoritative in memory; a failed mirror write is logged.
    async fn persist(&self, command: &Command) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(command).await {
                warn!(error = %e, id = %command.id, "Failed to persist command slot");
            }
        }
    }
}

impl Default for CommandChannel {
    fn default() -> Self {
        Self::new()
    }
}
