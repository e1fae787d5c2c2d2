//! Conversation threads
//!
//! A thread is the engine-side context that accumulates a conversation's
//! turns. Resolving without an id creates one; resolving with an id binds to
//! it without a round-trip, so an unknown id only fails when the thread is
//! first used.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::engine::InferenceEngine;
use crate::error::AdvisorError;

/// How a thread handle came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadOrigin {
    /// Created on the engine by this resolve
    Created,
    /// Bound to an id supplied by the caller
    Resumed,
}

/// Handle to an engine thread. Its id never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationThread {
    id: String,
    created_at: DateTime<Utc>,
    origin: ThreadOrigin,
}

impl ConversationThread {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When this handle was created (for resumed threads, when it was bound)
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn origin(&self) -> ThreadOrigin {
        self.origin
    }
}

/// Creates, binds and releases threads on one engine
#[derive(Clone)]
pub struct ThreadManager {
    engine: Arc<dyn InferenceEngine>,
}

impl ThreadManager {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        Self { engine }
    }

    /// Create a new thread, or bind to `thread_id` when one is given
    ///
    /// An empty id is treated like no id.
    pub async fn resolve(&self, thread_id: Option<&str>) -> Result<ConversationThread, AdvisorError> {
        match thread_id.filter(|id| !id.is_empty()) {
            Some(id) => {
                debug!(thread = id, "Resuming thread");
                Ok(ConversationThread {
                    id: id.to_string(),
                    created_at: Utc::now(),
                    origin: ThreadOrigin::Resumed,
                })
            }
            None => {
                let id = self.engine.create_thread().await?;
                info!(thread = %id, "Created thread");
                Ok(ConversationThread {
                    id,
                    created_at: Utc::now(),
                    origin: ThreadOrigin::Created,
                })
            }
        }
    }

    /// Delete the engine-side thread. A thread that no longer exists yields `false`.
    pub async fn release(&self, thread_id: &str) -> Result<bool, AdvisorError> {
        if thread_id.is_empty() {
            return Ok(false);
        }
        match self.engine.delete_thread(thread_id).await {
            Ok(deleted) => {
                info!(thread = thread_id, deleted, "Released thread");
                Ok(deleted)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
