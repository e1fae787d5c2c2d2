//! Conversation service
//!
//! Maps transport conversations to engine threads and turns orchestrator
//! outcomes into outbound activities. State for a conversation lives from its
//! first answered turn until it ends, either by the end token, by the client
//! ending it, or by a failed turn.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::constants::conversation;
use crate::error::{AdvisorError, EndOfConversationCode};
use crate::interceptor::ToolCallRecord;
use crate::orchestrator::{ConverseOutcome, Orchestrator};

/// A user turn arriving from the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundTurn {
    pub conversation_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

/// What the transport sends back for one turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundActivity {
    pub reply_text: String,
    pub end_of_conversation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<EndOfConversationCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
}

impl OutboundActivity {
    fn ending(reply_text: String, code: EndOfConversationCode, thread_id: Option<String>) -> Self {
        Self {
            reply_text,
            end_of_conversation: true,
            code: Some(code),
            thread_id,
            tool_calls: Vec::new(),
        }
    }
}

/// Local state kept per conversation
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub thread_id: String,
    pub started_at: DateTime<Utc>,
    pub turns: usize,
}

/// Routes transport turns through one orchestrator
pub struct ConversationService {
    orchestrator: Arc<Orchestrator>,
    conversations: DashMap<String, ConversationState>,
}

impl ConversationService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            conversations: DashMap::new(),
        }
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Current state of a conversation, if it has one
    pub fn state(&self, conversation_id: &str) -> Option<ConversationState> {
        self.conversations
            .get(conversation_id)
            .map(|entry| entry.value().clone())
    }

    /// Number of conversations with live state
    pub fn active_count(&self) -> usize {
        self.conversations.len()
    }

    /// Handle one inbound turn
    ///
    /// Never fails: a turn error ends the conversation with an error code
    /// and the error text as the reply.
    pub async fn handle_turn(
        &self,
        turn: InboundTurn,
        cancel: &CancellationToken,
    ) -> OutboundActivity {
        // An explicit thread id wins over the one remembered for the conversation
        let thread_id = turn.thread_id.clone().filter(|id| !id.is_empty()).or_else(|| {
            self.conversations
                .get(&turn.conversation_id)
                .map(|entry| entry.thread_id.clone())
        });
        debug!(
            conversation = %turn.conversation_id,
            thread = ?thread_id,
            "Handling turn"
        );

        match self
            .orchestrator
            .converse(&turn.text, thread_id.as_deref(), cancel)
            .await
        {
            Ok(ConverseOutcome::Reply(reply)) => {
                self.conversations
                    .entry(turn.conversation_id)
                    .and_modify(|state| {
                        state.thread_id = reply.thread_id.clone();
                        state.turns += 1;
                    })
                    .or_insert_with(|| ConversationState {
                        thread_id: reply.thread_id.clone(),
                        started_at: Utc::now(),
                        turns: 1,
                    });
                OutboundActivity {
                    reply_text: reply.text,
                    end_of_conversation: false,
                    code: None,
                    thread_id: Some(reply.thread_id),
                    tool_calls: reply.tool_calls,
                }
            }
            Ok(ConverseOutcome::EndOfConversation { thread_id }) => {
                self.conversations.remove(&turn.conversation_id);
                info!(conversation = %turn.conversation_id, "Conversation completed");
                OutboundActivity::ending(
                    conversation::ENDING_REPLY.to_string(),
                    EndOfConversationCode::CompletedSuccessfully,
                    thread_id,
                )
            }
            Err(e) => self.fail(&turn.conversation_id, thread_id, e),
        }
    }

    /// The client ended the conversation: drop its state and release its thread
    pub async fn end_conversation(&self, conversation_id: &str) -> bool {
        let Some((_, state)) = self.conversations.remove(conversation_id) else {
            return false;
        };
        info!(conversation = conversation_id, turns = state.turns, "Conversation ended by client");
        self.orchestrator
            .end_conversation(Some(&state.thread_id))
            .await;
        true
    }

    fn fail(
        &self,
        conversation_id: &str,
        thread_id: Option<String>,
        error: AdvisorError,
    ) -> OutboundActivity {
        self.conversations.remove(conversation_id);
        warn!(conversation = conversation_id, error = %error, "Turn failed, ending conversation");
        OutboundActivity::ending(error.to_string(), EndOfConversationCode::Error, thread_id)
    }
}
