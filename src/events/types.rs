//! Inbound event types.

use crate::types::{MessageId, ScopeId, UserId};
use serde::{Deserialize, Serialize};

/// Events delivered by the chat event source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A message was posted.
    MessageCreated {
        scope_id: ScopeId,
        message_id: MessageId,
        author_is_bot: bool,
        /// Mentioned users in order of appearance.
        mentioned_user_ids: Vec<UserId>,
        text: String,
    },

    /// An approval reaction was placed on a message.
    ApprovalAdded {
        scope_id: ScopeId,
        message_id: MessageId,
        reacting_user_is_bot: bool,
        /// Users mentioned by the reacted-to message.
        mentioned_user_ids: Vec<UserId>,
    },
}

impl InboundEvent {
    pub fn scope(&self) -> &ScopeId {
        match self {
            InboundEvent::MessageCreated { scope_id, .. }
            | InboundEvent::ApprovalAdded { scope_id, .. } => scope_id,
        }
    }

    /// Whether the acting user is a bot.
    pub fn from_bot(&self) -> bool {
        match self {
            InboundEvent::MessageCreated { author_is_bot, .. } => *author_is_bot,
            InboundEvent::ApprovalAdded {
                reacting_user_is_bot,
                ..
            } => *reacting_user_is_bot,
        }
    }

    /// The user credited by this event: the first one mentioned.
    pub fn credited_user(&self) -> Option<&UserId> {
        match self {
            InboundEvent::MessageCreated {
                mentioned_user_ids, ..
            }
            | InboundEvent::ApprovalAdded {
                mentioned_user_ids, ..
            } => mentioned_user_ids.first(),
        }
    }
}
