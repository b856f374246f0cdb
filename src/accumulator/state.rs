//! Counter state for one scope and one period.

use super::OrderedMap;
use crate::error::Result;
use crate::types::{MessageId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A mention-bearing message and the approvals it collected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopularMessage {
    /// The user the message mentioned.
    pub user_id: UserId,
    /// Message body as posted.
    #[serde(rename = "content")]
    pub text: String,
    /// Approval reactions placed on the message.
    pub count: u64,
}

/// Mention, vote and popularity counters.
///
/// This is both the live accumulator value and the persisted snapshot
/// payload. The JSON form is an object of three maps: `mentions`, `votes`
/// and `reactions` (message id to [`PopularMessage`]).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyState {
    #[serde(default)]
    pub mentions: OrderedMap<UserId, u64>,

    #[serde(default)]
    pub votes: OrderedMap<UserId, u64>,

    #[serde(default, rename = "reactions")]
    pub popularity: OrderedMap<MessageId, PopularMessage>,
}

impl TallyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no counter has been touched.
    pub fn is_empty(&self) -> bool {
        self.mentions.is_empty() && self.votes.is_empty() && self.popularity.is_empty()
    }

    /// Count a message mentioning `user_id` and start tracking its popularity.
    ///
    /// A message id seen before keeps its existing popularity entry.
    pub fn record_mention(&mut self, message_id: MessageId, user_id: UserId, text: &str) {
        *self.mentions.get_or_insert_with(user_id.clone(), || 0) += 1;
        self.popularity
            .get_or_insert_with(message_id, || PopularMessage {
                user_id,
                text: text.to_string(),
                count: 0,
            });
    }

    /// Count an approval on a message mentioning `user_id`.
    ///
    /// Messages without a popularity entry (recorded before the last reset,
    /// or never mention-bearing) still count toward `votes`.
    pub fn record_approval(&mut self, message_id: &MessageId, user_id: UserId) {
        *self.votes.get_or_insert_with(user_id, || 0) += 1;
        if let Some(message) = self.popularity.get_mut(message_id) {
            message.count += 1;
        }
    }

    pub fn mention_count(&self, user_id: &UserId) -> u64 {
        self.mentions.get(user_id).copied().unwrap_or(0)
    }

    pub fn vote_count(&self, user_id: &UserId) -> u64 {
        self.votes.get(user_id).copied().unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.mentions.clear();
        self.votes.clear();
        self.popularity.clear();
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Fold monthly states into one yearly aggregate.
    ///
    /// Mentions and votes are summed per user. Popularity is regrouped by
    /// user: each user gets one entry, keyed by the user id, whose count is
    /// the sum over all of that user's messages and whose text is that of
    /// the user's single most approved message (first seen wins ties).
    pub fn merge_yearly<I>(months: I) -> TallyState
    where
        I: IntoIterator<Item = TallyState>,
    {
        let mut merged = TallyState::new();
        let mut best: HashMap<UserId, u64> = HashMap::new();

        for month in months {
            for (user, count) in month.mentions.iter() {
                *merged.mentions.get_or_insert_with(user.clone(), || 0) += count;
            }
            for (user, count) in month.votes.iter() {
                *merged.votes.get_or_insert_with(user.clone(), || 0) += count;
            }
            for message in month.popularity.values() {
                let entry = merged
                    .popularity
                    .get_or_insert_with(MessageId::new(message.user_id.as_str()), || {
                        PopularMessage {
                            user_id: message.user_id.clone(),
                            text: message.text.clone(),
                            count: 0,
                        }
                    });
                entry.count += message.count;

                let top = best.entry(message.user_id.clone()).or_insert(message.count);
                if message.count > *top {
                    *top = message.count;
                    entry.text = message.text.clone();
                }
            }
        }

        merged
    }
}
