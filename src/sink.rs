//! Outbound message delivery.

use crate::error::{LedgerError, Result};
use crate::types::ScopeId;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

/// Destination for rendered reports and command replies.
pub trait OutboundSink: Send + Sync {
    fn send(&self, scope: &ScopeId, text: &str) -> Result<()>;
}

/// A message queued for a scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub scope: ScopeId,
    pub text: String,
}

/// Sink that forwards messages over a channel to whoever posts them.
#[derive(Clone)]
pub struct ChannelSink {
    sender: Sender<OutboundMessage>,
}

impl ChannelSink {
    /// Create a sink and the receiver draining it.
    pub fn new() -> (Self, Receiver<OutboundMessage>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }
}

impl OutboundSink for ChannelSink {
    fn send(&self, scope: &ScopeId, text: &str) -> Result<()> {
        self.sender
            .send(OutboundMessage {
                scope: scope.clone(),
                text: text.to_string(),
            })
            .map_err(|_| LedgerError::SinkClosed)
    }
}
