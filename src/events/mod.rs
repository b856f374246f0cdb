//! Inbound chat events and text commands.
//!
//! The event source (a chat gateway client) converts platform callbacks
//! into [`InboundEvent`] values and hands them to a single entry point,
//! [`Service::handle_event`](crate::Service::handle_event) or the
//! service's input channel. Nothing here depends on the transport.
//!
//! Commands recognised in message text:
//! - `!{N}月排行`: leaderboard of month N of the current year
//! - `!{YYYY}年排行`: stored yearly leaderboard
//! - `!本月排行`: leaderboard of the open month
//! - `!清空本月`: clear the open month's counters

mod command;
mod types;

pub use command::Command;
pub use types::InboundEvent;
