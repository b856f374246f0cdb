//! Leaderboard rendering.
//!
//! Rendering is pure and deterministic: rankings are stable sorts over the
//! counters' insertion order, so equal counts list whoever appeared first.
//! Every section header is always present, even with no rows.

use crate::accumulator::{PopularMessage, TallyState};
use crate::types::UserId;

/// Rows shown in the mention ranking.
pub const TOP_MENTIONS: usize = 5;

/// Rows shown in the vote ranking.
pub const TOP_VOTES: usize = 3;

/// Rows shown in the popular message ranking.
pub const TOP_MESSAGES: usize = 3;

/// Characters of message text kept before truncation.
pub const EXCERPT_CHARS: usize = 30;

/// Appended to truncated message text.
pub const ELLIPSIS: &str = "...";

/// Render a leaderboard for `state` under `title`.
pub fn render(state: &TallyState, title: &str) -> String {
    let mut out = format!("📊 {} 排行榜\n", title);

    out.push_str("\n🏆 被 @ 次數排行：\n");
    for (i, (user, count)) in rank_counts(state.mentions.iter(), TOP_MENTIONS)
        .into_iter()
        .enumerate()
    {
        out.push_str(&format!("{}. {} - {} 次\n", i + 1, mention_tag(user), count));
    }

    out.push_str("\n❤️ 投票排行：\n");
    for (i, (user, count)) in rank_counts(state.votes.iter(), TOP_VOTES)
        .into_iter()
        .enumerate()
    {
        out.push_str(&format!("{}. {} - {} 票\n", i + 1, mention_tag(user), count));
    }

    out.push_str("\n🔥 熱門訊息排行：\n");
    for (i, message) in rank_messages(state.popularity.values(), TOP_MESSAGES)
        .into_iter()
        .enumerate()
    {
        out.push_str(&format!(
            "{}. {} 「{}」 - {} 票\n",
            i + 1,
            mention_tag(&message.user_id),
            excerpt(&message.text),
            message.count
        ));
    }

    out
}

/// Collapse line breaks to spaces and cut to [`EXCERPT_CHARS`] characters.
pub fn excerpt(text: &str) -> String {
    let flat: String = text
        .replace("\r\n", " ")
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();

    if flat.chars().count() > EXCERPT_CHARS {
        let mut cut: String = flat.chars().take(EXCERPT_CHARS).collect();
        cut.push_str(ELLIPSIS);
        cut
    } else {
        flat
    }
}

fn mention_tag(user: &UserId) -> String {
    format!("<@{}>", user)
}

fn rank_counts<'a>(
    entries: impl Iterator<Item = (&'a UserId, &'a u64)>,
    top: usize,
) -> Vec<(&'a UserId, u64)> {
    let mut ranked: Vec<(&UserId, u64)> = entries.map(|(u, c)| (u, *c)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(top);
    ranked
}

fn rank_messages<'a>(
    messages: impl Iterator<Item = &'a PopularMessage>,
    top: usize,
) -> Vec<&'a PopularMessage> {
    let mut ranked: Vec<&PopularMessage> = messages.collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(top);
    ranked
}
