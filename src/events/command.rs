//! Text command parsing.

/// A leaderboard command found in a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// `!{N}月排行`. The month is passed through unvalidated; out-of-range
    /// values are answered as "not found".
    MonthOfCurrentYear(u32),
    /// `!{YYYY}年排行`.
    Year(i32),
    /// `!本月排行`.
    CurrentMonth,
    /// `!清空本月`.
    ResetCurrentMonth,
}

impl Command {
    /// Parse a whole message. Returns `None` for ordinary text.
    pub fn parse(text: &str) -> Option<Command> {
        let body = text.trim().strip_prefix('!')?;

        match body {
            "本月排行" => return Some(Command::CurrentMonth),
            "清空本月" => return Some(Command::ResetCurrentMonth),
            _ => {}
        }

        if let Some(digits) = body.strip_suffix("月排行") {
            return parse_digits(digits).map(Command::MonthOfCurrentYear);
        }
        if let Some(digits) = body.strip_suffix("年排行") {
            return parse_digits(digits).map(Command::Year);
        }
        None
    }
}

fn parse_digits<T: std::str::FromStr>(digits: &str) -> Option<T> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
