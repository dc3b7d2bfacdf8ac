//! Turn truncation.
//!
//! A history is bounded to `2 * max_turns` entries by dropping the oldest
//! ones. When that cut leaves a `model` reply as the oldest entry, the reply
//! is dropped as well so the retained context never opens with an answer
//! whose question is gone.

use super::types::{Role, Turn};

/// Default number of user/model pairs kept as context.
pub const DEFAULT_MAX_TURNS: usize = 50;

/// Bound `history` to at most `2 * max_turns` entries, keeping the newest.
///
/// A history that already fits is returned unchanged, so the function is
/// idempotent.
pub fn truncate(history: &[Turn], max_turns: usize) -> &[Turn] {
    let limit = max_turns.saturating_mul(2);
    if history.len() <= limit {
        return history;
    }

    let over = history.len() - limit;
    let kept = &history[over..];
    match kept.first() {
        Some(first) if first.role == Role::Model => &kept[1..],
        _ => kept,
    }
}
