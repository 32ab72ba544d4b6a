//! Stream reconciliation: folding incremental-token and snapshot frames into
//! the run's message state.
//!
//! Token frames carry the full accumulated tail of the in-progress assistant
//! message, so duplicates and out-of-order delivery are handled by keeping
//! the longest content seen. Snapshot frames are authoritative and replace
//! the message list wholesale; well-formed streams only ever grow, so no
//! rollback handling is needed.

use tracing::debug;

use crate::run::RunState;
use crate::traits::{PartialMessage, Role, RunSnapshot};

/// Fold an incremental-token frame into `streaming_content`. Returns true if
/// the visible content changed.
pub fn apply_token_frame(state: &mut RunState, parts: &[PartialMessage]) -> bool {
    let mut changed = false;
    for part in parts {
        if part.role != Role::Assistant {
            continue;
        }
        let content = part.content.text();
        if content.chars().count() > state.streaming_content.chars().count() {
            state.streaming_content = content;
            changed = true;
        }
    }
    changed
}

/// Replace the message list with an authoritative snapshot. Clears the
/// streaming tail once the snapshot has caught up with it, so consumers never
/// render the same text twice.
pub fn apply_snapshot_frame(state: &mut RunState, snapshot: RunSnapshot) {
    debug!(
        messages = snapshot.messages.len(),
        "applying snapshot frame"
    );
    state.messages = snapshot.messages;

    if state.streaming_content.is_empty() {
        return;
    }
    let trailing_assistant_len = state
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| m.content.len())
        .unwrap_or(0);
    if trailing_assistant_len >= state.streaming_content.chars().count() {
        state.streaming_content.clear();
    }
}
