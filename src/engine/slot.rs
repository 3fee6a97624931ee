use crate::model::{Ms, Span};

use super::EngineError;

// ── Slot Chunker ─────────────────────────────────────────────────

/// Split an open window into consecutive bookable slots of exactly
/// `duration_ms` each. The tail remainder shorter than one slot is dropped —
/// it is not offered. Non-positive durations are rejected up front; the walk
/// below would never terminate on zero.
pub fn chunk(window: &Span, duration_ms: Ms) -> Result<Vec<Span>, EngineError> {
    if duration_ms <= 0 {
        return Err(EngineError::InvalidDuration(duration_ms));
    }

    let mut slots = Vec::new();
    let mut cursor = window.start;
    while cursor + duration_ms <= window.end {
        slots.push(Span::new(cursor, cursor + duration_ms));
        cursor += duration_ms;
    }
    Ok(slots)
}

/// Chunk every window and concatenate, preserving window order.
pub fn chunk_all(windows: &[Span], duration_ms: Ms) -> Result<Vec<Span>, EngineError> {
    let mut slots = Vec::new();
    for window in windows {
        slots.extend(chunk(window, duration_ms)?);
    }
    Ok(slots)
}
