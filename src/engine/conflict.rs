use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.is_empty() {
        return Err(EngineError::InvalidWindow("span must not be empty"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// The booking guard: reject any appointment span overlapping an existing
/// appointment of the same provider. Runs under the provider's write lock,
/// so check-then-insert is atomic — the resolution engine itself never
/// re-validates against concurrently created appointments.
pub(crate) fn check_no_conflict(ps: &ProviderState, span: &Span) -> Result<(), EngineError> {
    if let Some(existing) = ps.overlapping_appointments(span).next() {
        return Err(EngineError::Conflict(existing.id));
    }
    Ok(())
}
