use std::collections::BTreeSet;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if !span.is_valid() {
        return Err(EngineError::InvalidInterval {
            start: span.start,
            end: span.end,
        });
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// Bookings held by `scope` that overlap `span`, skipping `ignore`.
///
/// Only confirmed bookings live in a scope index, so every hit is a
/// confirmed booking. `ignore` releases a moving booking's own slot.
pub fn conflicts_in<'a>(
    scope: &'a ScopeState,
    span: &'a Span,
    ignore: Option<Ulid>,
) -> impl Iterator<Item = Ulid> + 'a {
    scope
        .overlapping(span)
        .filter(move |i| i.kind == IntervalKind::Booking && Some(i.id) != ignore)
        .map(|i| i.id)
}

/// Union of conflicts across scopes, sorted and deduplicated. A booking that
/// shares both trainer and room with the proposal is reported once.
pub fn find_conflicts<'a>(
    scopes: impl IntoIterator<Item = &'a ScopeState>,
    span: &Span,
    ignore: Option<Ulid>,
) -> Vec<Ulid> {
    let mut ids = BTreeSet::new();
    for scope in scopes {
        ids.extend(conflicts_in(scope, span, ignore));
    }
    ids.into_iter().collect()
}

pub(crate) fn check_no_conflict<'a>(
    scopes: impl IntoIterator<Item = &'a ScopeState>,
    span: &Span,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    let ids = find_conflicts(scopes, span, ignore);
    if ids.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Conflict(ids))
    }
}
