use std::collections::BTreeSet;

use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability;
use super::conflict::{conflicts_in, validate_span};
use super::{Engine, EngineError};

impl Engine {
    pub fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        self.store.get_booking(id)
    }

    pub fn entity_kind(&self, id: &Ulid) -> Option<EntityKind> {
        self.store.entity(id).map(|e| e.kind)
    }

    /// Confirmed bookings occupying a trainer, room or member, ordered by start.
    pub async fn bookings_for(&self, scope: Scope) -> Result<Vec<Booking>, EngineError> {
        self.require_scope_owner(&scope)?;
        let Some(state) = self.store.get_scope(&scope) else {
            return Ok(Vec::new());
        };
        let ids: Vec<Ulid> = {
            let guard = state.read().await;
            guard.bookings().map(|i| i.id).collect()
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.store.get_booking(id))
            .filter(|b| b.is_confirmed())
            .collect())
    }

    /// Confirmed bookings in any of `scopes` overlapping `span`. Read-only;
    /// each scope is read under its own lock.
    pub async fn find_conflicts(&self, scopes: &[Scope], span: Span) -> Result<Vec<Booking>, EngineError> {
        validate_span(&span)?;
        if span.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let mut ids = BTreeSet::new();
        for scope in scopes {
            self.require_scope_owner(scope)?;
            if let Some(state) = self.store.get_scope(scope) {
                let guard = state.read().await;
                ids.extend(conflicts_in(&guard, &span, None));
            }
        }
        let mut found: Vec<Booking> = ids
            .iter()
            .filter_map(|id| self.store.get_booking(id))
            .collect();
        found.sort_by_key(|b| (b.span.start, b.id));
        Ok(found)
    }

    pub async fn is_available(&self, trainer_id: Ulid, span: Span) -> Result<bool, EngineError> {
        validate_span(&span)?;
        if !self.store.is_kind(&trainer_id, EntityKind::Trainer) {
            return Err(EngineError::NotFound(trainer_id));
        }
        let Some(state) = self.store.get_scope(&Scope::Trainer(trainer_id)) else {
            return Ok(false);
        };
        let guard = state.read().await;
        Ok(availability::is_available(&guard, &span))
    }

    /// Bookable gaps for a trainer inside `[start, end)`.
    pub async fn open_slots(
        &self,
        trainer_id: Ulid,
        start: Ms,
        end: Ms,
        min_duration: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidInterval { start, end });
        }
        if end - start > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        if !self.store.is_kind(&trainer_id, EntityKind::Trainer) {
            return Err(EngineError::NotFound(trainer_id));
        }
        let Some(state) = self.store.get_scope(&Scope::Trainer(trainer_id)) else {
            return Ok(Vec::new());
        };
        let query = Span::new(start, end);
        let mut slots = {
            let guard = state.read().await;
            availability::open_slots(&guard, &query)
        };
        if let Some(min) = min_duration {
            slots.retain(|s| s.duration_ms() >= min);
        }
        Ok(slots)
    }

    pub async fn availability_windows(&self, trainer_id: Ulid) -> Result<Vec<WindowInfo>, EngineError> {
        if !self.store.is_kind(&trainer_id, EntityKind::Trainer) {
            return Err(EngineError::NotFound(trainer_id));
        }
        let Some(state) = self.store.get_scope(&Scope::Trainer(trainer_id)) else {
            return Ok(Vec::new());
        };
        let guard = state.read().await;
        Ok(guard
            .windows()
            .map(|w| WindowInfo {
                id: w.id,
                trainer_id,
                start: w.span.start,
                end: w.span.end,
            })
            .collect())
    }

    /// Enrolled members of a class (cancelled classes keep their roster).
    pub fn roster(&self, class_id: &Ulid) -> Result<Vec<Ulid>, EngineError> {
        let class = self
            .store
            .get_booking(class_id)
            .ok_or(EngineError::NotFound(*class_id))?;
        class
            .roster()
            .map(|r| r.members.iter().copied().collect())
            .ok_or(EngineError::NotFound(*class_id))
    }

    pub fn get_latest(&self, member_id: &Ulid) -> Option<HealthMetric> {
        self.store.health.get_latest(member_id)
    }

    pub fn latest_pointer(&self, member_id: &Ulid) -> Option<MemberLatestMetric> {
        self.store.health.latest_pointer(member_id)
    }

    /// Every metric of a member, newest first.
    pub fn metric_history(&self, member_id: &Ulid) -> Result<Vec<HealthMetric>, EngineError> {
        if !self.store.is_kind(member_id, EntityKind::Member) {
            return Err(EngineError::NotFound(*member_id));
        }
        Ok(self.store.health.history(member_id))
    }

    fn require_scope_owner(&self, scope: &Scope) -> Result<(), EngineError> {
        let (id, kind) = match scope {
            Scope::Trainer(id) => (id, EntityKind::Trainer),
            Scope::Room(id) => (id, EntityKind::Room),
            Scope::Member(id) => (id, EntityKind::Member),
            Scope::Class(_) | Scope::HealthLog(_) => return Ok(()),
        };
        if self.store.is_kind(id, kind) {
            Ok(())
        } else {
            Err(EngineError::NotFound(*id))
        }
    }
}
