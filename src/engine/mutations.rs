use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_CONFIRMED_TOTAL, BOOKINGS_REJECTED_TOTAL, METRICS_RECORDED_TOTAL};

use super::availability::is_available;
use super::capacity::check_enroll;
use super::conflict::{check_no_conflict, validate_span};
use super::{Engine, EngineError, LockedScopes, WalCommand};

/// Count a booking-ledger outcome by operation and rejection reason.
fn record_outcome<T>(op: &'static str, result: &Result<T, EngineError>) {
    match result {
        Ok(_) => metrics::counter!(BOOKINGS_CONFIRMED_TOTAL, "op" => op).increment(1),
        Err(e) => {
            tracing::debug!(op, reason = e.reason(), "booking rejected: {e}");
            metrics::counter!(BOOKINGS_REJECTED_TOTAL, "op" => op, "reason" => e.reason())
                .increment(1)
        }
    }
}

fn check_scope_room(locked: &LockedScopes, scopes: &[Scope]) -> Result<(), EngineError> {
    if locked
        .states(scopes)
        .any(|st| st.intervals.len() >= MAX_INTERVALS_PER_SCOPE)
    {
        return Err(EngineError::LimitExceeded("too many intervals in scope"));
    }
    Ok(())
}

fn check_trainer_available(locked: &LockedScopes, trainer_id: Ulid, span: &Span) -> Result<(), EngineError> {
    let available = locked
        .get(&Scope::Trainer(trainer_id))
        .is_some_and(|st| is_available(st, span));
    if available {
        Ok(())
    } else {
        Err(EngineError::TrainerUnavailable {
            trainer_id,
            span: *span,
        })
    }
}

impl Engine {
    // ── Registry ─────────────────────────────────────────────

    pub async fn register_trainer(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        self.register_entity(id, EntityKind::Trainer, name).await
    }

    pub async fn register_room(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        self.register_entity(id, EntityKind::Room, name).await
    }

    pub async fn register_member(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        self.register_entity(id, EntityKind::Member, name).await
    }

    async fn register_entity(
        &self,
        id: Ulid,
        kind: EntityKind,
        name: Option<String>,
    ) -> Result<(), EngineError> {
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        let scope = match kind {
            EntityKind::Trainer => Scope::Trainer(id),
            EntityKind::Room => Scope::Room(id),
            EntityKind::Member => Scope::Member(id),
        };
        let mut locked = self.lock_scopes(vec![scope]).await;
        let _claim = self.store.claim_id(id)?;
        let event = Event::EntityRegistered { id, kind, name };
        self.persist_and_apply(&mut locked, &event).await
    }

    // ── Availability ─────────────────────────────────────────

    pub async fn add_availability(&self, id: Ulid, trainer_id: Ulid, span: Span) -> Result<(), EngineError> {
        validate_span(&span)?;
        if !self.store.is_kind(&trainer_id, EntityKind::Trainer) {
            return Err(EngineError::NotFound(trainer_id));
        }
        let scopes = [Scope::Trainer(trainer_id)];
        let mut locked = self.lock_scopes(scopes.to_vec()).await;
        let _claim = self.store.claim_id(id)?;
        check_scope_room(&locked, &scopes)?;

        let event = Event::AvailabilityAdded { id, trainer_id, span };
        self.persist_and_apply(&mut locked, &event).await
    }

    /// Remove a window; returns the owning trainer. Bookings already placed
    /// inside it stay confirmed.
    pub async fn remove_availability(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (trainer_id, _) = self.store.window(&id).ok_or(EngineError::NotFound(id))?;
        let mut locked = self.lock_scopes(vec![Scope::Trainer(trainer_id)]).await;
        if self.store.window(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::AvailabilityRemoved { id, trainer_id };
        self.persist_and_apply(&mut locked, &event).await?;
        Ok(trainer_id)
    }

    // ── Booking ledger ───────────────────────────────────────

    pub async fn create_session(
        &self,
        id: Ulid,
        trainer_id: Ulid,
        room_id: Ulid,
        member_id: Ulid,
        span: Span,
    ) -> Result<Booking, EngineError> {
        let result = self
            .create_session_inner(id, trainer_id, room_id, member_id, span)
            .await;
        record_outcome("create_session", &result);
        result
    }

    async fn create_session_inner(
        &self,
        id: Ulid,
        trainer_id: Ulid,
        room_id: Ulid,
        member_id: Ulid,
        span: Span,
    ) -> Result<Booking, EngineError> {
        validate_span(&span)?;
        self.require(trainer_id, EntityKind::Trainer)?;
        self.require(room_id, EntityKind::Room)?;
        self.require(member_id, EntityKind::Member)?;

        let scopes = [
            Scope::Trainer(trainer_id),
            Scope::Room(room_id),
            Scope::Member(member_id),
        ];
        let mut locked = self.lock_scopes(scopes.to_vec()).await;
        let _claim = self.store.claim_id(id)?;
        check_scope_room(&locked, &scopes)?;
        check_trainer_available(&locked, trainer_id, &span)?;
        check_no_conflict(locked.states(&scopes), &span, None)?;

        let event = Event::SessionBooked {
            id,
            trainer_id,
            room_id,
            member_id,
            span,
        };
        self.persist_and_apply(&mut locked, &event).await?;
        self.committed(id)
    }

    pub async fn schedule_class(
        &self,
        id: Ulid,
        trainer_id: Ulid,
        room_id: Ulid,
        name: Option<String>,
        capacity: u32,
        span: Span,
    ) -> Result<Booking, EngineError> {
        let result = self
            .schedule_class_inner(id, trainer_id, room_id, name, capacity, span)
            .await;
        record_outcome("schedule_class", &result);
        result
    }

    async fn schedule_class_inner(
        &self,
        id: Ulid,
        trainer_id: Ulid,
        room_id: Ulid,
        name: Option<String>,
        capacity: u32,
        span: Span,
    ) -> Result<Booking, EngineError> {
        validate_span(&span)?;
        if capacity == 0 {
            return Err(EngineError::LimitExceeded("class capacity must be at least 1"));
        }
        if capacity > MAX_CLASS_CAPACITY {
            return Err(EngineError::LimitExceeded("class capacity too large"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("class name too long"));
        }
        self.require(trainer_id, EntityKind::Trainer)?;
        self.require(room_id, EntityKind::Room)?;

        let scopes = [Scope::Trainer(trainer_id), Scope::Room(room_id), Scope::Class(id)];
        let mut locked = self.lock_scopes(scopes.to_vec()).await;
        let _claim = self.store.claim_id(id)?;
        check_scope_room(&locked, &scopes)?;
        check_trainer_available(&locked, trainer_id, &span)?;
        check_no_conflict(locked.states(&scopes), &span, None)?;

        let event = Event::ClassScheduled {
            id,
            trainer_id,
            room_id,
            name,
            capacity,
            span,
        };
        self.persist_and_apply(&mut locked, &event).await?;
        self.committed(id)
    }

    /// Enroll a member. Checks run in order: existence, duplicate enrollment,
    /// member conflicts, capacity. Nothing changes unless all pass.
    pub async fn register_for_class(&self, class_id: Ulid, member_id: Ulid) -> Result<Booking, EngineError> {
        let result = self.register_for_class_inner(class_id, member_id).await;
        record_outcome("register_for_class", &result);
        result
    }

    async fn register_for_class_inner(&self, class_id: Ulid, member_id: Ulid) -> Result<Booking, EngineError> {
        self.require(member_id, EntityKind::Member)?;
        self.live_class(class_id)?;

        let scopes = [Scope::Member(member_id), Scope::Class(class_id)];
        let mut locked = self.lock_scopes(scopes.to_vec()).await;
        let class = self.live_class(class_id)?;
        let Some(roster) = class.roster() else {
            return Err(EngineError::NotFound(class_id));
        };

        if roster.contains(&member_id) {
            return Err(EngineError::AlreadyEnrolled { class_id, member_id });
        }
        check_scope_room(&locked, &scopes)?;
        check_no_conflict(locked.states(&scopes[..1]), &class.span, None)?;
        check_enroll(class_id, roster, member_id)?;

        let event = Event::MemberEnrolled { class_id, member_id };
        self.persist_and_apply(&mut locked, &event).await?;
        self.committed(class_id)
    }

    pub async fn withdraw_from_class(&self, class_id: Ulid, member_id: Ulid) -> Result<Booking, EngineError> {
        self.live_class(class_id)?;
        let mut locked = self
            .lock_scopes(vec![Scope::Member(member_id), Scope::Class(class_id)])
            .await;
        let class = self.live_class(class_id)?;
        if !class.roster().is_some_and(|r| r.contains(&member_id)) {
            return Err(EngineError::NotFound(member_id));
        }

        let event = Event::MemberWithdrawn { class_id, member_id };
        self.persist_and_apply(&mut locked, &event).await?;
        self.committed(class_id)
    }

    /// Move a booking to `span`, keeping its trainer, room and members.
    pub async fn reschedule(&self, id: Ulid, span: Span) -> Result<Booking, EngineError> {
        self.relocate(id, None, span).await
    }

    /// Move a booking to `span`, optionally into another room. The booking's
    /// own slot is released before the checks; on failure it is untouched.
    pub async fn relocate(&self, id: Ulid, room_id: Option<Ulid>, span: Span) -> Result<Booking, EngineError> {
        let result = self.relocate_inner(id, room_id, span).await;
        record_outcome("relocate", &result);
        result
    }

    async fn relocate_inner(&self, id: Ulid, room_id: Option<Ulid>, span: Span) -> Result<Booking, EngineError> {
        validate_span(&span)?;
        if let Some(room) = room_id {
            self.require(room, EntityKind::Room)?;
        }
        let extra: Vec<Scope> = room_id.map(Scope::Room).into_iter().collect();
        let (booking, mut locked) = self.lock_booking(id, &extra).await?;
        if !booking.is_confirmed() {
            return Err(EngineError::NotFound(id));
        }

        let target_room = room_id.unwrap_or(booking.room_id);
        let mut scopes = vec![Scope::Trainer(booking.trainer_id), Scope::Room(target_room)];
        scopes.extend(booking.members().into_iter().map(Scope::Member));
        if target_room != booking.room_id {
            check_scope_room(&locked, &[Scope::Room(target_room)])?;
        }
        check_trainer_available(&locked, booking.trainer_id, &span)?;
        check_no_conflict(locked.states(&scopes), &span, Some(id))?;

        let event = Event::BookingMoved {
            id,
            room_id: target_room,
            span,
        };
        self.persist_and_apply(&mut locked, &event).await?;
        self.committed(id)
    }

    /// Confirmed → Cancelled. Cancelling a cancelled booking is a no-op.
    pub async fn cancel(&self, id: Ulid) -> Result<Booking, EngineError> {
        let (booking, mut locked) = self.lock_booking(id, &[]).await?;
        if booking.status == BookingStatus::Cancelled {
            return Ok(booking);
        }
        let event = Event::BookingCancelled { id };
        self.persist_and_apply(&mut locked, &event).await?;
        metrics::counter!(crate::observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        self.committed(id)
    }

    // ── Health metrics ───────────────────────────────────────

    /// Append a metric and move the member's latest pointer if it is at least
    /// as recent. Serialized per member.
    pub async fn record_metric(&self, metric: HealthMetric) -> Result<(), EngineError> {
        self.require(metric.member_id, EntityKind::Member)?;
        if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&metric.recorded_at) {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
        let mut locked = self
            .lock_scopes(vec![Scope::HealthLog(metric.member_id)])
            .await;
        let _claim = self.store.claim_id(metric.id)?;
        let event = Event::MetricRecorded { metric };
        self.persist_and_apply(&mut locked, &event).await?;
        metrics::counter!(METRICS_RECORDED_TOTAL).increment(1);
        Ok(())
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event list that rebuilds current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let events = self.snapshot_events();
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!(events = count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Current state as events. Reads only the sharded maps, never a scope
    /// lock, so it is safe under the exclusive commit gate.
    fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        for (id, entry) in self.store.all_entities() {
            events.push(Event::EntityRegistered {
                id,
                kind: entry.kind,
                name: entry.name,
            });
        }
        for (id, trainer_id, span) in self.store.all_windows() {
            events.push(Event::AvailabilityAdded { id, trainer_id, span });
        }
        for booking in self.store.all_bookings() {
            match &booking.kind {
                BookingKind::Session { member_id } => events.push(Event::SessionBooked {
                    id: booking.id,
                    trainer_id: booking.trainer_id,
                    room_id: booking.room_id,
                    member_id: *member_id,
                    span: booking.span,
                }),
                BookingKind::Class { name, roster } => {
                    events.push(Event::ClassScheduled {
                        id: booking.id,
                        trainer_id: booking.trainer_id,
                        room_id: booking.room_id,
                        name: name.clone(),
                        capacity: roster.capacity,
                        span: booking.span,
                    });
                    for member_id in &roster.members {
                        events.push(Event::MemberEnrolled {
                            class_id: booking.id,
                            member_id: *member_id,
                        });
                    }
                }
            }
            if booking.status == BookingStatus::Cancelled {
                events.push(Event::BookingCancelled { id: booking.id });
            }
        }
        for metric in self.store.health.all() {
            events.push(Event::MetricRecorded { metric });
        }

        events
    }

    // ── Helpers ──────────────────────────────────────────────

    fn require(&self, id: Ulid, kind: EntityKind) -> Result<(), EngineError> {
        if self.store.is_kind(&id, kind) {
            Ok(())
        } else {
            Err(EngineError::NotFound(id))
        }
    }

    /// A confirmed class; anything else (session, cancelled, unknown) is NotFound.
    fn live_class(&self, class_id: Ulid) -> Result<Booking, EngineError> {
        match self.store.get_booking(&class_id) {
            Some(b) if b.is_class() && b.is_confirmed() => Ok(b),
            _ => Err(EngineError::NotFound(class_id)),
        }
    }

    fn committed(&self, id: Ulid) -> Result<Booking, EngineError> {
        self.store.get_booking(&id).ok_or(EngineError::NotFound(id))
    }
}
