use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;

use super::error::EngineError;
use super::projection::MetricProjection;

pub type SharedScopeState = Arc<RwLock<ScopeState>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub kind: EntityKind,
    pub name: Option<String>,
}

/// Write guards for every scope a mutation touches, acquired in `Scope` order.
pub struct LockedScopes {
    guards: BTreeMap<Scope, OwnedRwLockWriteGuard<ScopeState>>,
}

impl LockedScopes {
    pub(super) fn new(guards: BTreeMap<Scope, OwnedRwLockWriteGuard<ScopeState>>) -> Self {
        Self { guards }
    }

    pub fn holds(&self, scope: &Scope) -> bool {
        self.guards.contains_key(scope)
    }

    pub fn get(&self, scope: &Scope) -> Option<&ScopeState> {
        self.guards.get(scope).map(|g| &**g)
    }

    pub fn get_mut(&mut self, scope: &Scope) -> Option<&mut ScopeState> {
        self.guards.get_mut(scope).map(|g| &mut **g)
    }

    /// States for the listed scopes that are held; unheld scopes are skipped.
    pub fn states<'a>(&'a self, scopes: &'a [Scope]) -> impl Iterator<Item = &'a ScopeState> + 'a {
        scopes.iter().filter_map(|s| self.get(s))
    }
}

/// In-memory persistence: scope indices, booking records, windows, reference
/// data and the metric projection. Rebuilt from the WAL on startup.
pub struct InMemoryStore {
    scopes: DashMap<Scope, SharedScopeState>,
    bookings: DashMap<Ulid, Booking>,
    /// window id → (trainer id, span)
    windows: DashMap<Ulid, (Ulid, Span)>,
    registry: DashMap<Ulid, RegistryEntry>,
    /// Ids reserved by creations still in flight.
    claims: DashMap<Ulid, ()>,
    pub health: MetricProjection,
}

/// Reservation of a new id, released on drop. Creations that lock disjoint
/// scopes still cannot both take the same id.
pub struct IdClaim<'a> {
    claims: &'a DashMap<Ulid, ()>,
    id: Ulid,
}

impl Drop for IdClaim<'_> {
    fn drop(&mut self) {
        self.claims.remove(&self.id);
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            scopes: DashMap::new(),
            bookings: DashMap::new(),
            windows: DashMap::new(),
            registry: DashMap::new(),
            claims: DashMap::new(),
            health: MetricProjection::new(),
        }
    }

    // ── Scope index ──────────────────────────────────────────

    pub fn get_scope(&self, scope: &Scope) -> Option<SharedScopeState> {
        self.scopes.get(scope).map(|e| e.value().clone())
    }

    /// Get the scope's state, creating an empty one on first use.
    pub fn scope(&self, scope: Scope) -> SharedScopeState {
        self.scopes
            .entry(scope)
            .or_insert_with(|| Arc::new(RwLock::new(ScopeState::new(scope))))
            .value()
            .clone()
    }

    // ── Bookings ─────────────────────────────────────────────

    pub fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    pub fn all_bookings(&self) -> Vec<Booking> {
        let mut all: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|b| b.id);
        all
    }

    // ── Windows ──────────────────────────────────────────────

    pub fn window(&self, id: &Ulid) -> Option<(Ulid, Span)> {
        self.windows.get(id).map(|e| *e.value())
    }

    pub fn all_windows(&self) -> Vec<(Ulid, Ulid, Span)> {
        let mut all: Vec<(Ulid, Ulid, Span)> = self
            .windows
            .iter()
            .map(|e| (*e.key(), e.value().0, e.value().1))
            .collect();
        all.sort_by_key(|w| w.0);
        all
    }

    // ── Registry ─────────────────────────────────────────────

    pub fn entity(&self, id: &Ulid) -> Option<RegistryEntry> {
        self.registry.get(id).map(|e| e.value().clone())
    }

    pub fn is_kind(&self, id: &Ulid, kind: EntityKind) -> bool {
        self.registry.get(id).is_some_and(|e| e.kind == kind)
    }

    pub fn all_entities(&self) -> Vec<(Ulid, RegistryEntry)> {
        let mut all: Vec<(Ulid, RegistryEntry)> = self
            .registry
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|e| e.0);
        all
    }

    /// True if `id` names anything the store knows about.
    pub fn id_in_use(&self, id: &Ulid) -> bool {
        self.registry.contains_key(id)
            || self.bookings.contains_key(id)
            || self.windows.contains_key(id)
            || self.health.contains(id)
    }

    /// Reserve `id` for a creation. Fails if it is stored or already claimed.
    /// Hold the claim until the event is applied.
    pub fn claim_id(&self, id: Ulid) -> Result<IdClaim<'_>, EngineError> {
        match self.claims.entry(id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                if self.id_in_use(&id) {
                    return Err(EngineError::AlreadyExists(id));
                }
                slot.insert(());
                Ok(IdClaim {
                    claims: &self.claims,
                    id,
                })
            }
        }
    }

    // ── Event scopes ─────────────────────────────────────────

    /// Scopes an event mutates (and whose subscribers hear about it).
    pub fn event_scopes(&self, event: &Event) -> Vec<Scope> {
        match event {
            Event::EntityRegistered { .. } => Vec::new(),
            Event::AvailabilityAdded { trainer_id, .. }
            | Event::AvailabilityRemoved { trainer_id, .. } => vec![Scope::Trainer(*trainer_id)],
            Event::SessionBooked {
                trainer_id,
                room_id,
                member_id,
                ..
            } => vec![
                Scope::Trainer(*trainer_id),
                Scope::Room(*room_id),
                Scope::Member(*member_id),
            ],
            Event::ClassScheduled {
                id,
                trainer_id,
                room_id,
                ..
            } => vec![
                Scope::Trainer(*trainer_id),
                Scope::Room(*room_id),
                Scope::Class(*id),
            ],
            Event::MemberEnrolled {
                class_id,
                member_id,
            }
            | Event::MemberWithdrawn {
                class_id,
                member_id,
            } => vec![Scope::Member(*member_id), Scope::Class(*class_id)],
            Event::BookingMoved { id, room_id, .. } => {
                let mut scopes = self
                    .get_booking(id)
                    .map(|b| b.lock_scopes())
                    .unwrap_or_default();
                scopes.push(Scope::Room(*room_id));
                scopes.sort();
                scopes.dedup();
                scopes
            }
            Event::BookingCancelled { id } => self
                .get_booking(id)
                .map(|b| b.lock_scopes())
                .unwrap_or_default(),
            Event::MetricRecorded { metric } => vec![Scope::HealthLog(metric.member_id)],
        }
    }

    // ── Event application ────────────────────────────────────

    /// Apply a committed event. The caller holds write guards for every scope
    /// in `event_scopes(event)`.
    pub fn apply_event(&self, locked: &mut LockedScopes, event: &Event) {
        match event {
            Event::EntityRegistered { id, kind, name } => {
                self.registry.insert(
                    *id,
                    RegistryEntry {
                        kind: *kind,
                        name: name.clone(),
                    },
                );
            }
            Event::AvailabilityAdded {
                id,
                trainer_id,
                span,
            } => {
                if let Some(st) = locked.get_mut(&Scope::Trainer(*trainer_id)) {
                    st.insert_interval(Interval {
                        id: *id,
                        span: *span,
                        kind: IntervalKind::Window,
                    });
                }
                self.windows.insert(*id, (*trainer_id, *span));
            }
            Event::AvailabilityRemoved { id, trainer_id } => {
                if let Some(st) = locked.get_mut(&Scope::Trainer(*trainer_id)) {
                    st.remove_interval(*id);
                }
                self.windows.remove(id);
            }
            Event::SessionBooked {
                id,
                trainer_id,
                room_id,
                member_id,
                span,
            } => {
                let booking = Booking {
                    id: *id,
                    trainer_id: *trainer_id,
                    room_id: *room_id,
                    span: *span,
                    status: BookingStatus::Confirmed,
                    kind: BookingKind::Session {
                        member_id: *member_id,
                    },
                };
                occupy(locked, &booking.occupied_scopes(), *id, *span);
                self.bookings.insert(*id, booking);
            }
            Event::ClassScheduled {
                id,
                trainer_id,
                room_id,
                name,
                capacity,
                span,
            } => {
                let booking = Booking {
                    id: *id,
                    trainer_id: *trainer_id,
                    room_id: *room_id,
                    span: *span,
                    status: BookingStatus::Confirmed,
                    kind: BookingKind::Class {
                        name: name.clone(),
                        roster: ClassRoster::new(*capacity),
                    },
                };
                occupy(locked, &booking.occupied_scopes(), *id, *span);
                self.bookings.insert(*id, booking);
            }
            Event::MemberEnrolled {
                class_id,
                member_id,
            } => {
                let Some(mut class) = self.bookings.get_mut(class_id) else {
                    return;
                };
                let span = class.span;
                let confirmed = class.is_confirmed();
                if let BookingKind::Class { roster, .. } = &mut class.kind {
                    roster.members.insert(*member_id);
                }
                drop(class);
                if confirmed {
                    occupy(locked, &[Scope::Member(*member_id)], *class_id, span);
                }
            }
            Event::MemberWithdrawn {
                class_id,
                member_id,
            } => {
                if let Some(mut class) = self.bookings.get_mut(class_id)
                    && let BookingKind::Class { roster, .. } = &mut class.kind
                {
                    roster.members.remove(member_id);
                }
                release(locked, &[Scope::Member(*member_id)], *class_id);
            }
            Event::BookingMoved { id, room_id, span } => {
                let Some(mut booking) = self.bookings.get_mut(id) else {
                    return;
                };
                release(locked, &booking.occupied_scopes(), *id);
                booking.room_id = *room_id;
                booking.span = *span;
                occupy(locked, &booking.occupied_scopes(), *id, *span);
            }
            Event::BookingCancelled { id } => {
                let Some(mut booking) = self.bookings.get_mut(id) else {
                    return;
                };
                if booking.status == BookingStatus::Cancelled {
                    return;
                }
                release(locked, &booking.occupied_scopes(), *id);
                booking.status = BookingStatus::Cancelled;
            }
            Event::MetricRecorded { metric } => {
                self.health.insert(metric.clone());
            }
        }
    }
}

fn occupy(locked: &mut LockedScopes, scopes: &[Scope], id: Ulid, span: Span) {
    for scope in scopes {
        if let Some(st) = locked.get_mut(scope) {
            st.insert_interval(Interval {
                id,
                span,
                kind: IntervalKind::Booking,
            });
        }
    }
}

fn release(locked: &mut LockedScopes, scopes: &[Scope], id: Ulid) {
    for scope in scopes {
        if let Some(st) = locked.get_mut(scope) {
            st.remove_interval(id);
        }
    }
}
