use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, facility local time. The only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` for zero-length or inverted ranges.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Key of a critical section. The derived `Ord` is the global lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Scope {
    Trainer(Ulid),
    Room(Ulid),
    Member(Ulid),
    Class(Ulid),
    HealthLog(Ulid),
}

impl Scope {
    /// Notification channel name, e.g. `trainer_01ARZ3NDEKTSV4RRFFQ69G5FAV`.
    pub fn channel(&self) -> String {
        match self {
            Scope::Trainer(id) => format!("trainer_{id}"),
            Scope::Room(id) => format!("room_{id}"),
            Scope::Member(id) => format!("member_{id}"),
            Scope::Class(id) => format!("class_{id}"),
            Scope::HealthLog(id) => format!("health_{id}"),
        }
    }
}

/// What an interval on a scope represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    /// Opens a trainer for bookings in this range.
    Window,
    /// A confirmed booking occupying the scope.
    Booking,
}

/// A single interval on a scope. Windows and bookings share one sorted list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

/// Per-scope index of intervals, guarded by the scope's lock.
#[derive(Debug, Clone)]
pub struct ScopeState {
    pub scope: Scope,
    /// Sorted by `span.start`.
    pub intervals: Vec<Interval>,
}

impl ScopeState {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            intervals: Vec::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    /// Intervals whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    pub fn windows(&self) -> impl Iterator<Item = &Interval> {
        self.intervals
            .iter()
            .filter(|i| i.kind == IntervalKind::Window)
    }

    pub fn bookings(&self) -> impl Iterator<Item = &Interval> {
        self.intervals
            .iter()
            .filter(|i| i.kind == IntervalKind::Booking)
    }
}

/// Booking lifecycle. `Pending` only exists while a request is being checked
/// and is never stored; `Cancelled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

/// Enrolled members of a class, bounded by `capacity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRoster {
    pub capacity: u32,
    pub members: BTreeSet<Ulid>,
}

impl ClassRoster {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            members: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, member_id: &Ulid) -> bool {
        self.members.contains(member_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingKind {
    Session { member_id: Ulid },
    Class { name: Option<String>, roster: ClassRoster },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub trainer_id: Ulid,
    pub room_id: Ulid,
    pub span: Span,
    pub status: BookingStatus,
    pub kind: BookingKind,
}

impl Booking {
    pub fn is_class(&self) -> bool {
        matches!(self.kind, BookingKind::Class { .. })
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == BookingStatus::Confirmed
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            BookingKind::Session { .. } => "session",
            BookingKind::Class { .. } => "class",
        }
    }

    pub fn roster(&self) -> Option<&ClassRoster> {
        match &self.kind {
            BookingKind::Class { roster, .. } => Some(roster),
            BookingKind::Session { .. } => None,
        }
    }

    /// The session member, or every enrolled member of a class.
    pub fn members(&self) -> Vec<Ulid> {
        match &self.kind {
            BookingKind::Session { member_id } => vec![*member_id],
            BookingKind::Class { roster, .. } => roster.members.iter().copied().collect(),
        }
    }

    /// Scopes whose interval index holds this booking.
    pub fn occupied_scopes(&self) -> Vec<Scope> {
        let mut scopes = vec![Scope::Trainer(self.trainer_id), Scope::Room(self.room_id)];
        scopes.extend(self.members().into_iter().map(Scope::Member));
        scopes
    }

    /// Every scope a mutation of this booking must lock.
    pub fn lock_scopes(&self) -> Vec<Scope> {
        let mut scopes = self.occupied_scopes();
        if self.is_class() {
            scopes.push(Scope::Class(self.id));
        }
        scopes
    }
}

/// Measured values of a health metric. Any subset may be present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricValues {
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub heart_rate: Option<u32>,
    pub body_fat_pct: Option<f64>,
}

/// Append-only health measurement. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMetric {
    pub id: Ulid,
    pub member_id: Ulid,
    pub recorded_at: Ms,
    pub values: MetricValues,
}

/// Denormalized pointer to a member's most recent metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberLatestMetric {
    pub member_id: Ulid,
    pub latest_metric_id: Ulid,
    pub latest_recorded_at: Ms,
}

/// Reference data kinds held by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Trainer,
    Room,
    Member,
}

/// WAL record format. Flat, no nesting beyond value structs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    EntityRegistered {
        id: Ulid,
        kind: EntityKind,
        name: Option<String>,
    },
    AvailabilityAdded {
        id: Ulid,
        trainer_id: Ulid,
        span: Span,
    },
    AvailabilityRemoved {
        id: Ulid,
        trainer_id: Ulid,
    },
    SessionBooked {
        id: Ulid,
        trainer_id: Ulid,
        room_id: Ulid,
        member_id: Ulid,
        span: Span,
    },
    ClassScheduled {
        id: Ulid,
        trainer_id: Ulid,
        room_id: Ulid,
        name: Option<String>,
        capacity: u32,
        span: Span,
    },
    MemberEnrolled {
        class_id: Ulid,
        member_id: Ulid,
    },
    MemberWithdrawn {
        class_id: Ulid,
        member_id: Ulid,
    },
    BookingMoved {
        id: Ulid,
        room_id: Ulid,
        span: Span,
    },
    BookingCancelled {
        id: Ulid,
    },
    MetricRecorded {
        metric: HealthMetric,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub id: Ulid,
    pub trainer_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}
