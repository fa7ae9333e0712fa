use ulid::Ulid;

use crate::model::{Ms, Span};

#[derive(Debug)]
pub enum EngineError {
    InvalidInterval {
        start: Ms,
        end: Ms,
    },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    TrainerUnavailable {
        trainer_id: Ulid,
        span: Span,
    },
    /// Ids of every confirmed booking the request collided with, sorted.
    Conflict(Vec<Ulid>),
    AlreadyEnrolled {
        class_id: Ulid,
        member_id: Ulid,
    },
    CapacityExceeded {
        class_id: Ulid,
        capacity: u32,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// True when the same request may succeed with a different interval or class.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TrainerUnavailable { .. }
                | EngineError::Conflict(_)
                | EngineError::CapacityExceeded { .. }
        )
    }

    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval { .. } => "invalid_interval",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::TrainerUnavailable { .. } => "trainer_unavailable",
            EngineError::Conflict(_) => "conflict",
            EngineError::AlreadyEnrolled { .. } => "already_enrolled",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "storage",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): start must be before end")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::TrainerUnavailable { trainer_id, span } => write!(
                f,
                "trainer {trainer_id} has no availability window covering [{}, {})",
                span.start, span.end
            ),
            EngineError::Conflict(ids) => {
                write!(f, "conflict with booking(s): ")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{id}")?;
                }
                Ok(())
            }
            EngineError::AlreadyEnrolled { class_id, member_id } => {
                write!(f, "member {member_id} already enrolled in class {class_id}")
            }
            EngineError::CapacityExceeded { class_id, capacity } => {
                write!(f, "class {class_id} is full (capacity {capacity})")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
