use crate::provider::ProviderError;
use crate::session::SessionError;

/// Coarse classification the presentation layer switches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ValidationError,
    SchedulingConflict,
    AuthRequired,
    Forbidden,
    RemoteUnavailable,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Missing or malformed input.
    Validation(String),
    NotFound(String),
    AlreadyExists(String),
    LimitExceeded(&'static str),
    /// The room is already booked by this booking id.
    Conflict { booking_id: String },
    /// The organizer's own calendar is busy in the requested range.
    CalendarBusy { event_id: String },
    AuthRequired(String),
    /// Signed in, but not allowed to do this.
    Forbidden(String),
    RemoteUnavailable(String),
    Storage(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_)
            | EngineError::NotFound(_)
            | EngineError::AlreadyExists(_)
            | EngineError::LimitExceeded(_) => ErrorKind::ValidationError,
            EngineError::Conflict { .. } | EngineError::CalendarBusy { .. } => {
                ErrorKind::SchedulingConflict
            }
            EngineError::AuthRequired(_) => ErrorKind::AuthRequired,
            EngineError::Forbidden(_) => ErrorKind::Forbidden,
            EngineError::RemoteUnavailable(_) => ErrorKind::RemoteUnavailable,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid booking: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Conflict { booking_id } => {
                write!(f, "room already booked in that range (booking {booking_id})")
            }
            EngineError::CalendarBusy { event_id } => {
                write!(f, "another event in your calendar overlaps that range ({event_id})")
            }
            EngineError::AuthRequired(msg) => write!(f, "sign-in required: {msg}"),
            EngineError::Forbidden(msg) => write!(f, "not allowed: {msg}"),
            EngineError::RemoteUnavailable(msg) => write!(f, "calendar provider unavailable: {msg}"),
            EngineError::Storage(msg) => write!(f, "room store error: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ProviderError> for EngineError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Unauthorized(msg) => EngineError::AuthRequired(msg),
            ProviderError::Unavailable(msg) => EngineError::RemoteUnavailable(msg),
            ProviderError::InvalidResponse(msg) => {
                EngineError::RemoteUnavailable(format!("unexpected provider response: {msg}"))
            }
        }
    }
}

impl From<SessionError> for EngineError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NoIdentity => EngineError::AuthRequired("no active account".into()),
            SessionError::InteractionRequired(msg) => EngineError::AuthRequired(msg),
            SessionError::Failed(msg) => EngineError::RemoteUnavailable(format!("token acquisition failed: {msg}")),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}
