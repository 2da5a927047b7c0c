use anyhow::Error as AnyError;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum AckStatus {
    Success,
    Failure(Arc<AnyError>),
}

/// Emitted by the listener wrapper once a handler finishes.
#[derive(Debug, Clone)]
pub struct Ack {
    pub correlation_id: Uuid,
    pub event_type: String,
    pub status: AckStatus,
}

#[derive(Debug, Clone)]
pub enum BusError {
    /// A listener returned an error or panicked.
    ListenerFailed {
        event_type: String,
        correlation_id: Uuid,
        source: Arc<AnyError>,
    },
    /// The bus stopped delivering acknowledgments before the wait finished.
    WaiterClosed {
        event_type: String,
        correlation_id: Uuid,
    },
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::ListenerFailed {
                event_type,
                correlation_id,
                source,
            } => write!(
                f,
                "listener for {event_type} failed (correlation {correlation_id}): {source}"
            ),
            BusError::WaiterClosed {
                event_type,
                correlation_id,
            } => write!(
                f,
                "acknowledgment channel for {event_type} closed (correlation {correlation_id})"
            ),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BusError::ListenerFailed { source, .. } => Some(&***source),
            BusError::WaiterClosed { .. } => None,
        }
    }
}
