use thiserror::Error;
use ulid::Ulid;

use crate::error::{ErrorKind, SchedulingError};
use crate::model::Status;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error(transparent)]
    Scheduling(#[from] SchedulingError),

    #[error("customer not found: {0}")]
    CustomerNotFound(Ulid),

    #[error("vehicle not found: {0}")]
    VehicleNotFound(Ulid),

    #[error("vehicle {vehicle_id} does not belong to customer {customer_id}")]
    VehicleNotOwned { vehicle_id: Ulid, customer_id: Ulid },

    #[error("appointment {id} is {status}; only pending appointments can be rescheduled")]
    NotReschedulable { id: Ulid, status: Status },

    #[error("appointment {0} was modified concurrently")]
    ConcurrentModification(Ulid),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_)
            | EngineError::CustomerNotFound(_)
            | EngineError::VehicleNotFound(_) => ErrorKind::NotFound,
            EngineError::Scheduling(e) => e.kind(),
            EngineError::VehicleNotOwned { .. } | EngineError::LimitExceeded(_) => {
                ErrorKind::InvalidInput
            }
            EngineError::NotReschedulable { .. } | EngineError::ConcurrentModification(_) => {
                ErrorKind::Conflict
            }
            EngineError::WalError(_) => ErrorKind::Storage,
        }
    }

    /// Short stable label for responses and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::Scheduling(e) => e.label(),
            EngineError::CustomerNotFound(_) => "customer_not_found",
            EngineError::VehicleNotFound(_) => "vehicle_not_found",
            EngineError::VehicleNotOwned { .. } => "vehicle_not_owned",
            EngineError::NotReschedulable { .. } => "not_reschedulable",
            EngineError::ConcurrentModification(_) => "concurrent_modification",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "storage",
        }
    }
}
