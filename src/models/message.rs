use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// On-create event published for every new (or re-armed) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub record_id: Uuid,
    pub trace_id: String,
}

impl TriggerEvent {
    pub fn new(record_id: Uuid) -> Self {
        Self {
            record_id,
            trace_id: Uuid::new_v4().to_string(),
        }
    }
}

/// A trigger the worker could not settle; parked for operator attention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqMessage {
    pub raw_event: String,
    pub record_id: Option<Uuid>,
    pub failure_reason: String,
    pub failed_at: String,
}
