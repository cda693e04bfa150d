use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::{RequestId, RequestStatus};
use crate::domain::unit::UnitId;
use crate::domain::user::UserId;
use crate::flows::states::{RequestEvent, TransitionOutcome};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionId(pub String);

impl TransitionId {
    pub fn generate() -> Self {
        Self(format!("TRN-{}", uuid::Uuid::new_v4()))
    }
}

/// One applied transition, appended to a request's history in the same
/// write that bumps its version. History rows are never updated or removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTransition {
    pub id: TransitionId,
    pub request_id: RequestId,
    pub event: RequestEvent,
    pub from_status: RequestStatus,
    pub to_status: RequestStatus,
    pub from_unit_id: Option<UnitId>,
    pub to_unit_id: Option<UnitId>,
    pub step_number: u32,
    pub actor_id: UserId,
    pub correlation_id: String,
    pub version: u32,
    pub occurred_at: DateTime<Utc>,
}

impl RequestTransition {
    pub fn record(
        outcome: &TransitionOutcome,
        correlation_id: impl Into<String>,
        version: u32,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransitionId::generate(),
            request_id: outcome.request_id.clone(),
            event: outcome.event,
            from_status: outcome.from_status,
            to_status: outcome.to_status,
            from_unit_id: outcome.from_unit_id.clone(),
            to_unit_id: outcome.to_unit_id.clone(),
            step_number: outcome.step_number,
            actor_id: outcome.actor_id.clone(),
            correlation_id: correlation_id.into(),
            version,
            occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::RequestTransition;
    use crate::domain::request::{RequestId, RequestStatus};
    use crate::domain::unit::UnitId;
    use crate::domain::user::UserId;
    use crate::flows::states::{RequestEvent, RouteMove, TransitionOutcome};

    #[test]
    fn record_copies_outcome_and_stamps_version() {
        let outcome = TransitionOutcome {
            request_id: RequestId("REQ-9".to_owned()),
            event: RequestEvent::Approve,
            actor_id: UserId("mgr-advising".to_owned()),
            from_status: RequestStatus::Pending,
            to_status: RequestStatus::Pending,
            from_unit_id: Some(UnitId("unit-advising".to_owned())),
            to_unit_id: Some(UnitId("unit-root".to_owned())),
            step_number: 1,
            route: Some(RouteMove::ParentUnit {
                unit_id: UnitId("unit-root".to_owned()),
                approver_id: UserId("mgr-root".to_owned()),
            }),
        };

        let transition = RequestTransition::record(&outcome, "corr-1", 3, Utc::now());

        assert!(transition.id.0.starts_with("TRN-"));
        assert_eq!(transition.request_id, outcome.request_id);
        assert_eq!(transition.to_unit_id, Some(UnitId("unit-root".to_owned())));
        assert_eq!(transition.version, 3);
        assert_eq!(transition.correlation_id, "corr-1");
    }
}
