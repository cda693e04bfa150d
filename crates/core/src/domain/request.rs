use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::form::{DocumentRef, FormPayload, TagSet};
use crate::domain::unit::UnitId;
use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(format!("REQ-{}", uuid::Uuid::new_v4()))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RequestType {
    #[serde(rename = "ferpa")]
    Ferpa,
    #[serde(rename = "info")]
    InfoChange,
    #[serde(rename = "medical")]
    MedicalWithdrawal,
    #[serde(rename = "drop")]
    StudentDrop,
}

impl RequestType {
    pub const ALL: [RequestType; 4] =
        [Self::Ferpa, Self::InfoChange, Self::MedicalWithdrawal, Self::StudentDrop];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ferpa => "ferpa",
            Self::InfoChange => "info",
            Self::MedicalWithdrawal => "medical",
            Self::StudentDrop => "drop",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ferpa" => Some(Self::Ferpa),
            "info" => Some(Self::InfoChange),
            "medical" => Some(Self::MedicalWithdrawal),
            "drop" => Some(Self::StudentDrop),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Pending,
    Returned,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Returned => "returned",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "pending" => Some(Self::Pending),
            "returned" => Some(Self::Returned),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Returned)
    }
}

/// The routed entity. Routing fields are only ever written by the flow engine;
/// payload fields only by the submitter while the request is editable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub submitter_id: UserId,
    pub request_type: RequestType,
    pub status: RequestStatus,
    /// 0 means "before step 1" for a never-submitted draft, or a zero-step
    /// plan climbing from its entry unit.
    pub current_step_number: u32,
    pub current_unit_id: Option<UnitId>,
    pub current_approver_id: Option<UserId>,
    pub delegated_to_id: Option<UserId>,
    pub payload: FormPayload,
    pub tags: TagSet,
    pub document: Option<DocumentRef>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Request {
    pub fn draft(
        submitter_id: UserId,
        request_type: RequestType,
        payload: FormPayload,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            submitter_id,
            request_type,
            status: RequestStatus::Draft,
            current_step_number: 0,
            current_unit_id: None,
            current_approver_id: None,
            delegated_to_id: None,
            payload,
            tags: TagSet::default(),
            document: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A request that has never left draft has not been pinned to any unit.
    pub fn was_ever_routed(&self) -> bool {
        self.current_unit_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Request, RequestStatus, RequestType};
    use crate::domain::form::FormPayload;
    use crate::domain::user::UserId;

    #[test]
    fn request_type_round_trips_from_storage_encoding() {
        for kind in RequestType::ALL {
            assert_eq!(RequestType::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RequestType::parse("DROP"), Some(RequestType::StudentDrop));
        assert_eq!(RequestType::parse("transcript"), None);
    }

    #[test]
    fn status_round_trips_and_classifies_terminal_states() {
        let cases = [
            RequestStatus::Draft,
            RequestStatus::Pending,
            RequestStatus::Returned,
            RequestStatus::Approved,
            RequestStatus::Rejected,
        ];
        for status in cases {
            assert_eq!(RequestStatus::parse(status.as_str()), Some(status));
        }

        assert!(RequestStatus::Approved.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
        assert!(!RequestStatus::Returned.is_terminal());
        assert!(RequestStatus::Returned.is_editable());
        assert!(!RequestStatus::Pending.is_editable());
    }

    #[test]
    fn new_draft_is_unrouted() {
        let request = Request::draft(
            UserId("student-1".to_string()),
            RequestType::Ferpa,
            FormPayload::default(),
            Utc::now(),
        );

        assert_eq!(request.status, RequestStatus::Draft);
        assert_eq!(request.current_step_number, 0);
        assert!(!request.was_ever_routed());
        assert!(request.id.0.starts_with("REQ-"));
    }
}
