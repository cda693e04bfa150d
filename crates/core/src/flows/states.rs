use serde::{Deserialize, Serialize};

use crate::domain::form::{DocumentRef, FormPayload, TagSet};
use crate::domain::request::{RequestId, RequestStatus};
use crate::domain::unit::UnitId;
use crate::domain::user::{User, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestEvent {
    Submit,
    Approve,
    Return,
    Reject,
    Resubmit,
    Delegate,
    Edit,
}

impl RequestEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Approve => "approve",
            Self::Return => "return",
            Self::Reject => "reject",
            Self::Resubmit => "resubmit",
            Self::Delegate => "delegate",
            Self::Edit => "edit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submit" => Some(Self::Submit),
            "approve" => Some(Self::Approve),
            "return" => Some(Self::Return),
            "reject" => Some(Self::Reject),
            "resubmit" => Some(Self::Resubmit),
            "delegate" => Some(Self::Delegate),
            "edit" => Some(Self::Edit),
            _ => None,
        }
    }
}

impl std::fmt::Display for RequestEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition request as issued by an actor. Carrying the full command lets
/// a caller re-evaluate it against a freshly read record after a conflict.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestCommand {
    Submit,
    Approve,
    Return,
    Reject,
    Resubmit,
    Delegate { delegate: User },
    Edit { payload: FormPayload, tags: TagSet, document: Option<DocumentRef> },
}

impl RequestCommand {
    pub fn event(&self) -> RequestEvent {
        match self {
            Self::Submit => RequestEvent::Submit,
            Self::Approve => RequestEvent::Approve,
            Self::Return => RequestEvent::Return,
            Self::Reject => RequestEvent::Reject,
            Self::Resubmit => RequestEvent::Resubmit,
            Self::Delegate { .. } => RequestEvent::Delegate,
            Self::Edit { .. } => RequestEvent::Edit,
        }
    }
}

/// Routing decision computed by `advance`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RouteMove {
    NextStep { step_number: u32, unit_id: UnitId, approver_id: UserId },
    ParentUnit { unit_id: UnitId, approver_id: UserId },
    FinalApproval,
}

impl RouteMove {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FinalApproval)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub request_id: RequestId,
    pub event: RequestEvent,
    pub actor_id: UserId,
    pub from_status: RequestStatus,
    pub to_status: RequestStatus,
    pub from_unit_id: Option<UnitId>,
    pub to_unit_id: Option<UnitId>,
    pub step_number: u32,
    pub route: Option<RouteMove>,
}

#[cfg(test)]
mod tests {
    use super::{RequestCommand, RequestEvent};

    #[test]
    fn event_storage_encoding_round_trips() {
        let events = [
            RequestEvent::Submit,
            RequestEvent::Approve,
            RequestEvent::Return,
            RequestEvent::Reject,
            RequestEvent::Resubmit,
            RequestEvent::Delegate,
            RequestEvent::Edit,
        ];
        for event in events {
            assert_eq!(RequestEvent::parse(event.as_str()), Some(event));
        }
    }

    #[test]
    fn commands_report_their_event() {
        assert_eq!(RequestCommand::Approve.event(), RequestEvent::Approve);
        assert_eq!(RequestCommand::Resubmit.event(), RequestEvent::Resubmit);
    }
}
