//! Authorization predicates. Every check takes the acting user explicitly;
//! there is no ambient "current user".

use crate::delegation::effective_approver;
use crate::domain::request::{Request, RequestStatus};
use crate::domain::unit::OrganizationalUnit;
use crate::domain::user::User;
use crate::flows::engine::RoutingError;
use crate::flows::states::RequestEvent;

pub fn can_approve(user: &User, request: &Request) -> bool {
    request.status == RequestStatus::Pending && effective_approver(request) == Some(&user.id)
}

/// Delegates may not re-delegate.
pub fn can_delegate(user: &User, request: &Request) -> bool {
    request.current_approver_id.as_ref() == Some(&user.id)
}

pub fn can_edit(user: &User, request: &Request) -> bool {
    request.submitter_id == user.id && request.status.is_editable()
}

pub fn can_view_unit_queue(user: &User, unit: &OrganizationalUnit) -> bool {
    unit.manager_id.as_ref() == Some(&user.id)
}

/// A unit employee sees a queued request only while it is delegated to them.
pub fn can_view_queued_request(user: &User, unit: &OrganizationalUnit, request: &Request) -> bool {
    if can_view_unit_queue(user, unit) {
        return true;
    }

    user.belongs_to(&unit.id) && request.delegated_to_id.as_ref() == Some(&user.id)
}

/// Actor check only; state legality is decided by the flow engine before this
/// is consulted.
pub fn permits(user: &User, request: &Request, event: RequestEvent) -> bool {
    match event {
        RequestEvent::Submit | RequestEvent::Resubmit | RequestEvent::Edit => {
            request.submitter_id == user.id
        }
        RequestEvent::Approve | RequestEvent::Return | RequestEvent::Reject => {
            effective_approver(request) == Some(&user.id)
        }
        RequestEvent::Delegate => can_delegate(user, request),
    }
}

pub fn authorize(user: &User, request: &Request, event: RequestEvent) -> Result<(), RoutingError> {
    if permits(user, request, event) {
        return Ok(());
    }

    Err(RoutingError::Unauthorized {
        request_id: request.id.clone(),
        actor: user.id.clone(),
        event,
    })
}
