//! Lets the approving manager hand the *actor* role to an employee of the same
//! unit without touching ownership (unit, step, plan).

use crate::domain::request::Request;
use crate::domain::user::{Role, User, UserId};
use crate::flows::engine::RoutingError;

/// The user expected to act on `request` right now.
pub fn effective_approver(request: &Request) -> Option<&UserId> {
    request.delegated_to_id.as_ref().or(request.current_approver_id.as_ref())
}

/// Checks that `delegate` may stand in for the manager of the request's
/// current unit.
pub fn check_eligibility(request: &Request, delegate: &User) -> Result<(), RoutingError> {
    let ineligible = |reason: &str| RoutingError::IneligibleDelegate {
        request_id: request.id.clone(),
        delegate: delegate.id.clone(),
        reason: reason.to_string(),
    };

    if !delegate.active {
        return Err(ineligible("delegate account is inactive"));
    }
    if !delegate.has_role(Role::Employee) {
        return Err(ineligible("delegate does not hold the employee role"));
    }
    let Some(unit_id) = request.current_unit_id.as_ref() else {
        return Err(ineligible("request is not assigned to a unit"));
    };
    if !delegate.belongs_to(unit_id) {
        return Err(ineligible("delegate is not a member of the current unit"));
    }
    if request.current_approver_id.as_ref() == Some(&delegate.id) {
        return Err(ineligible("delegate is already the current approver"));
    }

    Ok(())
}

pub fn assign(request: &mut Request, delegate: &User) -> Option<UserId> {
    request.delegated_to_id.replace(delegate.id.clone())
}

/// Delegation is scoped to the current unit/step; every move or return drops it.
pub fn clear(request: &mut Request) -> Option<UserId> {
    request.delegated_to_id.take()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{assign, check_eligibility, clear, effective_approver};
    use crate::domain::form::FormPayload;
    use crate::domain::request::{Request, RequestStatus, RequestType};
    use crate::domain::unit::UnitId;
    use crate::domain::user::{Role, User, UserId};
    use crate::flows::engine::RoutingError;

    fn pending_at_advising() -> Request {
        let mut request = Request::draft(
            UserId("student-1".to_string()),
            RequestType::StudentDrop,
            FormPayload::default(),
            Utc::now(),
        );
        request.status = RequestStatus::Pending;
        request.current_step_number = 1;
        request.current_unit_id = Some(UnitId("unit-advising".to_string()));
        request.current_approver_id = Some(UserId("mgr-advising".to_string()));
        request
    }

    fn advising_employee() -> User {
        User::new("emp-1", "Grace")
            .with_role(Role::Employee)
            .in_unit(&UnitId("unit-advising".to_string()))
    }

    #[test]
    fn effective_approver_prefers_delegate() {
        let mut request = pending_at_advising();
        assert_eq!(effective_approver(&request).map(|id| id.0.as_str()), Some("mgr-advising"));

        assign(&mut request, &advising_employee());
        assert_eq!(effective_approver(&request).map(|id| id.0.as_str()), Some("emp-1"));

        assert_eq!(clear(&mut request), Some(UserId("emp-1".to_string())));
        assert_eq!(effective_approver(&request).map(|id| id.0.as_str()), Some("mgr-advising"));
    }

    #[test]
    fn eligible_employee_passes() {
        check_eligibility(&pending_at_advising(), &advising_employee()).expect("eligible");
    }

    #[test]
    fn inactive_foreign_or_non_employee_delegates_are_rejected() {
        let request = pending_at_advising();

        let mut inactive = advising_employee();
        inactive.active = false;

        let foreign = User::new("emp-2", "Linus")
            .with_role(Role::Employee)
            .in_unit(&UnitId("unit-health".to_string()));

        let student = User::new("student-2", "Alan").in_unit(&UnitId("unit-advising".to_string()));

        for candidate in [inactive, foreign, student] {
            let error = check_eligibility(&request, &candidate).expect_err("must be rejected");
            assert!(matches!(error, RoutingError::IneligibleDelegate { .. }));
        }
    }
}
