use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::delegation;
use crate::domain::form::{DocumentRef, FormPayload, TagSet};
use crate::domain::request::{Request, RequestId, RequestStatus, RequestType};
use crate::domain::unit::UnitId;
use crate::domain::user::{User, UserId};
use crate::flows::states::{RequestCommand, RequestEvent, RouteMove, TransitionOutcome};
use crate::guard;
use crate::org::OrgTree;
use crate::plan::StepPlan;

/// Configuration snapshot a transition is evaluated against. Callers must
/// read both under the same lock/transaction as the request itself.
#[derive(Clone, Copy, Debug)]
pub struct RoutingContext<'a> {
    pub tree: &'a OrgTree,
    pub plan: &'a StepPlan,
}

impl<'a> RoutingContext<'a> {
    pub fn new(tree: &'a OrgTree, plan: &'a StepPlan) -> Self {
        Self { tree, plan }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("user `{actor}` may not {event} request `{request_id}`")]
    Unauthorized { request_id: RequestId, actor: UserId, event: RequestEvent },
    #[error("cannot {event} request `{request_id}` while it is {}", .status.as_str())]
    InvalidTransition { request_id: RequestId, status: RequestStatus, event: RequestEvent },
    #[error("request `{request_id}` cannot be routed: {reason}")]
    UnroutableConfiguration { request_id: RequestId, reason: String },
    #[error(
        "request `{request_id}` references step {step_number} of plan `{request_type}` which no longer matches ({plan_len} steps configured)"
    )]
    StalePlan { request_id: RequestId, request_type: RequestType, step_number: u32, plan_len: u32 },
    #[error("request `{request_id}` points at unit `{unit_id}` which is not part of the organizational tree")]
    UnknownUnit { request_id: RequestId, unit_id: UnitId },
    #[error("request `{request_id}` was modified concurrently")]
    ConcurrentModification { request_id: RequestId },
    #[error("user `{delegate}` cannot be delegated request `{request_id}`: {reason}")]
    IneligibleDelegate { request_id: RequestId, delegate: UserId, reason: String },
}

impl RoutingError {
    fn unroutable(request: &Request, reason: impl Into<String>) -> Self {
        Self::UnroutableConfiguration { request_id: request.id.clone(), reason: reason.into() }
    }

    fn stale(request: &Request, plan: &StepPlan) -> Self {
        Self::StalePlan {
            request_id: request.id.clone(),
            request_type: request.request_type,
            step_number: request.current_step_number,
            plan_len: plan.len(),
        }
    }

    /// Failures that reflect broken administration rather than a bad user
    /// action.
    pub fn needs_administrator(&self) -> bool {
        matches!(
            self,
            Self::UnroutableConfiguration { .. } | Self::StalePlan { .. } | Self::UnknownUnit { .. }
        )
    }
}

/// Stateless decision logic for the request lifecycle. All durable state lives
/// on the `Request` passed in; nothing is mutated when an error is returned.
#[derive(Clone, Copy, Debug, Default)]
pub struct RoutingEngine;

impl RoutingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Computes who owns the request after an approval, without applying it.
    ///
    /// Configured steps are consumed first; once the plan is exhausted the
    /// request climbs parent units until the root grants final approval.
    pub fn next_owner(
        &self,
        request: &Request,
        context: &RoutingContext<'_>,
    ) -> Result<RouteMove, RoutingError> {
        ensure_plan_type(request, context.plan)?;

        let Some(current_unit) = request.current_unit_id.as_ref() else {
            return Err(RoutingError::unroutable(request, "request has no current unit"));
        };
        if context.tree.get(current_unit).is_none() {
            return Err(RoutingError::UnknownUnit {
                request_id: request.id.clone(),
                unit_id: current_unit.clone(),
            });
        }
        ensure_plan_fresh(request, current_unit, context)?;

        if let Some(step) = context.plan.get_step(request.current_step_number + 1) {
            let approver_id = routable_manager(request, context.tree, &step.unit_id)?;
            return Ok(RouteMove::NextStep {
                step_number: step.step_number,
                unit_id: step.unit_id.clone(),
                approver_id,
            });
        }

        if let Some(parent) = context.tree.get_parent(current_unit) {
            let approver_id = routable_manager(request, context.tree, &parent.id)?;
            return Ok(RouteMove::ParentUnit { unit_id: parent.id.clone(), approver_id });
        }

        Ok(RouteMove::FinalApproval)
    }

    pub fn advance(
        &self,
        request: &mut Request,
        context: &RoutingContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<RouteMove, RoutingError> {
        ensure_status(request, &[RequestStatus::Pending], RequestEvent::Approve)?;

        let route = self.next_owner(request, context)?;
        match &route {
            RouteMove::NextStep { step_number, unit_id, approver_id } => {
                request.current_step_number = *step_number;
                request.current_unit_id = Some(unit_id.clone());
                request.current_approver_id = Some(approver_id.clone());
            }
            RouteMove::ParentUnit { unit_id, approver_id } => {
                request.current_unit_id = Some(unit_id.clone());
                request.current_approver_id = Some(approver_id.clone());
            }
            RouteMove::FinalApproval => {
                request.status = RequestStatus::Approved;
                request.current_approver_id = None;
            }
        }
        delegation::clear(request);
        request.updated_at = now;

        Ok(route)
    }

    pub fn apply(
        &self,
        actor: &User,
        request: &mut Request,
        command: RequestCommand,
        context: &RoutingContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RoutingError> {
        let event = command.event();
        let from_status = request.status;
        let from_unit_id = request.current_unit_id.clone();

        let route = match command {
            RequestCommand::Submit => {
                ensure_status(request, &[RequestStatus::Draft], event)?;
                guard::authorize(actor, request, event)?;
                self.pin_to_start(request, context)?;
                None
            }
            RequestCommand::Approve => {
                ensure_status(request, &[RequestStatus::Pending], event)?;
                guard::authorize(actor, request, event)?;
                Some(self.advance(request, context, now)?)
            }
            RequestCommand::Return => {
                ensure_status(request, &[RequestStatus::Pending], event)?;
                guard::authorize(actor, request, event)?;
                request.status = RequestStatus::Returned;
                delegation::clear(request);
                None
            }
            RequestCommand::Reject => {
                ensure_status(request, &[RequestStatus::Pending], event)?;
                guard::authorize(actor, request, event)?;
                request.status = RequestStatus::Rejected;
                request.current_approver_id = None;
                delegation::clear(request);
                None
            }
            RequestCommand::Resubmit => {
                ensure_status(request, &[RequestStatus::Returned, RequestStatus::Draft], event)?;
                guard::authorize(actor, request, event)?;
                if request.was_ever_routed() {
                    self.resume(request, context)?;
                } else {
                    self.pin_to_start(request, context)?;
                }
                None
            }
            RequestCommand::Delegate { delegate } => {
                ensure_status(request, &[RequestStatus::Pending], event)?;
                guard::authorize(actor, request, event)?;
                delegation::check_eligibility(request, &delegate)?;
                delegation::assign(request, &delegate);
                None
            }
            RequestCommand::Edit { payload, tags, document } => {
                ensure_status(request, &[RequestStatus::Draft, RequestStatus::Returned], event)?;
                guard::authorize(actor, request, event)?;
                request.payload = payload;
                request.tags = tags;
                request.document = document;
                None
            }
        };
        request.updated_at = now;

        Ok(TransitionOutcome {
            request_id: request.id.clone(),
            event,
            actor_id: actor.id.clone(),
            from_status,
            to_status: request.status,
            from_unit_id,
            to_unit_id: request.current_unit_id.clone(),
            step_number: request.current_step_number,
            route,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn apply_with_audit<S>(
        &self,
        actor: &User,
        request: &mut Request,
        command: RequestCommand,
        context: &RoutingContext<'_>,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, RoutingError>
    where
        S: AuditSink + ?Sized,
    {
        let event = command.event();
        let category = AuditCategory::for_event(event);

        let result = self.apply(actor, request, command, context, now);
        match &result {
            Ok(outcome) => sink.emit(
                audit
                    .event("request.transition_applied", category, AuditOutcome::Success)
                    .with_metadata("event", event.as_str())
                    .with_metadata("from", outcome.from_status.as_str())
                    .with_metadata("to", outcome.to_status.as_str())
                    .with_metadata("step", outcome.step_number.to_string())
                    .with_metadata(
                        "unit",
                        outcome.to_unit_id.as_ref().map(|id| id.0.clone()).unwrap_or_default(),
                    ),
            ),
            Err(error) => {
                let outcome = if error.needs_administrator() {
                    AuditOutcome::Failed
                } else {
                    AuditOutcome::Rejected
                };
                sink.emit(
                    audit
                        .event("request.transition_rejected", category, outcome)
                        .with_metadata("event", event.as_str())
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }

    pub fn submit(
        &self,
        actor: &User,
        request: &mut Request,
        context: &RoutingContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RoutingError> {
        self.apply(actor, request, RequestCommand::Submit, context, now)
    }

    pub fn approve(
        &self,
        actor: &User,
        request: &mut Request,
        context: &RoutingContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RoutingError> {
        self.apply(actor, request, RequestCommand::Approve, context, now)
    }

    pub fn return_request(
        &self,
        actor: &User,
        request: &mut Request,
        context: &RoutingContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RoutingError> {
        self.apply(actor, request, RequestCommand::Return, context, now)
    }

    pub fn reject(
        &self,
        actor: &User,
        request: &mut Request,
        context: &RoutingContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RoutingError> {
        self.apply(actor, request, RequestCommand::Reject, context, now)
    }

    pub fn resubmit(
        &self,
        actor: &User,
        request: &mut Request,
        context: &RoutingContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RoutingError> {
        self.apply(actor, request, RequestCommand::Resubmit, context, now)
    }

    pub fn delegate(
        &self,
        actor: &User,
        request: &mut Request,
        delegate: &User,
        context: &RoutingContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RoutingError> {
        let command = RequestCommand::Delegate { delegate: delegate.clone() };
        self.apply(actor, request, command, context, now)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn edit(
        &self,
        actor: &User,
        request: &mut Request,
        payload: FormPayload,
        tags: TagSet,
        document: Option<DocumentRef>,
        context: &RoutingContext<'_>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, RoutingError> {
        self.apply(actor, request, RequestCommand::Edit { payload, tags, document }, context, now)
    }

    fn pin_to_start(
        &self,
        request: &mut Request,
        context: &RoutingContext<'_>,
    ) -> Result<(), RoutingError> {
        ensure_plan_type(request, context.plan)?;

        let Some(start) = context.plan.starting_point() else {
            return Err(RoutingError::unroutable(
                request,
                format!(
                    "plan `{}` has no steps and no entry unit configured",
                    request.request_type
                ),
            ));
        };
        let approver_id = routable_manager(request, context.tree, &start.unit_id)?;

        request.status = RequestStatus::Pending;
        request.current_step_number = start.step_number;
        request.current_unit_id = Some(start.unit_id);
        request.current_approver_id = Some(approver_id);
        delegation::clear(request);
        Ok(())
    }

    /// Returns a previously routed request to the unit and step it left from.
    /// The approver is re-read from the unit so a manager reassignment made in
    /// the meantime is honoured.
    fn resume(&self, request: &mut Request, context: &RoutingContext<'_>) -> Result<(), RoutingError> {
        let Some(unit_id) = request.current_unit_id.clone() else {
            return Err(RoutingError::unroutable(request, "request has no current unit"));
        };
        let approver_id = routable_manager(request, context.tree, &unit_id)?;

        request.status = RequestStatus::Pending;
        request.current_approver_id = Some(approver_id);
        delegation::clear(request);
        Ok(())
    }
}

fn ensure_status(
    request: &Request,
    allowed: &[RequestStatus],
    event: RequestEvent,
) -> Result<(), RoutingError> {
    if allowed.contains(&request.status) {
        return Ok(());
    }

    Err(RoutingError::InvalidTransition {
        request_id: request.id.clone(),
        status: request.status,
        event,
    })
}

fn ensure_plan_type(request: &Request, plan: &StepPlan) -> Result<(), RoutingError> {
    if plan.request_type() == request.request_type {
        return Ok(());
    }

    Err(RoutingError::unroutable(
        request,
        format!("plan `{}` was supplied for a `{}` request", plan.request_type(), request.request_type),
    ))
}

/// The request's step must still exist and its unit must still sit at or
/// below the current unit; otherwise the plan was replaced underneath it.
fn ensure_plan_fresh(
    request: &Request,
    current_unit: &UnitId,
    context: &RoutingContext<'_>,
) -> Result<(), RoutingError> {
    let step_number = request.current_step_number;

    if step_number == 0 {
        if context.plan.is_empty() {
            return Ok(());
        }
        return Err(RoutingError::stale(request, context.plan));
    }

    let Some(step) = context.plan.get_step(step_number) else {
        return Err(RoutingError::stale(request, context.plan));
    };
    if !context.tree.is_ancestor_or_self(current_unit, &step.unit_id) {
        return Err(RoutingError::stale(request, context.plan));
    }

    Ok(())
}

fn routable_manager(
    request: &Request,
    tree: &OrgTree,
    unit_id: &UnitId,
) -> Result<UserId, RoutingError> {
    let Some(unit) = tree.get(unit_id) else {
        return Err(RoutingError::UnknownUnit {
            request_id: request.id.clone(),
            unit_id: unit_id.clone(),
        });
    };

    unit.manager_id.clone().ok_or_else(|| {
        RoutingError::unroutable(request, format!("unit `{}` has no manager assigned", unit.name))
    })
}
