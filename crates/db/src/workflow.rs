//! Request lifecycle service: loads the tree, plan and request, runs the
//! routing engine, and persists the result under optimistic concurrency.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use formflow_core::audit::{AuditContext, AuditSink, NoopAuditSink};
use formflow_core::config::RoutingConfig;
use formflow_core::domain::form::{DocumentRef, FormPayload, TagSet};
use formflow_core::domain::request::{Request, RequestId, RequestType};
use formflow_core::domain::transition::RequestTransition;
use formflow_core::domain::unit::UnitId;
use formflow_core::domain::user::{User, UserId};
use formflow_core::errors::{ApplicationError, DomainError};
use formflow_core::flows::{RequestCommand, RoutingContext, RoutingEngine, RoutingError};
use formflow_core::forms::FormRegistry;
use formflow_core::guard;
use formflow_core::org::{OrgTree, TreeError};
use formflow_core::plan::PlanError;

use crate::repositories::{
    OrgUnitRepository, RepositoryError, RequestRepository, SqlOrgUnitRepository,
    SqlRequestRepository, SqlStepPlanRepository, SqlUserRepository, StepPlanRepository,
    UserRepository,
};
use crate::DbPool;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("request `{0}` not found")]
    RequestNotFound(RequestId),
    #[error("user `{0}` not found")]
    UserNotFound(UserId),
    #[error("user `{0}` is deactivated")]
    InactiveUser(UserId),
    #[error("organizational unit `{0}` not found")]
    UnitNotFound(String),
    #[error("user `{actor}` may not view the queue of unit `{unit_id}`")]
    QueueForbidden { actor: UserId, unit_id: UnitId },
}

impl WorkflowError {
    pub fn into_application(self) -> ApplicationError {
        match self {
            Self::Routing(error) => ApplicationError::from(error),
            Self::Tree(error) => DomainError::from(error).into(),
            Self::Plan(error) => DomainError::from(error).into(),
            Self::Repository(RepositoryError::VersionConflict { request_id, .. }) => {
                ApplicationError::from(RoutingError::ConcurrentModification { request_id })
            }
            Self::Repository(RepositoryError::Tree(error)) => DomainError::from(error).into(),
            Self::Repository(error) => ApplicationError::Persistence(error.to_string()),
            error @ (Self::InactiveUser(_) | Self::QueueForbidden { .. }) => {
                DomainError::AccessDenied(error.to_string()).into()
            }
            error @ (Self::RequestNotFound(_) | Self::UserNotFound(_) | Self::UnitNotFound(_)) => {
                DomainError::InvariantViolation(error.to_string()).into()
            }
        }
    }
}

/// What a submitter fills in when creating a draft.
#[derive(Clone, Debug, Default)]
pub struct DraftInput {
    pub payload: FormPayload,
    pub tags: TagSet,
    pub signature_ref: Option<String>,
}

pub struct RequestWorkflow {
    units: Arc<dyn OrgUnitRepository>,
    users: Arc<dyn UserRepository>,
    plans: Arc<dyn StepPlanRepository>,
    requests: Arc<dyn RequestRepository>,
    audit: Arc<dyn AuditSink>,
    forms: FormRegistry,
    engine: RoutingEngine,
    conflict_retries: u32,
}

impl RequestWorkflow {
    pub fn new(
        units: Arc<dyn OrgUnitRepository>,
        users: Arc<dyn UserRepository>,
        plans: Arc<dyn StepPlanRepository>,
        requests: Arc<dyn RequestRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            units,
            users,
            plans,
            requests,
            audit,
            forms: FormRegistry::standard(),
            engine: RoutingEngine::new(),
            conflict_retries: 1,
        }
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Self::new(
            Arc::new(SqlOrgUnitRepository::new(pool.clone())),
            Arc::new(SqlUserRepository::new(pool.clone())),
            Arc::new(SqlStepPlanRepository::new(pool.clone())),
            Arc::new(SqlRequestRepository::new(pool)),
            Arc::new(NoopAuditSink),
        )
    }

    /// SQL-backed workflow tuned by the `[routing]` section of the config.
    pub fn from_config(pool: DbPool, routing: &RoutingConfig) -> Self {
        Self::from_pool(pool).with_routing(routing)
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_routing(self, routing: &RoutingConfig) -> Self {
        self.with_conflict_retries(routing.conflict_retries)
    }

    /// Number of reload-and-reapply attempts after a lost version race.
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    pub async fn create_draft(
        &self,
        submitter_id: &UserId,
        request_type: RequestType,
        input: DraftInput,
        correlation_id: &str,
    ) -> Result<Request, WorkflowError> {
        let submitter = self.active_user(submitter_id).await?;

        let mut draft = Request::draft(submitter.id.clone(), request_type, input.payload, Utc::now());
        draft.tags = input.tags;
        draft.document = self.forms.get(request_type).map(|form| DocumentRef {
            document_name: form.document_name(&draft.id),
            signature_ref: input.signature_ref,
        });
        self.requests.insert(&draft).await?;

        info!(
            event_name = "request.draft_created",
            correlation_id = %correlation_id,
            request_id = %draft.id,
            actor = %submitter.id,
            request_type = request_type.as_str(),
            "request draft created"
        );
        Ok(draft)
    }

    pub async fn submit(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        correlation_id: &str,
    ) -> Result<Request, WorkflowError> {
        self.execute(actor_id, request_id, RequestCommand::Submit, correlation_id).await
    }

    pub async fn approve(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        correlation_id: &str,
    ) -> Result<Request, WorkflowError> {
        self.execute(actor_id, request_id, RequestCommand::Approve, correlation_id).await
    }

    pub async fn return_request(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        correlation_id: &str,
    ) -> Result<Request, WorkflowError> {
        self.execute(actor_id, request_id, RequestCommand::Return, correlation_id).await
    }

    pub async fn reject(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        correlation_id: &str,
    ) -> Result<Request, WorkflowError> {
        self.execute(actor_id, request_id, RequestCommand::Reject, correlation_id).await
    }

    pub async fn resubmit(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        correlation_id: &str,
    ) -> Result<Request, WorkflowError> {
        self.execute(actor_id, request_id, RequestCommand::Resubmit, correlation_id).await
    }

    pub async fn delegate(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        delegate_id: &UserId,
        correlation_id: &str,
    ) -> Result<Request, WorkflowError> {
        let delegate = self
            .users
            .find_by_id(delegate_id)
            .await?
            .ok_or_else(|| WorkflowError::UserNotFound(delegate_id.clone()))?;
        self.execute(actor_id, request_id, RequestCommand::Delegate { delegate }, correlation_id)
            .await
    }

    pub async fn edit(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        input: DraftInput,
        correlation_id: &str,
    ) -> Result<Request, WorkflowError> {
        let current = self.find(request_id).await?;
        let document = current.document.map(|document| DocumentRef {
            signature_ref: input.signature_ref.or(document.signature_ref),
            ..document
        });
        let command = RequestCommand::Edit { payload: input.payload, tags: input.tags, document };
        self.execute(actor_id, request_id, command, correlation_id).await
    }

    pub async fn find(&self, request_id: &RequestId) -> Result<Request, WorkflowError> {
        self.requests
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| WorkflowError::RequestNotFound(request_id.clone()))
    }

    pub async fn history(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RequestTransition>, WorkflowError> {
        self.find(request_id).await?;
        Ok(self.requests.list_transitions(request_id).await?)
    }

    pub async fn my_requests(&self, submitter_id: &UserId) -> Result<Vec<Request>, WorkflowError> {
        Ok(self.requests.list_by_submitter(submitter_id).await?)
    }

    /// Only the unit's manager sees the whole unit queue.
    pub async fn unit_queue(
        &self,
        actor_id: &UserId,
        unit_id: &UnitId,
    ) -> Result<Vec<Request>, WorkflowError> {
        let actor = self.active_user(actor_id).await?;
        let unit = self
            .units
            .find_by_id(unit_id)
            .await?
            .ok_or_else(|| WorkflowError::UnitNotFound(unit_id.0.clone()))?;
        if !guard::can_view_unit_queue(&actor, &unit) {
            return Err(WorkflowError::QueueForbidden { actor: actor.id, unit_id: unit.id });
        }

        Ok(self.requests.list_for_unit(unit_id).await?)
    }

    pub async fn delegated_queue(&self, actor_id: &UserId) -> Result<Vec<Request>, WorkflowError> {
        Ok(self.requests.list_delegated_to(actor_id).await?)
    }

    pub async fn approver_queue(&self, actor_id: &UserId) -> Result<Vec<Request>, WorkflowError> {
        Ok(self.requests.list_for_approver(actor_id).await?)
    }

    async fn active_user(&self, user_id: &UserId) -> Result<User, WorkflowError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| WorkflowError::UserNotFound(user_id.clone()))?;
        if !user.active {
            return Err(WorkflowError::InactiveUser(user.id));
        }
        Ok(user)
    }

    async fn load_tree(&self) -> Result<OrgTree, WorkflowError> {
        Ok(OrgTree::from_units(self.units.list().await?)?)
    }

    /// Reads a fresh snapshot, applies `command`, and writes it back only if
    /// nobody else wrote in between. A lost race reloads and re-applies up to
    /// `conflict_retries` times; the re-application re-runs every state and
    /// permission check against the newer snapshot.
    async fn execute(
        &self,
        actor_id: &UserId,
        request_id: &RequestId,
        command: RequestCommand,
        correlation_id: &str,
    ) -> Result<Request, WorkflowError> {
        let actor = self.active_user(actor_id).await?;
        let event = command.event();
        let mut attempt = 0;

        loop {
            let mut request = self.find(request_id).await?;
            let tree = self.load_tree().await?;
            let plan = self.plans.load_plan(request.request_type).await?;
            let context = RoutingContext::new(&tree, &plan);
            let audit = AuditContext::new(Some(request.id.clone()), correlation_id, actor.id.0.clone());
            let expected_version = request.version;
            let now = Utc::now();

            let outcome = match self.engine.apply_with_audit(
                &actor,
                &mut request,
                command.clone(),
                &context,
                now,
                self.audit.as_ref(),
                &audit,
            ) {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(
                        event_name = "request.transition_rejected",
                        correlation_id = %correlation_id,
                        request_id = %request_id,
                        actor = %actor.id,
                        event = event.as_str(),
                        needs_administrator = error.needs_administrator(),
                        error = %error,
                        "request transition rejected"
                    );
                    return Err(error.into());
                }
            };

            request.version = expected_version + 1;
            let transition = RequestTransition::record(&outcome, correlation_id, request.version, now);
            match self.requests.update_if_version(&request, expected_version, &transition).await {
                Ok(()) => {
                    info!(
                        event_name = "request.transition_applied",
                        correlation_id = %correlation_id,
                        request_id = %request.id,
                        actor = %actor.id,
                        event = event.as_str(),
                        from = outcome.from_status.as_str(),
                        to = outcome.to_status.as_str(),
                        step_number = outcome.step_number,
                        version = request.version,
                        "request transition applied"
                    );
                    return Ok(request);
                }
                Err(RepositoryError::VersionConflict { .. }) if attempt < self.conflict_retries => {
                    attempt += 1;
                    warn!(
                        event_name = "request.version_conflict_retry",
                        correlation_id = %correlation_id,
                        request_id = %request_id,
                        actor = %actor.id,
                        attempt,
                        "request changed underneath; reloading"
                    );
                }
                Err(RepositoryError::VersionConflict { .. }) => {
                    warn!(
                        event_name = "request.version_conflict",
                        correlation_id = %correlation_id,
                        request_id = %request_id,
                        actor = %actor.id,
                        "giving up after repeated version conflicts"
                    );
                    return Err(RoutingError::ConcurrentModification {
                        request_id: request_id.clone(),
                    }
                    .into());
                }
                Err(error) => return Err(error.into()),
            }
        }
    }
}
