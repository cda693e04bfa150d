//! Administrative mutations of the unit tree, step plans and user identity.
//! These never touch requests; in-flight requests that reference a changed
//! plan surface as stale on their next approval.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;

use formflow_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, NoopAuditSink};
use formflow_core::domain::request::RequestType;
use formflow_core::domain::unit::{OrganizationalUnit, UnitId};
use formflow_core::domain::user::{Role, User, UserId};
use formflow_core::org::{OrgTree, TreeError};
use formflow_core::plan::StepPlan;

use crate::repositories::{
    OrgUnitRepository, RepositoryError, SqlOrgUnitRepository, SqlStepPlanRepository, SqlUserRepository,
    StepPlanRepository, UserRepository,
};
use crate::workflow::WorkflowError;
use crate::DbPool;

/// Deterministic id for a unit created by name, e.g. `Health and Wellness`
/// becomes `unit-health-and-wellness`.
pub fn unit_id_for_name(name: &str) -> UnitId {
    let slug = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("-");
    UnitId(format!("unit-{slug}"))
}

pub struct OrgAdmin {
    units: Arc<dyn OrgUnitRepository>,
    users: Arc<dyn UserRepository>,
    plans: Arc<dyn StepPlanRepository>,
    audit: Arc<dyn AuditSink>,
    operator: String,
}

impl OrgAdmin {
    pub fn new(
        units: Arc<dyn OrgUnitRepository>,
        users: Arc<dyn UserRepository>,
        plans: Arc<dyn StepPlanRepository>,
    ) -> Self {
        Self { units, users, plans, audit: Arc::new(NoopAuditSink), operator: "system".to_owned() }
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Self::new(
            Arc::new(SqlOrgUnitRepository::new(pool.clone())),
            Arc::new(SqlUserRepository::new(pool.clone())),
            Arc::new(SqlStepPlanRepository::new(pool)),
        )
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = operator.into();
        self
    }

    pub async fn unit_by_name(&self, name: &str) -> Result<OrganizationalUnit, WorkflowError> {
        self.units
            .find_by_name(name)
            .await?
            .ok_or_else(|| WorkflowError::UnitNotFound(name.to_owned()))
    }

    pub async fn create_unit(
        &self,
        name: &str,
        parent_id: Option<&UnitId>,
        correlation_id: &str,
    ) -> Result<OrganizationalUnit, WorkflowError> {
        let id = unit_id_for_name(name);
        if self.units.find_by_name(name).await?.is_some()
            || self.units.find_by_id(&id).await?.is_some()
        {
            return Err(TreeError::DuplicateUnit(id).into());
        }

        let unit = match parent_id {
            Some(parent) => {
                if self.units.find_by_id(parent).await?.is_none() {
                    return Err(TreeError::UnknownParent { unit: id, parent: parent.clone() }.into());
                }
                OrganizationalUnit::child(id.0, name, parent)
            }
            None => {
                let units = self.units.list().await?;
                if let Some(root) = units.iter().find(|unit| unit.parent_id.is_none()) {
                    return Err(TreeError::SecondRoot { unit: id, root: root.id.clone() }.into());
                }
                OrganizationalUnit::root(id.0, name)
            }
        };
        self.units.insert(unit.clone()).await?;

        self.record("org.unit_created", correlation_id, &[("unit", unit.id.0.as_str()), ("name", name)]);
        Ok(unit)
    }

    /// Moves a unit; rejected when the new parent sits in the unit's own
    /// subtree or when detaching it would leave two roots.
    pub async fn reparent_unit(
        &self,
        unit_id: &UnitId,
        parent_id: Option<&UnitId>,
        correlation_id: &str,
    ) -> Result<(), WorkflowError> {
        self.units.reparent(unit_id, parent_id).await.map_err(|error| match error {
            RepositoryError::Tree(error) => WorkflowError::Tree(error),
            other => other.into(),
        })?;

        let parent = parent_id.map(|id| id.0.as_str()).unwrap_or("");
        self.record("org.unit_reparented", correlation_id, &[("unit", unit_id.0.as_str()), ("parent", parent)]);
        Ok(())
    }

    /// Overwrites the unit's manager and grants the manager role if the user
    /// does not hold it yet.
    pub async fn assign_manager(
        &self,
        unit_id: &UnitId,
        user_id: &UserId,
        correlation_id: &str,
    ) -> Result<(), WorkflowError> {
        let mut user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| WorkflowError::UserNotFound(user_id.clone()))?;
        if self.units.find_by_id(unit_id).await?.is_none() {
            return Err(WorkflowError::UnitNotFound(unit_id.0.clone()));
        }

        self.units.set_manager(unit_id, user_id).await?;
        if !user.has_role(Role::Manager) {
            user.roles.insert(Role::Manager);
            self.users.save(user).await?;
        }

        self.record(
            "org.manager_assigned",
            correlation_id,
            &[("unit", unit_id.0.as_str()), ("manager", user_id.0.as_str())],
        );
        Ok(())
    }

    pub async fn show_plan(&self, request_type: RequestType) -> Result<StepPlan, WorkflowError> {
        Ok(self.plans.load_plan(request_type).await?)
    }

    /// Replaces the whole plan for one type. Every unit must already exist.
    pub async fn replace_plan(
        &self,
        request_type: RequestType,
        unit_ids: Vec<UnitId>,
        entry_unit_id: Option<UnitId>,
        correlation_id: &str,
    ) -> Result<StepPlan, WorkflowError> {
        let tree = OrgTree::from_units(self.units.list().await?)?;
        if let Some(missing) =
            unit_ids.iter().chain(entry_unit_id.iter()).find(|id| tree.get(id).is_none())
        {
            return Err(TreeError::UnknownUnit(missing.clone()).into());
        }

        let plan = StepPlan::from_units(request_type, unit_ids).with_entry_unit(entry_unit_id);
        self.plans.replace_plan(&plan).await?;

        let steps = plan.len().to_string();
        self.record(
            "plan.replaced",
            correlation_id,
            &[("request_type", request_type.as_str()), ("steps", steps.as_str())],
        );
        Ok(plan)
    }

    pub async fn set_user_active(
        &self,
        user_id: &UserId,
        active: bool,
        correlation_id: &str,
    ) -> Result<User, WorkflowError> {
        let mut user = self.existing_user(user_id).await?;
        user.active = active;
        self.users.save(user.clone()).await?;

        let state = if active { "active" } else { "inactive" };
        self.record("user.activation_changed", correlation_id, &[("user", user_id.0.as_str()), ("state", state)]);
        Ok(user)
    }

    pub async fn set_user_roles(
        &self,
        user_id: &UserId,
        roles: BTreeSet<Role>,
        correlation_id: &str,
    ) -> Result<User, WorkflowError> {
        let mut user = self.existing_user(user_id).await?;
        user.roles = roles;
        self.users.save(user.clone()).await?;

        let names = user.roles.iter().map(Role::as_str).collect::<Vec<_>>().join(",");
        self.record("user.roles_changed", correlation_id, &[("user", user_id.0.as_str()), ("roles", names.as_str())]);
        Ok(user)
    }

    async fn existing_user(&self, user_id: &UserId) -> Result<User, WorkflowError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| WorkflowError::UserNotFound(user_id.clone()))
    }

    fn record(&self, event_name: &'static str, correlation_id: &str, fields: &[(&str, &str)]) {
        info!(
            event_name,
            correlation_id = %correlation_id,
            actor = %self.operator,
            details = ?fields,
            "administrative change applied"
        );

        let event = fields.iter().fold(
            AuditContext::new(None, correlation_id, self.operator.clone()).event(
                event_name,
                AuditCategory::Administration,
                AuditOutcome::Success,
            ),
            |event, (key, value)| event.with_metadata(*key, *value),
        );
        self.audit.emit(event);
    }
}
