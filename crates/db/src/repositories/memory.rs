use std::collections::{BTreeMap, BTreeSet, HashMap};

use tokio::sync::RwLock;

use formflow_core::domain::request::{Request, RequestId, RequestStatus, RequestType};
use formflow_core::domain::transition::RequestTransition;
use formflow_core::domain::unit::{OrganizationalUnit, UnitId};
use formflow_core::domain::user::{Role, User, UserId};
use formflow_core::org::OrgTree;
use formflow_core::plan::{ApprovalStep, StepPlan};

use super::{
    OrgUnitRepository, RepositoryError, RequestRepository, StepPlanRepository, UserRepository,
};

#[derive(Default)]
pub struct InMemoryOrgUnitRepository {
    units: RwLock<BTreeMap<UnitId, OrganizationalUnit>>,
}

#[async_trait::async_trait]
impl OrgUnitRepository for InMemoryOrgUnitRepository {
    async fn find_by_id(&self, id: &UnitId) -> Result<Option<OrganizationalUnit>, RepositoryError> {
        let units = self.units.read().await;
        Ok(units.get(id).cloned())
    }

    async fn find_by_name(
        &self,
        name: &str,
    ) -> Result<Option<OrganizationalUnit>, RepositoryError> {
        let units = self.units.read().await;
        Ok(units.values().find(|unit| unit.name == name).cloned())
    }

    async fn list(&self) -> Result<Vec<OrganizationalUnit>, RepositoryError> {
        let units = self.units.read().await;
        Ok(units.values().cloned().collect())
    }

    async fn insert(&self, unit: OrganizationalUnit) -> Result<(), RepositoryError> {
        let mut units = self.units.write().await;
        if units.contains_key(&unit.id) || units.values().any(|existing| existing.name == unit.name)
        {
            return Err(RepositoryError::Duplicate { kind: "unit", id: unit.id.0 });
        }
        if unit.parent_id.is_none() && units.values().any(|existing| existing.parent_id.is_none()) {
            return Err(RepositoryError::Duplicate { kind: "root unit", id: unit.id.0 });
        }
        units.insert(unit.id.clone(), unit);
        Ok(())
    }

    async fn set_manager(&self, id: &UnitId, manager_id: &UserId) -> Result<(), RepositoryError> {
        let mut units = self.units.write().await;
        let unit = units.get_mut(id).ok_or_else(|| RepositoryError::not_found("unit", id.0.clone()))?;
        unit.manager_id = Some(manager_id.clone());
        Ok(())
    }

    async fn reparent(
        &self,
        id: &UnitId,
        parent_id: Option<&UnitId>,
    ) -> Result<(), RepositoryError> {
        let mut units = self.units.write().await;
        if !units.contains_key(id) {
            return Err(RepositoryError::not_found("unit", id.0.clone()));
        }
        OrgTree::from_units(units.values().cloned())?.reparent(id, parent_id)?;

        if let Some(unit) = units.get_mut(id) {
            unit.parent_id = parent_id.cloned();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<UserId, User>>,
    roles: RwLock<BTreeSet<Role>>,
}

#[async_trait::async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(id).cloned())
    }

    async fn save(&self, user: User) -> Result<(), RepositoryError> {
        self.roles.write().await.extend(user.roles.iter().copied());
        let mut users = self.users.write().await;
        users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn list_by_unit(&self, unit_id: &UnitId) -> Result<Vec<User>, RepositoryError> {
        let users = self.users.read().await;
        let mut members: Vec<User> =
            users.values().filter(|user| user.belongs_to(unit_id)).cloned().collect();
        members.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(members)
    }

    async fn ensure_role(&self, role: Role) -> Result<bool, RepositoryError> {
        Ok(self.roles.write().await.insert(role))
    }
}

#[derive(Default)]
pub struct InMemoryStepPlanRepository {
    plans: RwLock<HashMap<RequestType, StepPlan>>,
}

#[async_trait::async_trait]
impl StepPlanRepository for InMemoryStepPlanRepository {
    async fn load_plan(&self, request_type: RequestType) -> Result<StepPlan, RepositoryError> {
        let plans = self.plans.read().await;
        Ok(plans.get(&request_type).cloned().unwrap_or_else(|| StepPlan::empty(request_type)))
    }

    async fn get_step(
        &self,
        request_type: RequestType,
        step_number: u32,
    ) -> Result<Option<ApprovalStep>, RepositoryError> {
        let plans = self.plans.read().await;
        Ok(plans.get(&request_type).and_then(|plan| plan.get_step(step_number)).cloned())
    }

    async fn replace_plan(&self, plan: &StepPlan) -> Result<(), RepositoryError> {
        let mut plans = self.plans.write().await;
        plans.insert(plan.request_type(), plan.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRequestRepository {
    requests: RwLock<HashMap<RequestId, Request>>,
    transitions: RwLock<Vec<RequestTransition>>,
}

impl InMemoryRequestRepository {
    async fn filtered<F>(&self, keep: F) -> Vec<Request>
    where
        F: Fn(&Request) -> bool,
    {
        let requests = self.requests.read().await;
        let mut matched: Vec<Request> = requests.values().filter(|r| keep(r)).cloned().collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        matched
    }
}

#[async_trait::async_trait]
impl RequestRepository for InMemoryRequestRepository {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError> {
        let requests = self.requests.read().await;
        Ok(requests.get(id).cloned())
    }

    async fn insert(&self, request: &Request) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id) {
            return Err(RepositoryError::Duplicate { kind: "request", id: request.id.0.clone() });
        }
        requests.insert(request.id.clone(), request.clone());
        Ok(())
    }

    async fn update_if_version(
        &self,
        request: &Request,
        expected_version: u32,
        transition: &RequestTransition,
    ) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        let stored = requests
            .get_mut(&request.id)
            .ok_or_else(|| RepositoryError::not_found("request", request.id.0.clone()))?;
        if stored.version != expected_version {
            return Err(RepositoryError::VersionConflict {
                request_id: request.id.clone(),
                expected: expected_version,
            });
        }

        *stored = request.clone();
        self.transitions.write().await.push(transition.clone());
        Ok(())
    }

    async fn list_by_submitter(
        &self,
        submitter_id: &UserId,
    ) -> Result<Vec<Request>, RepositoryError> {
        Ok(self.filtered(|r| &r.submitter_id == submitter_id).await)
    }

    async fn list_for_unit(&self, unit_id: &UnitId) -> Result<Vec<Request>, RepositoryError> {
        Ok(self
            .filtered(|r| {
                r.status != RequestStatus::Draft && r.current_unit_id.as_ref() == Some(unit_id)
            })
            .await)
    }

    async fn list_delegated_to(&self, user_id: &UserId) -> Result<Vec<Request>, RepositoryError> {
        Ok(self
            .filtered(|r| {
                r.status != RequestStatus::Draft && r.delegated_to_id.as_ref() == Some(user_id)
            })
            .await)
    }

    async fn list_for_approver(&self, user_id: &UserId) -> Result<Vec<Request>, RepositoryError> {
        Ok(self
            .filtered(|r| {
                r.status == RequestStatus::Pending
                    && r.delegated_to_id.as_ref().or(r.current_approver_id.as_ref())
                        == Some(user_id)
            })
            .await)
    }

    async fn list_transitions(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RequestTransition>, RepositoryError> {
        let transitions = self.transitions.read().await;
        let mut history: Vec<RequestTransition> =
            transitions.iter().filter(|t| &t.request_id == request_id).cloned().collect();
        history.sort_by_key(|t| t.version);
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use formflow_core::domain::form::FormPayload;
    use formflow_core::domain::request::{Request, RequestStatus, RequestType};
    use formflow_core::domain::transition::RequestTransition;
    use formflow_core::domain::unit::{OrganizationalUnit, UnitId};
    use formflow_core::domain::user::{Role, User, UserId};
    use formflow_core::flows::{RequestEvent, TransitionOutcome};
    use formflow_core::plan::StepPlan;

    use crate::repositories::{
        InMemoryOrgUnitRepository, InMemoryRequestRepository, InMemoryStepPlanRepository,
        InMemoryUserRepository, OrgUnitRepository, RepositoryError, RequestRepository,
        StepPlanRepository, UserRepository,
    };

    #[tokio::test]
    async fn in_memory_units_reject_duplicate_names() {
        let repo = InMemoryOrgUnitRepository::default();
        repo.insert(OrganizationalUnit::root("unit-root", "Root")).await.expect("root");

        let duplicate = repo.insert(OrganizationalUnit::root("unit-other", "Root")).await;
        assert!(matches!(duplicate, Err(RepositoryError::Duplicate { .. })));

        let second_root = repo.insert(OrganizationalUnit::root("unit-island", "Island")).await;
        assert!(matches!(second_root, Err(RepositoryError::Duplicate { kind: "root unit", .. })));

        repo.set_manager(&UnitId("unit-root".into()), &UserId("mgr".into())).await.expect("manager");
        let found = repo.find_by_name("Root").await.expect("find").expect("present");
        assert_eq!(found.manager_id, Some(UserId("mgr".into())));
    }

    #[tokio::test]
    async fn in_memory_users_track_roles_and_membership() {
        let repo = InMemoryUserRepository::default();
        let unit = UnitId("unit-advising".into());
        repo.save(User::new("emp-1", "Grace").with_role(Role::Employee).in_unit(&unit))
            .await
            .expect("save");

        assert!(!repo.ensure_role(Role::Employee).await.expect("role already known"));
        assert!(repo.ensure_role(Role::Admin).await.expect("new role"));
        assert_eq!(repo.list_by_unit(&unit).await.expect("members").len(), 1);
    }

    #[tokio::test]
    async fn in_memory_plan_defaults_to_empty() {
        let repo = InMemoryStepPlanRepository::default();
        let plan = repo.load_plan(RequestType::Ferpa).await.expect("load");

        assert!(plan.is_empty());
        assert_eq!(repo.get_step(RequestType::Ferpa, 1).await.expect("step"), None);

        let replaced =
            StepPlan::from_units(RequestType::Ferpa, [UnitId("unit-records".into())]);
        repo.replace_plan(&replaced).await.expect("replace");
        assert_eq!(repo.load_plan(RequestType::Ferpa).await.expect("reload"), replaced);
    }

    #[tokio::test]
    async fn in_memory_requests_enforce_expected_version() {
        let repo = InMemoryRequestRepository::default();
        let draft = Request::draft(
            UserId("student-1".into()),
            RequestType::InfoChange,
            FormPayload::default(),
            Utc::now(),
        );
        repo.insert(&draft).await.expect("insert");

        let mut next = draft.clone();
        next.status = RequestStatus::Pending;
        next.version = 1;
        let outcome = TransitionOutcome {
            request_id: draft.id.clone(),
            event: RequestEvent::Submit,
            actor_id: draft.submitter_id.clone(),
            from_status: RequestStatus::Draft,
            to_status: RequestStatus::Pending,
            from_unit_id: None,
            to_unit_id: None,
            step_number: 1,
            route: None,
        };
        let transition = RequestTransition::record(&outcome, "corr-1", 1, Utc::now());

        repo.update_if_version(&next, 0, &transition).await.expect("first write");
        let second = repo.update_if_version(&next, 0, &transition).await;

        assert!(matches!(second, Err(RepositoryError::VersionConflict { .. })));
        assert_eq!(repo.list_transitions(&draft.id).await.expect("history").len(), 1);
    }
}
