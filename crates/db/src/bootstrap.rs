//! Idempotent seeding of roles, the default unit tree and default plans.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use formflow_core::config::RoutingConfig;
use formflow_core::domain::unit::{OrganizationalUnit, UnitId};
use formflow_core::domain::user::Role;
use formflow_core::forms::{FormRegistry, ADVISING_UNIT, HEALTH_UNIT, RECORDS_UNIT, ROOT_UNIT};
use formflow_core::plan::StepPlan;

use crate::admin::unit_id_for_name;
use crate::repositories::{
    OrgUnitRepository, SqlOrgUnitRepository, SqlStepPlanRepository, SqlUserRepository,
    StepPlanRepository, UserRepository,
};
use crate::workflow::WorkflowError;
use crate::DbPool;

const CHILD_UNITS: [&str; 3] = [RECORDS_UNIT, ADVISING_UNIT, HEALTH_UNIT];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub roles_created: usize,
    pub units_created: usize,
    pub plans_created: usize,
    pub entry_units_set: usize,
}

impl SeedReport {
    pub fn is_noop(&self) -> bool {
        self == &Self::default()
    }
}

pub struct Seeder {
    units: Arc<dyn OrgUnitRepository>,
    users: Arc<dyn UserRepository>,
    plans: Arc<dyn StepPlanRepository>,
    forms: FormRegistry,
}

impl Seeder {
    pub fn new(
        units: Arc<dyn OrgUnitRepository>,
        users: Arc<dyn UserRepository>,
        plans: Arc<dyn StepPlanRepository>,
    ) -> Self {
        Self { units, users, plans, forms: FormRegistry::standard() }
    }

    pub async fn run(
        &self,
        routing: &RoutingConfig,
        correlation_id: &str,
    ) -> Result<SeedReport, WorkflowError> {
        let mut report = SeedReport::default();

        for role in Role::ALL {
            if self.users.ensure_role(role).await? {
                report.roles_created += 1;
            }
        }

        let (root, created) = self.ensure_unit(ROOT_UNIT, None).await?;
        report.units_created += usize::from(created);
        for name in CHILD_UNITS {
            let (_, created) = self.ensure_unit(name, Some(&root)).await?;
            report.units_created += usize::from(created);
        }

        for form in self.forms.forms() {
            let existing = self.plans.load_plan(form.request_type()).await?;
            if !existing.is_empty() || existing.entry_unit_id().is_some() {
                continue;
            }

            let mut unit_ids = Vec::new();
            for name in form.default_plan_units() {
                unit_ids.push(self.unit_id_by_name(name).await?);
            }
            let plan = StepPlan::from_units(form.request_type(), unit_ids);
            self.plans.replace_plan(&plan).await?;
            report.plans_created += 1;
        }

        for (request_type, unit_name) in &routing.entry_units {
            let entry = self.unit_id_by_name(unit_name).await?;
            let plan = self.plans.load_plan(*request_type).await?;
            if plan.entry_unit_id() == Some(&entry) {
                continue;
            }
            self.plans.replace_plan(&plan.with_entry_unit(Some(entry))).await?;
            report.entry_units_set += 1;
        }

        info!(
            event_name = "system.bootstrap.seeded",
            correlation_id = %correlation_id,
            roles_created = report.roles_created,
            units_created = report.units_created,
            plans_created = report.plans_created,
            entry_units_set = report.entry_units_set,
            "default data seeded"
        );
        Ok(report)
    }

    async fn ensure_unit(
        &self,
        name: &str,
        parent: Option<&UnitId>,
    ) -> Result<(UnitId, bool), WorkflowError> {
        if let Some(existing) = self.units.find_by_name(name).await? {
            return Ok((existing.id, false));
        }

        let id = unit_id_for_name(name);
        let unit = match parent {
            Some(parent) => OrganizationalUnit::child(id.0.clone(), name, parent),
            None => OrganizationalUnit::root(id.0.clone(), name),
        };
        self.units.insert(unit).await?;
        Ok((id, true))
    }

    async fn unit_id_by_name(&self, name: &str) -> Result<UnitId, WorkflowError> {
        self.units
            .find_by_name(name)
            .await?
            .map(|unit| unit.id)
            .ok_or_else(|| WorkflowError::UnitNotFound(name.to_owned()))
    }
}

pub async fn seed_defaults(
    pool: &DbPool,
    routing: &RoutingConfig,
    correlation_id: &str,
) -> Result<SeedReport, WorkflowError> {
    Seeder::new(
        Arc::new(SqlOrgUnitRepository::new(pool.clone())),
        Arc::new(SqlUserRepository::new(pool.clone())),
        Arc::new(SqlStepPlanRepository::new(pool.clone())),
    )
    .run(routing, correlation_id)
    .await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use formflow_core::config::RoutingConfig;
    use formflow_core::domain::request::RequestType;
    use formflow_core::domain::unit::UnitId;
    use formflow_core::forms::{ADVISING_UNIT, ROOT_UNIT};

    use super::seed_defaults;
    use crate::admin::unit_id_for_name;
    use crate::repositories::{
        OrgUnitRepository, SqlOrgUnitRepository, SqlStepPlanRepository, StepPlanRepository,
    };
    use crate::workflow::WorkflowError;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn routing() -> RoutingConfig {
        RoutingConfig { conflict_retries: 1, entry_units: BTreeMap::new() }
    }

    #[tokio::test]
    async fn seeding_creates_default_tree_and_plans() {
        let pool = pool().await;

        let report = seed_defaults(&pool, &routing(), "seed-1").await.expect("seed");
        assert_eq!(report.roles_created, 4);
        assert_eq!(report.units_created, 4);
        assert_eq!(report.plans_created, 4);

        let units = SqlOrgUnitRepository::new(pool.clone());
        let advising = units.find_by_name(ADVISING_UNIT).await.expect("find").expect("advising");
        assert_eq!(advising.parent_id, Some(unit_id_for_name(ROOT_UNIT)));

        let plans = SqlStepPlanRepository::new(pool);
        let drop_plan = plans.load_plan(RequestType::StudentDrop).await.expect("plan");
        let units: Vec<&UnitId> = drop_plan.unit_ids().collect();
        assert_eq!(units, vec![&unit_id_for_name(ADVISING_UNIT), &unit_id_for_name(ROOT_UNIT)]);
    }

    #[tokio::test]
    async fn seeding_twice_creates_nothing_new() {
        let pool = pool().await;
        seed_defaults(&pool, &routing(), "seed-1").await.expect("first");

        let second = seed_defaults(&pool, &routing(), "seed-2").await.expect("second");
        assert!(second.is_noop(), "unexpected second seed report: {second:?}");
    }

    #[tokio::test]
    async fn configured_entry_unit_is_stored_with_the_plan() {
        let pool = pool().await;
        let mut config = routing();
        config.entry_units.insert(RequestType::Ferpa, ROOT_UNIT.to_owned());

        let report = seed_defaults(&pool, &config, "seed-1").await.expect("seed");
        assert_eq!(report.entry_units_set, 1);

        let plan = SqlStepPlanRepository::new(pool.clone())
            .load_plan(RequestType::Ferpa)
            .await
            .expect("plan");
        assert_eq!(plan.entry_unit_id(), Some(&unit_id_for_name(ROOT_UNIT)));
        assert_eq!(plan.len(), 2);
    }

    #[tokio::test]
    async fn unknown_entry_unit_fails_loudly() {
        let pool = pool().await;
        let mut config = routing();
        config.entry_units.insert(RequestType::Ferpa, "Registrar".to_owned());

        let result = seed_defaults(&pool, &config, "seed-1").await;
        assert!(matches!(result, Err(WorkflowError::UnitNotFound(name)) if name == "Registrar"));
    }
}
