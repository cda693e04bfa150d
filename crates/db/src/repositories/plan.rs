use sqlx::sqlite::SqliteRow;

use formflow_core::domain::request::RequestType;
use formflow_core::domain::unit::UnitId;
use formflow_core::plan::{ApprovalStep, StepPlan};

use super::{column, unsigned, RepositoryError, StepPlanRepository};
use crate::DbPool;

pub struct SqlStepPlanRepository {
    pool: DbPool,
}

impl SqlStepPlanRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn step_from_row(request_type: RequestType, row: &SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    Ok(ApprovalStep {
        request_type,
        step_number: unsigned(row, "step_number")?,
        unit_id: UnitId(column(row, "unit_id")?),
    })
}

#[async_trait::async_trait]
impl StepPlanRepository for SqlStepPlanRepository {
    async fn load_plan(&self, request_type: RequestType) -> Result<StepPlan, RepositoryError> {
        let rows = sqlx::query(
            "SELECT step_number, unit_id FROM approval_steps
             WHERE request_type = ?
             ORDER BY step_number ASC",
        )
        .bind(request_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        let steps =
            rows.iter().map(|row| step_from_row(request_type, row)).collect::<Result<Vec<_>, _>>()?;

        let entry_unit: Option<String> =
            sqlx::query_scalar("SELECT unit_id FROM request_type_entry_unit WHERE request_type = ?")
                .bind(request_type.as_str())
                .fetch_optional(&self.pool)
                .await?;

        StepPlan::new(request_type, steps)
            .map(|plan| plan.with_entry_unit(entry_unit.map(UnitId)))
            .map_err(|error| RepositoryError::Decode(error.to_string()))
    }

    async fn get_step(
        &self,
        request_type: RequestType,
        step_number: u32,
    ) -> Result<Option<ApprovalStep>, RepositoryError> {
        let row = sqlx::query(
            "SELECT step_number, unit_id FROM approval_steps
             WHERE request_type = ? AND step_number = ?",
        )
        .bind(request_type.as_str())
        .bind(i64::from(step_number))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(|row| step_from_row(request_type, row)).transpose()
    }

    async fn replace_plan(&self, plan: &StepPlan) -> Result<(), RepositoryError> {
        let request_type = plan.request_type().as_str();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM approval_steps WHERE request_type = ?")
            .bind(request_type)
            .execute(&mut *tx)
            .await?;

        for step in plan.steps() {
            sqlx::query(
                "INSERT INTO approval_steps (request_type, step_number, unit_id) VALUES (?, ?, ?)",
            )
            .bind(request_type)
            .bind(i64::from(step.step_number))
            .bind(&step.unit_id.0)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM request_type_entry_unit WHERE request_type = ?")
            .bind(request_type)
            .execute(&mut *tx)
            .await?;
        if let Some(entry_unit) = plan.entry_unit_id() {
            sqlx::query("INSERT INTO request_type_entry_unit (request_type, unit_id) VALUES (?, ?)")
                .bind(request_type)
                .bind(&entry_unit.0)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use formflow_core::domain::request::RequestType;
    use formflow_core::domain::unit::{OrganizationalUnit, UnitId};
    use formflow_core::plan::StepPlan;

    use super::SqlStepPlanRepository;
    use crate::repositories::{OrgUnitRepository, SqlOrgUnitRepository, StepPlanRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let units = SqlOrgUnitRepository::new(pool.clone());
        let root = OrganizationalUnit::root("unit-root", "Academic and Student Services");
        units.insert(root.clone()).await.expect("root");
        units
            .insert(OrganizationalUnit::child("unit-advising", "Advising", &root.id))
            .await
            .expect("advising");
        pool
    }

    #[tokio::test]
    async fn unconfigured_type_loads_as_empty_plan() {
        let repo = SqlStepPlanRepository::new(setup().await);

        let plan = repo.load_plan(RequestType::Ferpa).await.expect("load");
        assert!(plan.is_empty());
        assert_eq!(plan.entry_unit_id(), None);
        assert_eq!(repo.get_step(RequestType::Ferpa, 1).await.expect("step"), None);
    }

    #[tokio::test]
    async fn replace_plan_swaps_steps_and_entry_unit() {
        let repo = SqlStepPlanRepository::new(setup().await);
        let first = StepPlan::from_units(
            RequestType::StudentDrop,
            [UnitId("unit-advising".into()), UnitId("unit-root".into())],
        );
        repo.replace_plan(&first).await.expect("first plan");
        assert_eq!(repo.load_plan(RequestType::StudentDrop).await.expect("load"), first);

        let second = StepPlan::empty(RequestType::StudentDrop)
            .with_entry_unit(Some(UnitId("unit-advising".into())));
        repo.replace_plan(&second).await.expect("second plan");

        let stored = repo.load_plan(RequestType::StudentDrop).await.expect("load");
        assert_eq!(stored, second);
        assert_eq!(repo.get_step(RequestType::StudentDrop, 2).await.expect("step"), None);
    }

    #[tokio::test]
    async fn failed_replace_leaves_previous_plan() {
        let repo = SqlStepPlanRepository::new(setup().await);
        let original = StepPlan::from_units(RequestType::Ferpa, [UnitId("unit-advising".into())]);
        repo.replace_plan(&original).await.expect("original");

        let broken = StepPlan::from_units(
            RequestType::Ferpa,
            [UnitId("unit-root".into()), UnitId("unit-missing".into())],
        );
        assert!(repo.replace_plan(&broken).await.is_err());

        assert_eq!(repo.load_plan(RequestType::Ferpa).await.expect("load"), original);
    }
}
