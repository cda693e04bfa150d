use formflow_core::domain::request::RequestType;
use formflow_core::org::OrgTree;
use formflow_core::plan::StepPlan;
use formflow_db::repositories::{OrgUnitRepository, SqlOrgUnitRepository};
use formflow_db::{DbPool, OrgAdmin};

use crate::commands::{
    correlation_id, finish, open_database, prepare, workflow_failure, CommandResult, Failure,
};

pub fn show(request_type: RequestType) -> CommandResult {
    let (config, runtime) = match prepare("plan show") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let correlation_id = correlation_id("plan-show");

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let shown = describe_plan(&pool, request_type, &correlation_id).await;
        pool.close().await;
        shown
    });

    finish("plan show", result)
}

pub fn replace(
    request_type: RequestType,
    unit_names: Vec<String>,
    entry_unit: Option<String>,
) -> CommandResult {
    let (config, runtime) = match prepare("plan replace") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let correlation_id = correlation_id("plan-replace");

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let replaced = replace_plan(&pool, request_type, &unit_names, entry_unit.as_deref(), &correlation_id).await;
        pool.close().await;
        replaced
    });

    finish("plan replace", result)
}

async fn describe_plan(
    pool: &DbPool,
    request_type: RequestType,
    correlation_id: &str,
) -> Result<String, Failure> {
    let admin = OrgAdmin::from_pool(pool.clone());
    let plan = admin
        .show_plan(request_type)
        .await
        .map_err(|error| workflow_failure(error, correlation_id))?;
    let units = SqlOrgUnitRepository::new(pool.clone())
        .list()
        .await
        .map_err(|error| ("persistence", error.to_string(), 9u8))?;
    let tree = OrgTree::from_units(units).map_err(|error| ("bad_request", error.to_string(), 6u8))?;

    Ok(render_plan(&tree, &plan))
}

async fn replace_plan(
    pool: &DbPool,
    request_type: RequestType,
    unit_names: &[String],
    entry_unit: Option<&str>,
    correlation_id: &str,
) -> Result<String, Failure> {
    let admin = OrgAdmin::from_pool(pool.clone()).with_operator("cli");
    let fail = |error| workflow_failure(error, correlation_id);

    let mut unit_ids = Vec::with_capacity(unit_names.len());
    for name in unit_names {
        unit_ids.push(admin.unit_by_name(name).await.map_err(fail)?.id);
    }
    let entry_unit_id = match entry_unit {
        Some(name) => Some(admin.unit_by_name(name).await.map_err(fail)?.id),
        None => None,
    };

    let plan = admin
        .replace_plan(request_type, unit_ids, entry_unit_id, correlation_id)
        .await
        .map_err(fail)?;
    Ok(format!("replaced plan {}", plan_summary(&plan, unit_names, entry_unit)))
}

fn render_plan(tree: &OrgTree, plan: &StepPlan) -> String {
    let names: Vec<String> = plan
        .unit_ids()
        .map(|id| tree.get(id).map(|unit| unit.name.clone()).unwrap_or_else(|| id.0.clone()))
        .collect();
    let entry = plan
        .entry_unit_id()
        .map(|id| tree.get(id).map(|unit| unit.name.clone()).unwrap_or_else(|| id.0.clone()));
    plan_summary(plan, &names, entry.as_deref())
}

fn plan_summary(plan: &StepPlan, unit_names: &[String], entry_unit: Option<&str>) -> String {
    let steps = if unit_names.is_empty() {
        "<no steps>".to_string()
    } else {
        unit_names
            .iter()
            .enumerate()
            .map(|(index, name)| format!("{}. {name}", index + 1))
            .collect::<Vec<_>>()
            .join(" -> ")
    };
    match entry_unit {
        Some(entry) => format!("{}: {steps} (entry unit: {entry})", plan.request_type()),
        None => format!("{}: {steps}", plan.request_type()),
    }
}

#[cfg(test)]
mod tests {
    use formflow_core::domain::request::RequestType;
    use formflow_core::plan::StepPlan;

    use super::plan_summary;

    #[test]
    fn summary_numbers_steps_in_order() {
        let plan = StepPlan::empty(RequestType::StudentDrop);
        let names = vec!["Advising".to_string(), "Academic and Student Services".to_string()];

        assert_eq!(
            plan_summary(&plan, &names, None),
            "drop: 1. Advising -> 2. Academic and Student Services"
        );
    }

    #[test]
    fn zero_step_summary_shows_entry_unit() {
        let plan = StepPlan::empty(RequestType::Ferpa);

        assert_eq!(plan_summary(&plan, &[], Some("Advising")), "ferpa: <no steps> (entry unit: Advising)");
    }
}
