use formflow_core::config::{AppConfig, LoadOptions};
use formflow_core::domain::request::RequestType;
use formflow_core::org::OrgTree;
use formflow_core::plan::StepPlan;
use formflow_db::repositories::{
    OrgUnitRepository, SqlOrgUnitRepository, SqlStepPlanRepository, StepPlanRepository,
};
use formflow_db::{connect_with_settings, DbPool};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn skipped(name: &'static str, because: &str) -> Self {
        Self { name, status: CheckStatus::Skipped, details: format!("skipped because {because}") }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck::skipped(
                "database_connectivity",
                "configuration did not load",
            ));
            checks.push(DoctorCheck::skipped("routing_readiness", "configuration did not load"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck {
                    name: "database_connectivity",
                    status: CheckStatus::Fail,
                    details: format!("failed to initialize async runtime: {error}"),
                },
                DoctorCheck::skipped("routing_readiness", "no async runtime"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck {
                        name: "database_connectivity",
                        status: CheckStatus::Fail,
                        details: format!("failed to connect to database: {error}"),
                    },
                    DoctorCheck::skipped("routing_readiness", "the database is unreachable"),
                ];
            }
        };

        let routing = check_routing(&pool).await;
        pool.close().await;
        vec![
            DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            },
            routing,
        ]
    })
}

/// Every request type must be able to reach a manager at each unit its
/// plan and the climb to the root pass through.
async fn check_routing(pool: &DbPool) -> DoctorCheck {
    let units = SqlOrgUnitRepository::new(pool.clone());
    let plans = SqlStepPlanRepository::new(pool.clone());

    let tree = match units.list().await {
        Ok(units) => match OrgTree::from_units(units) {
            Ok(tree) => tree,
            Err(error) => return routing_failure(format!("unit tree is inconsistent: {error}")),
        },
        Err(error) => return routing_failure(format!("could not read units (run `formflow migrate`?): {error}")),
    };

    let mut problems = Vec::new();
    for request_type in RequestType::ALL {
        match plans.load_plan(request_type).await {
            Ok(plan) => problems.extend(plan_problems(&tree, &plan)),
            Err(error) => problems.push(format!("{request_type}: plan unreadable: {error}")),
        }
    }

    if problems.is_empty() {
        DoctorCheck {
            name: "routing_readiness",
            status: CheckStatus::Pass,
            details: format!("all {} request types can be routed", RequestType::ALL.len()),
        }
    } else {
        routing_failure(problems.join("; "))
    }
}

fn plan_problems(tree: &OrgTree, plan: &StepPlan) -> Vec<String> {
    let request_type = plan.request_type();
    let mut visited: Vec<_> = plan.unit_ids().cloned().collect();
    if plan.is_empty() {
        match plan.entry_unit_id() {
            Some(entry) => visited.push(entry.clone()),
            None => return vec![format!("{request_type}: no steps and no entry unit")],
        }
    }
    if let Some(last) = visited.last() {
        let climb: Vec<_> = tree.ancestors(last).into_iter().map(|unit| unit.id.clone()).collect();
        visited.extend(climb);
    }

    let mut problems = Vec::new();
    for unit_id in visited {
        match tree.get(&unit_id) {
            None => problems.push(format!("{request_type}: unit `{unit_id}` does not exist")),
            Some(unit) if unit.manager_id.is_none() => {
                let message = format!("{request_type}: unit `{}` has no manager", unit.name);
                if !problems.contains(&message) {
                    problems.push(message);
                }
            }
            Some(_) => {}
        }
    }
    problems
}

fn routing_failure(details: String) -> DoctorCheck {
    DoctorCheck { name: "routing_readiness", status: CheckStatus::Fail, details }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
