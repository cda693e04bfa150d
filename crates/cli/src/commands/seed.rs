use formflow_db::{seed_defaults, SeedReport};

use crate::commands::{
    correlation_id, finish, open_database, prepare, workflow_failure, CommandResult, Failure,
};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let correlation_id = correlation_id("seed");

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let seeded = seed_defaults(&pool, &config.routing, &correlation_id).await;
        pool.close().await;
        let report = seeded.map_err(|error| workflow_failure(error, &correlation_id))?;
        Ok::<String, Failure>(summarize(&report))
    });

    finish("seed", result)
}

fn summarize(report: &SeedReport) -> String {
    if report.is_noop() {
        return "default data already present; nothing seeded".to_string();
    }
    format!(
        "seeded {} roles, {} units, {} plans, {} entry units",
        report.roles_created, report.units_created, report.plans_created, report.entry_units_set
    )
}
