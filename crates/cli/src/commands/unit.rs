use formflow_core::domain::user::UserId;
use formflow_db::{OrgAdmin, WorkflowError};

use crate::commands::{
    correlation_id, finish, open_database, prepare, workflow_failure, CommandResult, Failure,
};

pub fn assign_manager(unit_name: &str, user_id: &str) -> CommandResult {
    let (config, runtime) = match prepare("unit assign-manager") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let correlation_id = correlation_id("unit-assign-manager");

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let admin = OrgAdmin::from_pool(pool.clone()).with_operator("cli");
        let user_id = UserId(user_id.to_string());

        let assigned = async {
            let unit = admin.unit_by_name(unit_name).await?;
            admin.assign_manager(&unit.id, &user_id, &correlation_id).await?;
            Ok::<_, WorkflowError>(unit)
        }
        .await
        .map_err(|error| workflow_failure(error, &correlation_id));
        pool.close().await;

        let unit = assigned?;
        Ok::<String, Failure>(format!("`{user_id}` now manages `{}`", unit.name))
    });

    finish("unit assign-manager", result)
}
