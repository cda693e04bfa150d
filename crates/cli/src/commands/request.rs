use formflow_core::domain::request::RequestId;
use formflow_db::{RequestWorkflow, WorkflowError};
use serde_json::json;

use crate::commands::{
    correlation_id, finish, open_database, prepare, workflow_failure, CommandResult, Failure,
};

/// Prints the request record and its transition history as JSON.
pub fn show(request_id: &str) -> CommandResult {
    let (config, runtime) = match prepare("request show") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };
    let correlation_id = correlation_id("request-show");
    let request_id = RequestId(request_id.to_string());

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;
        let workflow = RequestWorkflow::from_config(pool.clone(), &config.routing);

        let loaded = async {
            let request = workflow.find(&request_id).await?;
            let history = workflow.history(&request_id).await?;
            Ok::<_, WorkflowError>((request, history))
        }
        .await
        .map_err(|error| workflow_failure(error, &correlation_id));
        pool.close().await;

        let (request, history) = loaded?;
        let document = json!({ "request": request, "history": history });
        serde_json::to_string(&document)
            .map_err(|error| ("serialization", error.to_string(), 11u8))
    });

    finish("request show", result)
}
