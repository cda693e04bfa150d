pub mod admin;
pub mod bootstrap;
pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod workflow;

pub use admin::{unit_id_for_name, OrgAdmin};
pub use bootstrap::{seed_defaults, SeedReport};
pub use connection::{connect, connect_with_settings, DbPool};
pub use workflow::{DraftInput, RequestWorkflow, WorkflowError};
