use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use thiserror::Error;

use formflow_core::domain::request::{Request, RequestId, RequestType};
use formflow_core::domain::transition::RequestTransition;
use formflow_core::domain::unit::{OrganizationalUnit, UnitId};
use formflow_core::domain::user::{Role, User, UserId};
use formflow_core::org::TreeError;
use formflow_core::plan::{ApprovalStep, StepPlan};

pub mod memory;
pub mod plan;
pub mod request;
pub mod unit;
pub mod user;

pub use memory::{
    InMemoryOrgUnitRepository, InMemoryRequestRepository, InMemoryStepPlanRepository,
    InMemoryUserRepository,
};
pub use plan::SqlStepPlanRepository;
pub use request::SqlRequestRepository;
pub use unit::SqlOrgUnitRepository;
pub use user::SqlUserRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("request `{request_id}` is no longer at version {expected}")]
    VersionConflict { request_id: RequestId, expected: u32 },
    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },
    #[error("{kind} `{id}` already exists")]
    Duplicate { kind: &'static str, id: String },
    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl RepositoryError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}

#[async_trait]
pub trait OrgUnitRepository: Send + Sync {
    async fn find_by_id(&self, id: &UnitId) -> Result<Option<OrganizationalUnit>, RepositoryError>;

    async fn find_by_name(&self, name: &str)
        -> Result<Option<OrganizationalUnit>, RepositoryError>;

    async fn list(&self) -> Result<Vec<OrganizationalUnit>, RepositoryError>;

    /// Units are append-only; inserting an existing id is an error.
    async fn insert(&self, unit: OrganizationalUnit) -> Result<(), RepositoryError>;

    async fn set_manager(&self, id: &UnitId, manager_id: &UserId) -> Result<(), RepositoryError>;

    /// Moves `id` under `parent_id`. The hierarchy is re-read and checked
    /// with the write already held, so two opposite moves cannot both land.
    async fn reparent(&self, id: &UnitId, parent_id: Option<&UnitId>)
        -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<User>, RepositoryError>;

    /// Upserts the user together with its full role set.
    async fn save(&self, user: User) -> Result<(), RepositoryError>;

    async fn list_by_unit(&self, unit_id: &UnitId) -> Result<Vec<User>, RepositoryError>;

    /// Returns `true` when the role row was created by this call.
    async fn ensure_role(&self, role: Role) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait StepPlanRepository: Send + Sync {
    /// Never fails for a configured-but-empty type; returns an empty plan.
    async fn load_plan(&self, request_type: RequestType) -> Result<StepPlan, RepositoryError>;

    async fn get_step(
        &self,
        request_type: RequestType,
        step_number: u32,
    ) -> Result<Option<ApprovalStep>, RepositoryError>;

    /// Replaces steps and entry unit of one type atomically.
    async fn replace_plan(&self, plan: &StepPlan) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<Request>, RepositoryError>;

    async fn insert(&self, request: &Request) -> Result<(), RepositoryError>;

    /// Writes `request` only if the stored version still equals
    /// `expected_version`, appending `transition` in the same unit of work.
    async fn update_if_version(
        &self,
        request: &Request,
        expected_version: u32,
        transition: &RequestTransition,
    ) -> Result<(), RepositoryError>;

    async fn list_by_submitter(&self, submitter_id: &UserId)
        -> Result<Vec<Request>, RepositoryError>;

    /// Non-draft requests currently owned by `unit_id`.
    async fn list_for_unit(&self, unit_id: &UnitId) -> Result<Vec<Request>, RepositoryError>;

    /// Non-draft requests delegated to `user_id`.
    async fn list_delegated_to(&self, user_id: &UserId) -> Result<Vec<Request>, RepositoryError>;

    /// Pending requests on which `user_id` is the effective approver.
    async fn list_for_approver(&self, user_id: &UserId) -> Result<Vec<Request>, RepositoryError>;

    async fn list_transitions(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<RequestTransition>, RepositoryError>;
}

pub(crate) fn column<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name).map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn timestamp(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, RepositoryError> {
    let raw: String = column(row, name)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("{name}: {e}")))
}

pub(crate) fn unsigned(row: &SqliteRow, name: &str) -> Result<u32, RepositoryError> {
    let raw: i64 = column(row, name)?;
    u32::try_from(raw).map_err(|_| RepositoryError::Decode(format!("{name}: {raw} out of range")))
}
