pub mod audit;
pub mod config;
pub mod delegation;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod forms;
pub mod guard;
pub mod org;
pub mod plan;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::form::{DocumentRef, FormPayload, TagSet};
pub use domain::request::{Request, RequestId, RequestStatus, RequestType};
pub use domain::transition::{RequestTransition, TransitionId};
pub use domain::unit::{OrganizationalUnit, UnitId};
pub use domain::user::{Role, User, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{
    RequestCommand, RequestEvent, RouteMove, RoutingContext, RoutingEngine, RoutingError,
    TransitionOutcome,
};
pub use forms::{FormRegistry, RequestForm};
pub use org::{OrgTree, TreeError};
pub use plan::{ApprovalStep, PlanError, StepPlan};
