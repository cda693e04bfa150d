pub mod engine;
pub mod states;

pub use engine::{RoutingContext, RoutingEngine, RoutingError};
pub use states::{RequestCommand, RequestEvent, RouteMove, TransitionOutcome};
