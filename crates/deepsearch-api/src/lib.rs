//! HTTP runner exposing DeepSearch pipelines in the hosted-runner wire format.

pub mod error;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
