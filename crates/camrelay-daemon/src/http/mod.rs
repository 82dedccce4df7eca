//! HTTP front end.

mod response;
mod routes;

pub use response::ApiResponse;
pub use routes::{AppState, build_router};
