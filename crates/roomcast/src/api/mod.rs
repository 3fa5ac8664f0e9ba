//! HTTP surface: health, statistics and the WebSocket endpoint.

mod error;
mod handlers;
mod routes;
mod state;
mod ws;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::HealthResponse;
pub use routes::create_router;
pub use state::AppState;
