//! HTTP API module.
//!
//! REST, SSE, and WebSocket surfaces for chat plus the credential-
//! substituting reverse proxy in front of the LLM gateway.

mod error;
mod handlers;
mod proxy;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::create_router;
pub use state::{AppState, ProxyState};
