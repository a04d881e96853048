//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, background tasks)
//!     → request.rs (request ID assigned or kept)
//!     → info.rs for `GET /` and `GET /health`
//!     → otherwise the gateway pipeline
//!     → Send to client
//! ```

pub mod info;
pub mod request;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
