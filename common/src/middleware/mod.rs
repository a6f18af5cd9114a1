//! Middleware shared by the dashboard routes.

pub mod auth;
pub mod panic;
pub mod request_id;

pub use auth::{require_session, LOGIN_PATH};
pub use panic::panic_response;
pub use request_id::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
