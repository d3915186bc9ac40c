//! HTTP transport for the widget relay.
//!
//! One long-lived `GET /sse` stream per client session; short-lived
//! `POST /message?sessionId=<id>` requests are routed to that session's
//! handler and answered over the open stream.

pub mod http;
pub mod session_table;
pub mod sse;

pub use http::{AppState, HEALTH_PATH, MESSAGE_PATH, SSE_PATH};
pub use session_table::{SessionEntry, SessionGuard, SessionTable};
