//! Session lifecycle: creation with a per-user cap, rolling renewal, lazy
//! expiry, destruction and the auth event log.

pub mod registry;
pub mod types;

pub use registry::{EVENT_TTL, SessionRegistry};
pub use types::{AuthEvent, AuthEventType, Session};
