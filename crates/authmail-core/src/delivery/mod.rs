//! Delivery subsystem: one shared SMTP session, the send pipeline that
//! retries over it, and the keep-alive watchdog that refreshes it.

mod connector;
mod pipeline;
mod session;
mod watchdog;

pub use connector::open_session;
pub use pipeline::{MAX_ATTEMPTS, Pipeline};
pub use session::{ProbeError, Session, SessionGuard, SessionSlot, probe};
pub use watchdog::Watchdog;
