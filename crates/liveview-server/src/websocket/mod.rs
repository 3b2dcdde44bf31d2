//! WebSocket session lifecycle and connection limiting.

pub mod limiter;
pub mod session;

pub use limiter::SessionLimiter;
pub use session::{dispatch_frame, drive_session, run_session, SessionEnd, SessionParams};
