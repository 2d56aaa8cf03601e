//! Portal-side pieces: the route guard that gates each portal region, and
//! an explicitly owned connection to the study-group gateway.

pub mod guard;
pub mod session;

pub use guard::{GuardDecision, GuardWatcher, RouteGuard, SessionState, SessionUser};
pub use session::{GroupSession, SessionError};
