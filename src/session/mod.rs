//! Session state: per-local-participant state, the remote member database,
//! and the facade (`RtpSession`) composing the rest of the core.

pub mod database;
pub mod local;
pub mod member;
pub mod session;

pub use database::MemberDatabase;
pub use local::LocalState;
pub use member::MemberEntry;
pub use session::{InboundOutcome, RtpSession};
