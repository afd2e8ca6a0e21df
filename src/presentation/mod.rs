//! Both ends of a proximity session.
//!
//! [device] and [reader] cover engagement up to the point a transport is needed.
//! [session::Session] takes over from there.
pub mod authentication;
pub mod cipher;
pub mod device;
pub mod reader;
pub mod session;

pub use session::{Received, Session, SessionState};
