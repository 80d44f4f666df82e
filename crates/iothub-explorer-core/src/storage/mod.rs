//! Local session storage.

pub mod session;

pub use session::{session_location, SessionLocation, SessionStore};
