//! Admin authentication
//!
//! Handles:
//! - Password login
//! - Signed session tokens
//! - Authentication middleware

mod middleware;
pub mod session;

pub use middleware::{AdminUser, bearer_token, require_admin};
pub use session::{AdminSession, create_session_token, password_matches, verify_session_token};
