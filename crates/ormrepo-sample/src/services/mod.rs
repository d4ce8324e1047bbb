//! Domain services wrapping the repositories.

pub mod post_service;
pub mod user_service;

pub use post_service::*;
pub use user_service::*;
