//! Shared types and error taxonomy for Capsule

mod errors;
mod ids;

pub use errors::{AppError, AppResult, RefreshError};
pub use ids::UserId;
