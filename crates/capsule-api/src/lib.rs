//! Authenticated request pipeline for the Capsule backend
//!
//! Every call to a protected endpoint goes through [`RequestPipeline`]: it
//! attaches the stored session token, refreshes it ahead of expiry, retries
//! exactly once on a rejection, and holds requests that arrive while a
//! refresh is already in flight so they replay in arrival order afterwards.

pub mod pipeline;

pub use pipeline::{ApiRequest, ApiResponse, PipelineConfig, RequestPipeline};
