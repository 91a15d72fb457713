//! Gateway types module
//!
//! ## Output Types
//! - [`ApiResponse<T>`]: Unified API response wrapper
//!
//! ## Submodules
//! - [`response`]: Response types

pub mod response;

pub use response::{ApiResponse, HealthResponse, RespondersData};
