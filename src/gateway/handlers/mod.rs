//! Read-only HTTP handlers

pub mod health;
pub mod responders;

pub use health::health_check;
pub use responders::list_responders;
