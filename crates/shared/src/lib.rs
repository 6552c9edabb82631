//! Payload records exchanged with the health monitoring API.

pub mod domain;
pub mod error;
pub mod protocol;
