//! HTTP request handlers.
//!
//! This module contains all HTTP handlers organized by audience.

pub mod admin;
pub mod health;
pub mod orders;
pub mod purchases;

pub use health::{health_check, metrics, readiness_check};
