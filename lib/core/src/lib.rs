//! Core domain types for the buildpulse platform.
//!
//! This crate provides the foundational identifier types shared
//! throughout the buildpulse build-trigger engine.

pub mod id;

pub use id::{ParseIdError, TriggerId};
