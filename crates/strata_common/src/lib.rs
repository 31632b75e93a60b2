//! Shared identifiers, error taxonomy and configuration for the Strata
//! flattening subsystem.

pub mod config;
pub mod error;
pub mod types;
