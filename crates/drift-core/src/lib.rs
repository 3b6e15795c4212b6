//! Shared configuration for the DriftGuard control plane.

pub mod config;

pub use config::*;
