//! Shared test utilities for tdt integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs with temp input/output directories
//! - Fake collaborators standing in for segmentation, PBPK, SIMIND and reconstruction
//! - Builder patterns for creating test configurations programmatically

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
