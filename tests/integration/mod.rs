//! Integration test suite for maestro.
//!
//! These tests exercise the full orchestration path from task submission
//! to workflow completion, including consensus rounds and the learning
//! loop. They verify that all components work together correctly.
//!
//! # Test Categories
//!
//! - `routing`: Classification and routing end to end
//! - `workflow_e2e`: Full workflow execution tests
//! - `consensus`: Quorum resolution and suggestion merging
//! - `learning`: Rule mining, review, and persistence
//!
//! # CI Compatibility
//!
//! All workers are scripted in-process doubles; no external services are
//! contacted, making the suite safe to run in CI environments.

mod fixtures;

mod consensus;
mod learning;
mod routing;
mod workflow_e2e;
