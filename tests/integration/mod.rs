//! Integration test suite for agency.
//!
//! These tests drive projects from requirements to sign-off through the
//! public API, with scripted teams standing in for real ones. They verify
//! that scheduling, validation and communication work together.
//!
//! # Test Categories
//!
//! - `scheduling`: Levels, cycles, failure propagation and team limits
//! - `validation_flow`: Scoring, reviews and the retry bound
//! - `orchestrator_e2e`: Full runs, cancellation and persistence
//! - `communication`: Help requests, handoffs and escalations
//!
//! # CI Compatibility
//!
//! No team command is spawned; every team is an in-process script, which
//! makes these tests safe to run in CI environments.

mod fixtures;

mod scheduling;
mod validation_flow;
mod orchestrator_e2e;
mod communication;
