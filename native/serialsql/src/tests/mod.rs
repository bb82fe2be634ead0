//! Unit and integration tests for serialsql
//!
//! Submodules follow the main library modules. Integration tests open real
//! libsql databases (in memory or in the temp directory); queue and
//! controller edge cases run against a scripted engine.

mod error_handling_tests;
mod queue_tests;
