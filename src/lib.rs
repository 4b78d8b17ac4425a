//! Family Dashboard CLI Library
//!
//! This module exposes the application, services, and cache for use by the
//! binary and in integration tests.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod sources;
pub mod status;
