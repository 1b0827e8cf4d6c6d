//! Core runtime infrastructure.
//!
//! This module contains the essential components for running Roadworks:
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Process composition and lifecycle
//! - [`time`] - Clock abstraction
//! - [`error`] - Serialization and store error types

pub mod config;
pub mod error;
pub mod runtime;
pub mod time;
