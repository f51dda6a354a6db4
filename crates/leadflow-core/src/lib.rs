//! # leadflow-core
//!
//! Core types, the stage catalog, configuration, and error handling for the
//! leadflow engine.

pub mod config;
pub mod error;
pub mod message;
pub mod model;
pub mod stage;
pub mod template;
pub mod timefmt;
pub mod traits;
