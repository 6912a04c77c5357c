//! Domain layer - Port definitions
//!
//! This module defines the traits (ports) that storage drivers and persisted
//! stores implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;
