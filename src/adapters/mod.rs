//! Implementations of the ports.

pub mod clock;
pub mod firebase;
pub mod memory;
