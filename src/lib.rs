//! Train Pool Library
//!
//! Storage pools and turntable arbitration for a tick-driven railway simulation.

pub mod simulation;
