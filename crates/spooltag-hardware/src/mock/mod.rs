//! Mock driver implementation for testing and development.
//!
//! This module provides a simulated reader backend that can be controlled
//! programmatically without requiring physical hardware.

pub mod reader;

pub use reader::{MIFARE_CLASSIC_1K_ATR, MockDriver, MockHandle, MockReader, OpenFailure};
