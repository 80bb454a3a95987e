//! Luke Roberts lamp BLE protocol implementation
//!
//! This crate implements the binary command protocol spoken over the
//! lamp's API endpoint GATT characteristic, plus the color conversions
//! the Immediate Light command needs.

pub mod color;
pub mod commands;
pub mod frame;
pub mod transport;
pub mod types;

pub use color::{Hsb, Rgb};
pub use commands::{Command, CommandKind, Direction};
pub use frame::Response;
pub use transport::{Characteristic, Exchange, Link};
pub use types::*;
