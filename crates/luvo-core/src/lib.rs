//! Luke Roberts lamp control
//!
//! Provides a session over one connected lamp: scene cache, scene
//! stepping by brightness, and the high-level light operations built
//! on top of the wire protocol.

pub mod config;
pub mod error;
pub mod navigator;
pub mod scene;
pub mod session;

pub use config::SessionConfig;
pub use error::{CallerError, LampError};
pub use luvo_protocol::{Characteristic, Direction, Hsb, Rgb};
pub use navigator::NavigationOutcome;
pub use scene::{Scene, SceneCache};
pub use session::{LampSession, LampState, LampStatus, SessionState, Uplight};
