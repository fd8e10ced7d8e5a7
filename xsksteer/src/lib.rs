//! User-space side of the AF_XDP steering program: configuration, loading and
//! attaching, and the write interfaces for the configuration records and the
//! socket routing table.

pub mod config;
pub mod control;
pub mod error;
pub mod layout;
pub mod loader;
pub mod model;
mod sys;

pub use config::{Config, ConfigError, XdpMode};
pub use control::{MapController, SteeringControl, SteeringSettings};
pub use error::{Result, SteerError};
pub use layout::{SocketLayout, SocketSlot};
pub use loader::SteeringProgram;
pub use model::{Outcome, SharedConfig, SocketTable, Steering};
