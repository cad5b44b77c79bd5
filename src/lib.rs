//! # PyPilot Autopilot Bridge
//!
//! An autopilot provider that connects a marine data host to the pypilot
//! daemon. Daemon reports are reconciled into a single autopilot snapshot
//! and republished as `steering.autopilot.*` deltas; host commands are
//! validated and translated into the daemon's `key=value` messages.
//!
//! ## Features
//!
//! - **Change detection**: only fields that actually changed are published
//! - **Command translation**: engage, mode, target, tack and dodge
//! - **Dodge scheduling**: timed servo nudges that decay back to neutral
//! - **Connection lifecycle**: explicit state machine with deferred watch
//!   registration
//! - **Async runtime**: single-owner tokio task with a cloneable handle
//!
//! ## Quick Start
//!
//! ```no_run
//! use pypilot_bridge::{AgentRuntime, AutopilotAgent, AutopilotDelta, BridgeConfig, Host, TcpConnector};
//! use tokio::sync::mpsc;
//!
//! struct Printer;
//!
//! impl Host for Printer {
//!     fn publish(&mut self, delta: &AutopilotDelta) {
//!         println!("{delta:?}");
//!     }
//!     fn set_status(&mut self, message: &str) {
//!         println!("{message}");
//!     }
//!     fn set_error(&mut self, message: &str) {
//!         eprintln!("{message}");
//!     }
//!     fn set_active_pilot(&mut self, _href: Option<&str>) {}
//! }
//!
//! # async fn run() {
//! let config = BridgeConfig::default();
//! let (events_tx, events_rx) = mpsc::unbounded_channel();
//! let mut connector = TcpConnector::new(events_tx, config.reconnect_interval());
//!
//! let mut agent = AutopilotAgent::new(Printer);
//! agent.initialise(&mut connector, config.endpoint());
//!
//! let (runtime, handle) = AgentRuntime::new(agent, events_rx);
//! tokio::spawn(runtime.run());
//!
//! handle.engage().await.ok();
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`units`] - Degree/radian conversion
//! - [`protocol`] - Wire codec for daemon messages
//! - [`state`] - Autopilot snapshot and change detection
//! - [`scheduler`] - Dodge sequences
//! - [`connection`] - Channel abstraction and connection state machine
//! - [`agent`] - Provider operations and event handling
//! - [`host`] - Host platform interface
//! - [`config`] - Bridge options
//! - [`runtime`] - Async driver and request handle
//! - [`transport`] - Line-framed TCP channel

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

extern crate alloc;

pub mod agent;
pub mod config;
pub mod connection;
pub mod host;
pub mod protocol;
pub mod runtime;
pub mod scheduler;
pub mod state;
pub mod transport;
pub mod units;

// Re-export main public types for convenience
pub use agent::{AutopilotAgent, AutopilotError, AutopilotReply, AutopilotRequest};
pub use config::BridgeConfig;
pub use connection::{Channel, ChannelEvent, ChannelId, ConnectionState, Connector, Endpoint, TaggedEvent};
pub use host::{Host, DEVICE_ID, REGISTRATION};
pub use protocol::TackDirection;
pub use runtime::{AgentHandle, AgentRuntime};
pub use state::{AutopilotDelta, AutopilotSnapshot, AutopilotState};
pub use transport::TcpConnector;
