//! Configuration Control Plane Library
//!
//! Manages the configuration, certificates, and runtime of a multi-node
//! proxy deployment: two Hysteria2 nodes plus a SOCKS5 listener.
//!
//! ```text
//!                    ┌────────────────────────────────────────────┐
//!                    │             CONTROL PLANE                  │
//!   HTTP request     │  ┌─────┐   ┌────────────┐   ┌──────────┐  │
//!   ─────────────────┼─▶│ api │──▶│ validation │──▶│  store   │  │
//!                    │  └─────┘   └────────────┘   └────┬─────┘  │
//!                    │     │                            │ commit │
//!                    │     │ export/import              ▼ notice │
//!                    │  ┌──┴─────┐   ┌───────┐   ┌────────────┐  │
//!                    │  │ bundle │   │ certs │   │orchestrator│──┼──▶ proxy
//!                    │  └────────┘   └───────┘   └────────────┘  │    processes
//!                    └────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod bundle;
pub mod certs;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod store;

pub use config::schema::{ConfigKey, ConfigPayload};
pub use error::{Error, Result};
pub use orchestrator::NodeOrchestrator;
pub use store::ConfigStore;
