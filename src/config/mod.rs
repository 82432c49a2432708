//! Configuration subsystem.
//!
//! # Data Flow
//! ```text
//! proposed payload (API request / imported bundle)
//!     → validation.rs (semantic checks, pure)
//!     → store (versioned commit)
//!     → orchestrator (apply to the managed process)
//! ```
//!
//! # Design Decisions
//! - Document payloads are typed per key; serde handles the syntactic layer
//! - Validation never reads the store; the commit path re-reads the
//!   current version to keep the optimistic-lock window small
//! - The control plane's own runtime settings (loader.rs) are separate
//!   from the managed documents (schema.rs)

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ServerSettings;
pub use schema::{ConfigKey, ConfigPayload, Hysteria2Config, Socks5Config};
