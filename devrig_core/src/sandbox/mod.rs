//! Isolated JS execution context, host-function bridge, memory cap,
//! timeouts, and argument marshalling (spec.md §4.D).
//!
//! Substrate choice: plugin manifests declare source-text entry points
//! evaluated under a `devrig` façade, not precompiled WASM modules, so
//! this is a QuickJS embedding via `rquickjs` rather than a WASM runtime.
//! Recorded in DESIGN.md.

mod engine;
mod error;
mod host_bridge;
mod state;

pub use engine::{Sandbox, SandboxConfig};
pub use error::SandboxError;
pub use host_bridge::HostBridge;
pub use state::SandboxState;
