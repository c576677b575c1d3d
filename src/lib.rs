//! # procd
//!
//! Local process supervision core: launches, monitors, and tears down
//! long-lived dev-server and shell sessions for a single host, exposed over
//! a JSON-RPC stdio protocol.
//!
//! ```text
//! launcher.rs       — spawn a child as leader of a fresh process group
//! exit_monitor.rs   — at-most-once exit notification, no polling
//! process_tree.rs   — read-only host process enumeration
//! registry.rs       — unified index of every child this core spawned
//! port_allocator.rs — exclusive, probe-verified session<->port mapping
//! log_store.rs       — per-session ring buffer + append-only disk log
//! stream_pump.rs     — cancellable line-by-line stdout/stderr drain
//! coordinator/       — composes the above into the session lifecycle
//! rpc.rs             — line-framed JSON-RPC server over stdio
//! config.rs          — configuration loading and defaults
//! error.rs           — shared error taxonomy
//! value.rs           — type-erased, deterministic JSON value
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod exit_monitor;
pub mod launcher;
pub mod log_store;
pub mod port_allocator;
pub mod process_tree;
pub mod registry;
pub mod rpc;
pub mod stream_pump;
pub mod value;
