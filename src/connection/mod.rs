//! Connection lifecycle and command dispatch
//!
//! This module handles:
//! - The background worker task that owns the hub session
//! - The link state machine (idle, connecting, connected, disconnecting)
//! - Serializing commands into a single execution stream
//! - Reporting status and sensor readings back to the foreground

mod manager;

pub use manager::{HubController, HubWorker, LinkState, WorkerConfig, WorkerEvent};
