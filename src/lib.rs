//! SafeWatch Node Library
//!
//! Tap-gesture and fall detection with liveness-aware alert dispatch.
//!
//! ## Modules
//!
//! - `types` - Core data structures (samples, detected events, app state)
//! - `signal` - Gravity estimation and sliding windows
//! - `detection` - Tap sequence detector, fall state machine, risk scoring
//! - `storage` - Durable key-value store and dispatch history
//! - `liveness` - Cross-context liveness flags and cached credential
//! - `dispatch` - Alert routing and direct backend delivery
//! - `api` - Local bridge between foreground and background contexts
//! - `host` - Execution contexts, sensor sources, pipeline supervision

pub mod types;
pub mod signal;
pub mod detection;
pub mod storage;
pub mod liveness;
pub mod dispatch;
pub mod api;
pub mod host;

pub use types::*;
pub use detection::{Engine, EngineConfig, EngineOutput};
pub use dispatch::{AlertDispatcher, DispatchOutcome};
pub use host::{HostConfig, HostContext};
