//! Persistent notify state and the cross-context control bridge.
//!
//! Hosts the three durable documents behind the fan-out service (event
//! message, opted-in users, tracked role names), the shared in-process view
//! of them, and the typed request channel the HTTP surface uses to reach the
//! gateway loop.

pub mod control_bridge;
pub mod notify_state;

pub use control_bridge::{
    control_channel, BridgeError, ControlAction, ControlBridge, ControlOutcome, ControlRequest,
};
pub use notify_state::{
    DirectorySnapshot, NotifyStateStore, SharedNotifyState, DEFAULT_EVENT_MESSAGE,
    DEFAULT_TRACKED_GROUP,
};
