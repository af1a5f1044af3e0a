//! Discord bridge runtime for the Herald fan-out service.
//!
//! Owns the gateway session loop, the REST client, recipient resolution, and
//! fan-out delivery. All provider traffic happens inside this crate; other
//! surfaces reach it through the control bridge.

pub mod discord_runtime;

pub use discord_runtime::{run_discord_bridge, DiscordBridgeRuntimeConfig};
