//! Deterministic simulation of several devices sharing one `tasks` table.
//!
//! Each simulated client runs a [`daybook_core::SyncEngine`] against a
//! simulated server over a network that delays, duplicates and reorders
//! messages. Clocks skew, drift and freeze; writes fail at random; clients
//! remount mid-flight. Once the network is drained the
//! [`oracle::ConvergenceOracle`] checks that every collection matches the
//! server. A seed fully determines a run, so any failure can be replayed.
//!
//! # Conventions
//!
//! - **Errors**: Use `anyhow::Result` for return types.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

pub mod campaign;
pub mod client;
pub mod clock;
pub mod network;
pub mod oracle;
pub mod rng;
pub mod server;
pub mod simulator;

pub use campaign::{CampaignConfig, CampaignReport, run_campaign, replay_seed};
pub use simulator::{SimulationConfig, SimulationResult, Simulator};
