//! # BMB Chain Library
//!
//! A Rust library for talking to a daisy chain of battery monitor boards
//! (BMBs) over a dual-port isoSPI-style link. The chain is driven from both
//! ends, so telemetry keeps flowing across a broken link, and every
//! transaction is protected by per-command and per-register CRCs plus a
//! rolling command counter.
//!
//! ## Features
//!
//! - Command, write and read transactions across the whole chain
//! - Verified writes with read-back confirmation and bounded retries
//! - Automatic failover between ports with chain re-enumeration on faults
//! - Cell voltage, die and board temperature telemetry with pack aggregation
//! - Passive bleed balancing selection and debounced pack alerts
//! - A full in-process chain simulator for development without hardware
//!
//! ## Example
//!
//! ```
//! use bmb_chain::sim::SimulatedChain;
//! use bmb_chain::{update_telemetry, BmbChain, BmbTelemetry};
//!
//! fn main() -> bmb_chain::Result<()> {
//!     let mut sim = SimulatedChain::new(2);
//!     sim.set_cell_voltages(0, &[3.8; 16]);
//!     sim.set_cell_voltages(1, &[3.9; 16]);
//!
//!     let mut chain = BmbChain::new(sim, 2);
//!     chain.enumerate()?;
//!
//!     let mut bmbs = vec![BmbTelemetry::default(); 2];
//!     update_telemetry(&mut chain, 2, &mut bmbs)?;
//!     println!("max brick voltage: {:.3}V", bmbs[1].max_cell_voltage);
//!     Ok(())
//! }
//! ```

pub mod alerts;
pub mod balancing;
pub mod chain;
pub mod constants;
pub mod crc;
pub mod error;
pub mod frame;
pub mod sim;
pub mod snapshot;
pub mod telemetry;
pub mod timer;
pub mod transport;

pub use alerts::{Alert, AlertResponse, AlertResponseSet, AlertStatus, PackAlerts};
pub use balancing::{bleed_target, select_bleed_bricks, BalancingState, Brick};
pub use chain::{classify_topology, BmbChain, ChainState, ChainTopology};
pub use error::{BmsError, Result, SpiError};
pub use frame::RegisterBlock;
pub use snapshot::{PackSnapshot, SnapshotStore};
pub use telemetry::{
    aggregate_pack, update_telemetry, BmbTelemetry, PackAggregates, SensorStatus,
};
pub use transport::{ChainBus, Port};
