//! spikegrad CLI crate
//!
//! Commands (see [commands]):
//! - init: write the default experiment file.
//! - run: roll the untrained network out on synthetic data and report
//!   hidden activity and accuracy.
//! - train: train with surrogate-gradient BPTT and Adam, reporting accuracy
//!   before and after and the loss history.
//!
//! The binary (src/main.rs) only wires up logging and argument parsing; the
//! library surface exists so commands can be driven from tests.

pub mod commands;
pub mod config;
pub mod error;

pub use commands::SpikegradCli;
