//! Blueprint sync simulator
//!
//! Runs one host and any number of clients in a single process over the
//! loopback network and drives named scenarios end to end.

pub mod scenarios;
pub mod topology;

pub use scenarios::{Check, ScenarioReport, run_handshake, run_modify_race, run_quota, run_transfer};
pub use topology::{Participant, StarTopology};
