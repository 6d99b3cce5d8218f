//! Test utilities for hdhomerun-client.
//!
//! [`MockTransport`] stands in for the network: it plays scripted discovery
//! replies and routes control connections to [`SimulatedTuner`]s, which
//! answer get/set requests from a variable table and a scripted channel
//! scan.

pub mod mock_transport;
pub mod simulated_tuner;

pub use mock_transport::MockTransport;
pub use simulated_tuner::{locked_channel, unlocked_channel, SimulatedTuner, TunerResponse};
