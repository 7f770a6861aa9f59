//! Stochastic network calculus engine.
//!
//! SNC characterizes arrival and service processes by a pair of functions
//! `(sigma, rho)` of a Legendre parameter theta, and composes them with a
//! small algebra of operators. The engine here uses the common discrete-time
//! form, with time split into steps of [`STEP_SIZE`] seconds.
//!
//! The pieces, bottom up:
//! - [`mgf`]: moment generating functions modeling per-timestep work,
//! - [`mmbp`]: the Markov-modulated Bernoulli arrival model fitted from a
//!   trace,
//! - [`ops`]: the per-analysis operator DAG, Hölder dependency parameters,
//!   and the latency bound with its theta and Hölder optimizations,
//! - [`analysis`]: the algorithms that assemble a DAG from the flow/queue
//!   graph and produce a flow latency.

pub mod analysis;
pub mod mgf;
pub mod mmbp;
pub mod ops;

use serde::{Deserialize, Serialize};

/// Discretization step in seconds. Chosen small to approximate a
/// continuous-time system.
pub const STEP_SIZE: f64 = 1e-5;

/// Width of the windows a trace is split into during MMBP fitting, in
/// nanoseconds.
pub const INTERVAL_WIDTH_NS: u64 = 1_000_000_000;

/// Width of the MMBP fitting window in seconds.
pub const INTERVAL_WIDTH_SECS: f64 = 1.0;

/// Maximum number of MMBP states.
pub const MAX_NUM_STATES: usize = 10;

/// Latency-analysis algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    /// Aggregate analysis specialized to paths of at most two hops, built to
    /// avoid introducing unnecessary dependencies.
    #[default]
    AggregateTwoHop,
    /// Analyze each queue along a flow's path one hop at a time.
    HopByHop,
    /// Convolute the leftover service of every queue on the path and bound
    /// latency once against the combined service.
    Convolution,
}
