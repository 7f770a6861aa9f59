//! # snc-meister
//!
//! **Latency-SLO admission control for shared networks**
//!
//! A tenant offers a model of its traffic (fitted from a request trace) and a
//! tail-latency objective, e.g. 10 ms at the 99.9th percentile. Using
//! stochastic network calculus (SNC), the controller decides whether the
//! tenant can be admitted without violating its own SLO or the SLO of any
//! already-admitted tenant sharing a congestion point, and assigns admitted
//! tenants a priority class (tightest SLO first) that is pushed to per-host
//! traffic shapers.
//!
//! ## Pieces
//!
//! - **Trace modeling**: request traces ([`trace`]) are converted to generic
//!   work units by an [`estimator`] and fitted into Markov-modulated
//!   Bernoulli arrival processes ([`snc::mmbp`]).
//! - **SNC engine**: arrival and service processes composed through an
//!   operator DAG with Hölder handling for dependent traffic
//!   ([`snc::ops`]), reduced to per-flow latency bounds by one of three
//!   analyses ([`snc::analysis`]).
//! - **Admission**: the flow/queue/client graph ([`graph`]), SLO-ordered
//!   priority assignment ([`priority`]), and the transactional admission
//!   check with affected-client propagation ([`admission`]).
//! - **Edges**: a line-delimited JSON RPC surface ([`rpc`]) and best-effort
//!   enforcer pushes ([`enforcer`]).
//!
//! ## Quick start
//!
//! ```ignore
//! use snc_meister::{Algorithm, Controller, MmbpArrival, NetEnforcer};
//!
//! // Fit an arrival model from a trace, offline.
//! let arrival = MmbpArrival::from_trace_file(
//!     "client.trace",
//!     snc_meister::Estimator::network_in(50.0, 0.0, 50.0, 1.0),
//! )?;
//!
//! // Admit tenants against the shared queues.
//! let mut controller = Controller::new(Algorithm::AggregateTwoHop, NetEnforcer::default());
//! controller.add_queue(&queue_config);
//! let decision = controller.add_clients(&client_configs);
//! assert!(decision.admitted);
//! ```
//!
//! The `snc-meister` binary wraps the controller in a serial TCP server; see
//! [`config::MeisterConfig`] for its knobs.

pub mod admission;
pub mod config;
pub mod enforcer;
pub mod error;
pub mod estimator;
pub mod graph;
pub mod metrics;
pub mod priority;
pub mod rpc;
pub mod search;
pub mod snc;
pub mod trace;

pub use admission::{AdmissionDecision, Controller};
pub use config::MeisterConfig;
pub use enforcer::{Enforcer, NetEnforcer, RecordingEnforcer};
pub use error::{MeisterError, Result};
pub use estimator::Estimator;
pub use graph::{ClientConfig, FlowConfig, Network, QueueConfig};
pub use metrics::MeisterMetrics;
pub use rpc::Status;
pub use snc::mmbp::MmbpArrival;
pub use snc::Algorithm;
