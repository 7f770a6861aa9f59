//! Work estimators.
//!
//! The SNC analysis operates on a generic notion of "work" rather than raw
//! request sizes, so that queues of different kinds (network links, storage
//! devices) can share one representation. An estimator maps a request's size
//! and type onto work units via an affine function `constant + factor * size`,
//! with separate coefficients for data-heavy and non-data-heavy requests.
//!
//! For network traffic the work units stay in bytes, but which request type
//! is data-heavy depends on direction: traffic into a server is dominated by
//! put payloads, traffic back out by get responses.

use serde::{Deserialize, Serialize};

/// Direction discriminator for estimators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorKind {
    /// Traffic from client to server; puts are data-heavy.
    NetworkIn,
    /// Traffic from server to client; gets are data-heavy.
    NetworkOut,
}

/// Affine coefficients for one direction of request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimatorParams {
    /// Constant overhead for non-data-heavy requests.
    pub non_data_constant: f64,
    /// Per-byte factor for non-data-heavy requests; expected slightly above 0.
    pub non_data_factor: f64,
    /// Constant overhead for data-heavy requests.
    pub data_constant: f64,
    /// Per-byte factor for data-heavy requests; expected slightly above 1.
    pub data_factor: f64,
}

impl EstimatorParams {
    fn non_data(&self, size: u32) -> f64 {
        self.non_data_constant + self.non_data_factor * f64::from(size)
    }

    fn data(&self, size: u32) -> f64 {
        self.data_constant + self.data_factor * f64::from(size)
    }
}

/// Maps `(request size, request type)` onto scalar work.
///
/// The serialized form is self-describing (`"type": "networkIn"` or
/// `"networkOut"`) so estimator configurations can travel inside flow
/// configs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Estimator {
    /// Estimator for traffic from client to server.
    #[serde(rename = "networkIn")]
    NetworkIn(EstimatorParams),
    /// Estimator for traffic from server back to client.
    #[serde(rename = "networkOut")]
    NetworkOut(EstimatorParams),
}

impl Estimator {
    /// Convenience constructor for a network-in estimator.
    pub fn network_in(
        non_data_constant: f64,
        non_data_factor: f64,
        data_constant: f64,
        data_factor: f64,
    ) -> Self {
        Self::NetworkIn(EstimatorParams {
            non_data_constant,
            non_data_factor,
            data_constant,
            data_factor,
        })
    }

    /// Convenience constructor for a network-out estimator.
    pub fn network_out(
        non_data_constant: f64,
        non_data_factor: f64,
        data_constant: f64,
        data_factor: f64,
    ) -> Self {
        Self::NetworkOut(EstimatorParams {
            non_data_constant,
            non_data_factor,
            data_constant,
            data_factor,
        })
    }

    /// Converts a request into work units.
    pub fn estimate_work(&self, size: u32, is_get: bool) -> f64 {
        match self {
            Self::NetworkIn(params) => {
                if is_get {
                    params.non_data(size)
                } else {
                    params.data(size)
                }
            }
            Self::NetworkOut(params) => {
                if is_get {
                    params.data(size)
                } else {
                    params.non_data(size)
                }
            }
        }
    }

    /// Clears any estimator state. Network estimators are stateless.
    pub fn reset(&mut self) {}

    /// Returns the direction discriminator.
    pub fn kind(&self) -> EstimatorKind {
        match self {
            Self::NetworkIn(_) => EstimatorKind::NetworkIn,
            Self::NetworkOut(_) => EstimatorKind::NetworkOut,
        }
    }
}
