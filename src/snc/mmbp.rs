//! Markov-modulated Bernoulli arrival processes.
//!
//! An [`MmbpArrival`] models the burstiness of a flow: a hidden Markov chain
//! moves between a handful of states, and each state generates work at its
//! own rate with its own request-size distribution. The model is fitted from
//! a processed trace in four steps:
//!
//! 1. split the trace into fixed-width windows and count arrivals per window,
//! 2. assign each window to a state with the LAMBDA algorithm,
//! 3. learn the state transition matrix from consecutive window states,
//! 4. fit one MGF per state from the windows assigned to it.
//!
//! The fitted model exposes its `(sigma, rho)` bound through a spectral
//! radius computation over the MGF-scaled transition matrix.

use std::path::Path;

use nalgebra::{DMatrix, Normed};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MeisterError, Result};
use crate::estimator::Estimator;
use crate::search::binary_search_reverse;
use crate::snc::mgf::Mgf;
use crate::snc::{INTERVAL_WIDTH_NS, INTERVAL_WIDTH_SECS, MAX_NUM_STATES, STEP_SIZE};
use crate::trace::{ProcessedTrace, TraceReader, WorkTrace};

/// An n-state MMBP arrival process (1 <= n <= 10).
///
/// Serializes to a self-describing form so trained models can be shipped
/// inside flow configs (`arrivalInfo`) and reconstructed on the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MmbpArrival {
    /// Row-stochastic per-timestep transition probabilities.
    #[serde(rename = "transitionMatrix")]
    transition_matrix: Vec<Vec<f64>>,
    /// Per-state work MGFs, carrying each state's arrival probability.
    #[serde(rename = "MGFs")]
    mgfs: Vec<Mgf>,
}

impl MmbpArrival {
    /// Fits an MMBP model from a processed trace.
    pub fn from_trace<T: WorkTrace + ?Sized>(trace: &mut T) -> Self {
        let intervals = count_arrival_intervals(trace);
        let (states, lambdas) = determine_states_lambda(&intervals, 2.0);
        debug!(
            windows = intervals.len(),
            states = lambdas.len(),
            "fitted MMBP state assignment"
        );
        let transition_matrix = build_transition_matrix(lambdas.len(), &states);
        let mgfs = build_state_mgfs(trace, &states, &lambdas);
        Self {
            transition_matrix,
            mgfs,
        }
    }

    /// Reads a CSV trace file, converts it to work with `estimator`, and fits
    /// an MMBP model from it.
    pub fn from_trace_file(path: impl AsRef<Path>, estimator: Estimator) -> Result<Self> {
        let reader = TraceReader::open(path)?;
        let mut processed = ProcessedTrace::new(reader, estimator);
        Ok(Self::from_trace(&mut processed))
    }

    /// Builds a model from explicit parts, validating the shape.
    pub fn from_parts(transition_matrix: Vec<Vec<f64>>, mgfs: Vec<Mgf>) -> Result<Self> {
        let model = Self {
            transition_matrix,
            mgfs,
        };
        if !model.is_well_formed() {
            return Err(MeisterError::InvalidModel(format!(
                "expected a square transition matrix over 1..={MAX_NUM_STATES} states with one MGF per state"
            )));
        }
        Ok(model)
    }

    /// Checks the structural invariants: 1 to [`MAX_NUM_STATES`] states, a
    /// square transition matrix, and one MGF per state. Deserialized models
    /// must pass this before entering the admission graph.
    pub fn is_well_formed(&self) -> bool {
        let n = self.mgfs.len();
        (1..=MAX_NUM_STATES).contains(&n)
            && self.transition_matrix.len() == n
            && self.transition_matrix.iter().all(|row| row.len() == n)
    }

    /// Number of MMBP states.
    pub fn num_states(&self) -> usize {
        self.mgfs.len()
    }

    /// Evaluates the `(sigma, rho)` arrival bound at `theta`.
    ///
    /// `sigma` is always 0; `rho` is `ln(spectral_radius) / theta`, +infinity
    /// when any state MGF diverges at `theta`.
    pub fn calc_bound(&self, theta: f64) -> (f64, f64) {
        (0.0, self.spectral_radius(theta).ln() / theta)
    }

    /// Spectral radius of `Diag(MGFs(theta)) * transition_matrix`.
    fn spectral_radius(&self, theta: f64) -> f64 {
        let n = self.mgfs.len();
        let mut values = Vec::with_capacity(n);
        for mgf in &self.mgfs {
            let value = mgf.calc_mgf(theta);
            if !value.is_finite() {
                return f64::INFINITY;
            }
            values.push(value);
        }
        if n == 2 {
            self.spectral_radius_closed2(&values)
        } else {
            self.spectral_radius_eigen(&values)
        }
    }

    /// Hand-solved eigenvalues for the two-state case.
    fn spectral_radius_closed2(&self, values: &[f64]) -> f64 {
        let t = &self.transition_matrix;
        let a = t[0][0] * values[0];
        let d = t[1][1] * values[1];
        let disc = ((a - d) * (a - d) + 4.0 * t[0][1] * t[1][0] * values[0] * values[1]).sqrt();
        let l1 = (a + d + disc) / 2.0;
        let l2 = (a + d - disc) / 2.0;
        l1.abs().max(l2.abs())
    }

    /// Generic eigendecomposition for n states.
    fn spectral_radius_eigen(&self, values: &[f64]) -> f64 {
        let n = values.len();
        let m = DMatrix::from_fn(n, n, |from, to| values[from] * self.transition_matrix[from][to]);
        m.complex_eigenvalues()
            .iter()
            .map(|eigenvalue| eigenvalue.norm())
            .fold(0.0, f64::max)
    }
}

/// Counts the number of arrivals in each fixed-width window of the trace.
fn count_arrival_intervals<T: WorkTrace + ?Sized>(trace: &mut T) -> Vec<f64> {
    let mut intervals = Vec::new();
    let mut count = 0.0;
    let mut next_interval = INTERVAL_WIDTH_NS;
    trace.reset();
    while let Some(entry) = trace.next_entry() {
        while entry.arrival_ns >= next_interval {
            intervals.push(count);
            count = 0.0;
            next_interval += INTERVAL_WIDTH_NS;
        }
        count += 1.0;
    }
    intervals.push(count);
    intervals
}

/// One pass of the LAMBDA recurrence.
///
/// Walks the geometric ladder of state rates downward from the rate that
/// covers `high`, writing each rate into `lambdas` from the top. Returns the
/// lower edge of the bottom state's confidence window, or -infinity when the
/// ladder runs below `low` before all states are placed (meaning fewer states
/// suffice for this `a`).
fn lambda_algorithm(a: f64, low: f64, high: f64, lambdas: &mut [f64]) -> f64 {
    let mut lambda = (high + a * a / 4.0).sqrt() - a / 2.0;
    lambda *= lambda;
    for state in (1..lambdas.len()).rev() {
        if lambda < low {
            return f64::NEG_INFINITY;
        }
        lambdas[state] = lambda;
        lambda = lambda.sqrt() - a;
        lambda *= lambda;
    }
    lambdas[0] = lambda;
    lambda - a * lambda.sqrt()
}

/// Assigns a state to each window with the LAMBDA algorithm.
///
/// Attempts the maximum number of states with confidence parameter `a`; if
/// that covers the observed range, binary-searches for the `a` that covers it
/// exactly, otherwise trims the unused states. Each window is then assigned
/// the largest state whose confidence window it exceeds.
fn determine_states_lambda(intervals: &[f64], a: f64) -> (Vec<usize>, Vec<f64>) {
    let mut low = intervals[0];
    let mut high = intervals[0];
    for &value in &intervals[1..] {
        if value < low {
            low = value;
        }
        if value > high {
            high = value;
        }
    }
    let mut a = a;
    let mut lambdas = vec![0.0; MAX_NUM_STATES];
    if lambda_algorithm(a, low, high, &mut lambdas).is_finite() {
        // The full ladder fits: search for the confidence interval that
        // exactly covers the range.
        a = binary_search_reverse(0.0, high, low, 0.01, |x| {
            lambda_algorithm(x, low, high, &mut lambdas)
        });
        lambda_algorithm(a, low, high, &mut lambdas);
    } else {
        lambdas.retain(|&lambda| lambda > 0.0);
        if lambdas.is_empty() {
            // Even one state's confidence window spans the whole range.
            let mut top = (high + a * a / 4.0).sqrt() - a / 2.0;
            top *= top;
            lambdas.push(top);
        }
    }
    let mut states = vec![0usize; intervals.len()];
    for (window, &interval) in intervals.iter().enumerate() {
        for state in (1..lambdas.len()).rev() {
            let lambda = lambdas[state];
            if interval > lambda - a * lambda.sqrt() {
                states[window] = state;
                break;
            }
        }
    }
    (states, lambdas)
}

/// Learns the per-timestep transition matrix from consecutive window states.
///
/// Row `i` normalizes the observed window-to-window transitions by the number
/// of timesteps spent in state `i`; the diagonal absorbs the remaining
/// probability so each row sums to 1.
fn build_transition_matrix(num_states: usize, states: &[usize]) -> Vec<Vec<f64>> {
    let mut matrix = vec![vec![0.0; num_states]; num_states];
    let mut durations_ns = vec![0u64; num_states];
    let mut from = states[0];
    durations_ns[from] += INTERVAL_WIDTH_NS;
    for &to in &states[1..] {
        durations_ns[to] += INTERVAL_WIDTH_NS;
        matrix[from][to] += 1.0;
        from = to;
    }
    for from in 0..num_states {
        let duration_secs = durations_ns[from] as f64 / 1e9;
        let mut steps = (duration_secs / STEP_SIZE).floor();
        if steps == 0.0 {
            steps = 1.0;
        }
        matrix[from][from] = 0.0;
        let mut prob_transition = 0.0;
        for to in 0..num_states {
            matrix[from][to] /= steps;
            prob_transition += matrix[from][to];
        }
        matrix[from][from] = 1.0 - prob_transition;
    }
    matrix
}

/// Fits one exponential MGF per state from the windows assigned to it and
/// sets each state's per-timestep request probability.
fn build_state_mgfs<T: WorkTrace + ?Sized>(
    trace: &mut T,
    states: &[usize],
    lambdas: &[f64],
) -> Vec<Mgf> {
    let mut mgfs: Vec<Mgf> = (0..lambdas.len()).map(|_| Mgf::exponential()).collect();
    let mut next_interval = INTERVAL_WIDTH_NS;
    let mut window = 0usize;
    trace.reset();
    while let Some(entry) = trace.next_entry() {
        while entry.arrival_ns >= next_interval {
            window += 1;
            next_interval += INTERVAL_WIDTH_NS;
        }
        mgfs[states[window]].add_sample(&entry);
    }
    for (state, mgf) in mgfs.iter_mut().enumerate() {
        mgf.set_prob_request(lambdas[state] * STEP_SIZE / INTERVAL_WIDTH_SECS);
    }
    mgfs
}
