//! Moment generating functions for per-timestep work.
//!
//! An MGF here models the work arriving in one timestep: with probability `p`
//! a request drawn from some size distribution fires, otherwise nothing does.
//! If `M_size` is the MGF of the size distribution, the per-timestep MGF is
//! `p * M_size(theta) + (1 - p)`.
//!
//! The size distribution parameters are estimated online by feeding trace
//! entries through [`Mgf::add_sample`]; `p` is derived from the fitted state
//! arrival rate and set via [`Mgf::set_prob_request`]. Every variant
//! serializes to a self-describing form (type tag plus fields) so trained
//! models can travel between nodes inside flow configs.

use std::cell::RefCell;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::trace::ProcessedEntry;

fn bernoulli_mix(p: f64, size_mgf: f64) -> f64 {
    p * size_mgf + (1.0 - p)
}

fn hyperexp_size_mgf(theta: f64, lambda1: f64, lambda2: f64, prob1: f64) -> f64 {
    if theta < lambda1 && theta < lambda2 {
        prob1 * lambda1 / (lambda1 - theta) + (1.0 - prob1) * lambda2 / (lambda2 - theta)
    } else {
        f64::INFINITY
    }
}

/// Request sizes concentrated at their running mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MgfDeterministic {
    p: f64,
    total_size: f64,
    count: u64,
    mean_size: f64,
}

impl Default for MgfDeterministic {
    fn default() -> Self {
        Self {
            p: 0.0,
            total_size: 0.0,
            count: 0,
            mean_size: 0.0,
        }
    }
}

impl MgfDeterministic {
    fn calc(&self, theta: f64) -> f64 {
        bernoulli_mix(self.p, (self.mean_size * theta).exp())
    }

    fn add_sample(&mut self, entry: &ProcessedEntry) {
        self.total_size += entry.work;
        self.count += 1;
        self.mean_size = self.total_size / self.count as f64;
    }
}

/// Exponentially distributed request sizes with rate `lambda`.
///
/// Diverges for `theta >= lambda`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MgfExponential {
    p: f64,
    total_size: f64,
    count: u64,
    lambda: f64,
}

impl Default for MgfExponential {
    fn default() -> Self {
        Self {
            p: 0.0,
            total_size: 0.0,
            count: 0,
            // Large rate so an unsampled state contributes almost no work.
            lambda: 1e6,
        }
    }
}

impl MgfExponential {
    fn calc(&self, theta: f64) -> f64 {
        if theta < self.lambda {
            bernoulli_mix(self.p, self.lambda / (self.lambda - theta))
        } else {
            f64::INFINITY
        }
    }

    fn add_sample(&mut self, entry: &ProcessedEntry) {
        self.total_size += entry.work;
        self.count += 1;
        self.lambda = self.count as f64 / self.total_size;
    }
}

/// Two-phase hyperexponential request sizes fitted to the first two sample
/// moments.
///
/// The fit matches mean and squared coefficient of variation `C^2`; samples
/// with `C^2 < 1` cannot be expressed by a hyperexponential and degenerate to
/// the exponential with the same mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MgfHyperexponential {
    p: f64,
    mean_size: f64,
    var_sum_size: f64,
    count: u64,
    lambda1: f64,
    lambda2: f64,
    prob1: f64,
}

impl Default for MgfHyperexponential {
    fn default() -> Self {
        Self {
            p: 0.0,
            mean_size: 0.0,
            var_sum_size: 0.0,
            count: 0,
            lambda1: 1e6,
            lambda2: 1e6,
            prob1: 0.0,
        }
    }
}

impl MgfHyperexponential {
    fn calc(&self, theta: f64) -> f64 {
        let size_mgf = hyperexp_size_mgf(theta, self.lambda1, self.lambda2, self.prob1);
        if size_mgf.is_finite() {
            bernoulli_mix(self.p, size_mgf)
        } else {
            f64::INFINITY
        }
    }

    fn add_sample(&mut self, entry: &ProcessedEntry) {
        // Welford's online mean/variance.
        self.count += 1;
        let count = self.count as f64;
        self.var_sum_size +=
            (count - 1.0) * (entry.work - self.mean_size) * (entry.work - self.mean_size) / count;
        self.mean_size += (entry.work - self.mean_size) / count;
        let lambda_avg = 1.0 / self.mean_size;
        let sample_var = self.var_sum_size / (count - 1.0);
        let c2 = sample_var / (self.mean_size * self.mean_size);
        if c2.is_finite() && c2 >= 1.0 {
            self.lambda1 = lambda_avg / c2;
            self.lambda2 = lambda_avg * 2.0;
            self.prob1 = 1.0 / (2.0 * c2 - 1.0);
        } else {
            self.lambda1 = lambda_avg;
            self.lambda2 = lambda_avg;
            self.prob1 = 1.0;
        }
    }
}

/// Two-phase hyperexponential where the phases are the get and put request
/// populations, each fitted with its own exponential rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MgfHyperexponentialGetPut {
    p: f64,
    get_size: f64,
    put_size: f64,
    get_count: u64,
    put_count: u64,
    lambda1: f64,
    lambda2: f64,
    prob1: f64,
}

impl Default for MgfHyperexponentialGetPut {
    fn default() -> Self {
        Self {
            p: 0.0,
            get_size: 0.0,
            put_size: 0.0,
            get_count: 0,
            put_count: 0,
            lambda1: 1e6,
            lambda2: 1e6,
            prob1: 0.0,
        }
    }
}

impl MgfHyperexponentialGetPut {
    fn calc(&self, theta: f64) -> f64 {
        let size_mgf = hyperexp_size_mgf(theta, self.lambda1, self.lambda2, self.prob1);
        if size_mgf.is_finite() {
            bernoulli_mix(self.p, size_mgf)
        } else {
            f64::INFINITY
        }
    }

    fn add_sample(&mut self, entry: &ProcessedEntry) {
        if entry.is_get {
            self.get_size += entry.work;
            self.get_count += 1;
            self.lambda1 = self.get_count as f64 / self.get_size;
        } else {
            self.put_size += entry.work;
            self.put_count += 1;
            self.lambda2 = self.put_count as f64 / self.put_size;
        }
        self.prob1 = self.get_count as f64 / (self.get_count + self.put_count) as f64;
    }
}

/// Empirical distribution over the observed request sizes.
///
/// `calc` averages `exp(theta * w)` over all samples, memoized per exact
/// theta; the memo table is cleared whenever a new sample arrives.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MgfTrace {
    p: f64,
    sizes: Vec<f64>,
    #[serde(skip)]
    table: RefCell<HashMap<u64, f64>>,
}

impl MgfTrace {
    fn calc(&self, theta: f64) -> f64 {
        if self.sizes.is_empty() {
            return 1.0;
        }
        let key = theta.to_bits();
        let cached = self.table.borrow().get(&key).copied();
        let size_mgf = match cached {
            Some(value) => value,
            None => {
                let sum: f64 = self.sizes.iter().map(|w| (w * theta).exp()).sum();
                let value = sum / self.sizes.len() as f64;
                self.table.borrow_mut().insert(key, value);
                value
            }
        };
        bernoulli_mix(self.p, size_mgf)
    }

    fn add_sample(&mut self, entry: &ProcessedEntry) {
        self.sizes.push(entry.work);
        self.table.borrow_mut().clear();
    }
}

/// A per-timestep work MGF, dispatching over the five supported request-size
/// distribution models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Mgf {
    /// Deterministic request sizes at the running mean.
    #[serde(rename = "MGFDeterministic")]
    Deterministic(MgfDeterministic),
    /// Exponentially distributed request sizes.
    #[serde(rename = "MGFExponential")]
    Exponential(MgfExponential),
    /// Hyperexponential fitted to the first two moments.
    #[serde(rename = "MGFHyperexponential")]
    Hyperexponential(MgfHyperexponential),
    /// Hyperexponential with get/put phases.
    #[serde(rename = "MGFHyperexponentialGetPut")]
    HyperexponentialGetPut(MgfHyperexponentialGetPut),
    /// Empirical distribution over the observed sizes.
    #[serde(rename = "MGFTrace")]
    Trace(MgfTrace),
}

impl Mgf {
    /// A fresh deterministic model.
    pub fn deterministic() -> Self {
        Self::Deterministic(MgfDeterministic::default())
    }

    /// A fresh exponential model.
    pub fn exponential() -> Self {
        Self::Exponential(MgfExponential::default())
    }

    /// A fresh moment-fitted hyperexponential model.
    pub fn hyperexponential() -> Self {
        Self::Hyperexponential(MgfHyperexponential::default())
    }

    /// A fresh get/put hyperexponential model.
    pub fn hyperexponential_get_put() -> Self {
        Self::HyperexponentialGetPut(MgfHyperexponentialGetPut::default())
    }

    /// A fresh empirical model.
    pub fn trace() -> Self {
        Self::Trace(MgfTrace::default())
    }

    /// Evaluates the per-timestep MGF at `theta`. May return +infinity where
    /// the underlying size distribution diverges.
    pub fn calc_mgf(&self, theta: f64) -> f64 {
        match self {
            Self::Deterministic(mgf) => mgf.calc(theta),
            Self::Exponential(mgf) => mgf.calc(theta),
            Self::Hyperexponential(mgf) => mgf.calc(theta),
            Self::HyperexponentialGetPut(mgf) => mgf.calc(theta),
            Self::Trace(mgf) => mgf.calc(theta),
        }
    }

    /// Folds one more observed request into the size-distribution estimate.
    pub fn add_sample(&mut self, entry: &ProcessedEntry) {
        match self {
            Self::Deterministic(mgf) => mgf.add_sample(entry),
            Self::Exponential(mgf) => mgf.add_sample(entry),
            Self::Hyperexponential(mgf) => mgf.add_sample(entry),
            Self::HyperexponentialGetPut(mgf) => mgf.add_sample(entry),
            Self::Trace(mgf) => mgf.add_sample(entry),
        }
    }

    /// Sets the probability of a request firing in one timestep.
    pub fn set_prob_request(&mut self, prob: f64) {
        match self {
            Self::Deterministic(mgf) => mgf.p = prob,
            Self::Exponential(mgf) => mgf.p = prob,
            Self::Hyperexponential(mgf) => mgf.p = prob,
            Self::HyperexponentialGetPut(mgf) => mgf.p = prob,
            Self::Trace(mgf) => mgf.p = prob,
        }
    }

    /// The configured per-timestep request probability.
    pub fn prob_request(&self) -> f64 {
        match self {
            Self::Deterministic(mgf) => mgf.p,
            Self::Exponential(mgf) => mgf.p,
            Self::Hyperexponential(mgf) => mgf.p,
            Self::HyperexponentialGetPut(mgf) => mgf.p,
            Self::Trace(mgf) => mgf.p,
        }
    }
}
