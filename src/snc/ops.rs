//! SNC operators over arrival and service processes.
//!
//! Every node represents either an arrival process (an upper bound on work
//! offered) or a service process (a lower bound on work drained), reduced to
//! the `(sigma, rho)` form: for any positive theta the node can evaluate
//! `sigma(theta)` and `rho(theta)`. Operators compose bounds:
//!
//! - `Aggregate(A, B)`: combined behavior of two arrivals,
//! - `Convolution(S, T)`: two tandem queues in series,
//! - `Output(A, S)`: the departure of `A` from a queue with service `S`,
//!   which is the arrival into the next queue,
//! - `Leftover(A, S)`: the service remaining once `S` has accounted for `A`,
//! - `Latency(A, S, epsilon)`: the sink bounding the latency of `A` at `S` so
//!   that `Pr[latency > bound] < epsilon`.
//!
//! Nodes live in a per-analysis [`Arena`] and reference children by index, so
//! shared subtrees are built once and the whole DAG is torn down by dropping
//! the arena.
//!
//! When the two children of an operator transitively depend on a common flow,
//! the independent-case equations no longer hold and the node switches to the
//! Hölder form: children are evaluated at `p * theta` and `q * theta` with
//! `1/p + 1/q = 1`. Any `p > 1` yields a valid bound, so the choice of `p`
//! per dependent node is itself an optimization problem, handled by
//! [`Arena::dependency_optimization`].

use std::collections::BTreeSet;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::graph::FlowId;
use crate::search::min_search;
use crate::snc::mmbp::MmbpArrival;
use crate::snc::STEP_SIZE;

/// Index of a node within its [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

/// Hölder parameters and their optimization window.
///
/// `p = q = 1` encodes the independent case, which degenerates into the
/// independent equations for every operator.
#[derive(Debug, Clone)]
struct HolderParams {
    p: f64,
    q: f64,
    lower_p: f64,
    upper_p: f64,
    lower_q: f64,
    upper_q: f64,
}

impl HolderParams {
    fn independent() -> Self {
        Self {
            p: 1.0,
            q: 1.0,
            lower_p: 1.0,
            upper_p: 1.0,
            lower_q: 1.0,
            upper_q: 1.0,
        }
    }

    fn set_p(&mut self, p: f64) {
        if p <= 1.0 {
            *self = Self::independent();
        } else {
            self.p = p;
            self.q = 1.0 / (1.0 - 1.0 / p);
        }
    }

    fn set_q(&mut self, q: f64) {
        if q <= 1.0 {
            *self = Self::independent();
        } else {
            self.p = 1.0 / (1.0 - 1.0 / q);
            self.q = q;
        }
    }

    fn reset_opt_bounds(&mut self) {
        self.lower_p = 1.001;
        self.upper_p = 2.0;
        self.lower_q = 1.001;
        self.upper_q = 2.0;
        self.set_p(2.0);
    }
}

#[derive(Debug)]
enum NodeKind<'a> {
    Arrival(&'a MmbpArrival),
    /// Service rate, pre-scaled to work units per timestep.
    ConstantService(f64),
    Aggregate(NodeId, NodeId),
    Convolution(NodeId, NodeId),
    Output(NodeId, NodeId),
    Leftover(NodeId, NodeId),
    Latency {
        arrival: NodeId,
        service: NodeId,
        epsilon: f64,
    },
    #[cfg(test)]
    Probe { sigma: f64, rho: f64 },
}

#[derive(Debug)]
struct Node<'a> {
    kind: NodeKind<'a>,
    /// Flow ids this node transitively depends on.
    deps: BTreeSet<FlowId>,
    /// This node (if Hölder-coupled) plus every coupled descendant.
    dependent: Vec<NodeId>,
    holder: HolderParams,
}

/// Arena of SNC operator nodes for one latency analysis.
#[derive(Debug, Default)]
pub struct Arena<'a> {
    nodes: Vec<Node<'a>>,
}

impl<'a> Arena<'a> {
    /// An empty arena.
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    fn push(&mut self, node: Node<'a>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Leaf arrival process backed by a flow's fitted MMBP model, seeded with
    /// the flow's dependency set.
    pub fn arrival(&mut self, model: &'a MmbpArrival, deps: &BTreeSet<FlowId>) -> NodeId {
        self.push(Node {
            kind: NodeKind::Arrival(model),
            deps: deps.clone(),
            dependent: Vec::new(),
            holder: HolderParams::independent(),
        })
    }

    /// Leaf constant-rate service process. `rate` is in work units per
    /// second.
    pub fn constant_service(&mut self, rate: f64) -> NodeId {
        self.push(Node {
            kind: NodeKind::ConstantService(rate * STEP_SIZE),
            deps: BTreeSet::new(),
            dependent: Vec::new(),
            holder: HolderParams::independent(),
        })
    }

    fn push_operator(&mut self, kind: NodeKind<'a>, a: NodeId, b: NodeId) -> NodeId {
        let id = NodeId(self.nodes.len());
        let mut holder = HolderParams::independent();
        let mut dependent = Vec::new();
        if !self.independent(a, b) {
            holder.reset_opt_bounds();
            dependent.push(id);
        }
        dependent.extend_from_slice(&self.nodes[a.0].dependent);
        dependent.extend_from_slice(&self.nodes[b.0].dependent);
        let mut deps = self.nodes[a.0].deps.clone();
        deps.extend(self.nodes[b.0].deps.iter().copied());
        self.push(Node {
            kind,
            deps,
            dependent,
            holder,
        })
    }

    /// Aggregation of two arrival processes.
    pub fn aggregate(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.push_operator(NodeKind::Aggregate(a, b), a, b)
    }

    /// Convolution of two tandem service processes.
    pub fn convolution(&mut self, s: NodeId, t: NodeId) -> NodeId {
        self.push_operator(NodeKind::Convolution(s, t), s, t)
    }

    /// Departure of arrival `a` after passing a queue with service `s`.
    pub fn output(&mut self, a: NodeId, s: NodeId) -> NodeId {
        self.push_operator(NodeKind::Output(a, s), a, s)
    }

    /// Service left at a queue once `s` has accounted for arrival `a`.
    pub fn leftover(&mut self, a: NodeId, s: NodeId) -> NodeId {
        self.push_operator(NodeKind::Leftover(a, s), a, s)
    }

    /// Latency sink bounding arrival `a` at service `s` with tail probability
    /// `epsilon`.
    pub fn latency_bound(&mut self, a: NodeId, s: NodeId, epsilon: f64) -> NodeId {
        self.push_operator(
            NodeKind::Latency {
                arrival: a,
                service: s,
                epsilon,
            },
            a,
            s,
        )
    }

    /// True when two nodes share no flow id in their dependency sets.
    pub fn independent(&self, a: NodeId, b: NodeId) -> bool {
        self.nodes[a.0]
            .deps
            .intersection(&self.nodes[b.0].deps)
            .next()
            .is_none()
    }

    /// Flow ids the node transitively depends on.
    pub fn dependencies(&self, id: NodeId) -> &BTreeSet<FlowId> {
        &self.nodes[id.0].deps
    }

    /// The Hölder-coupled nodes at or below `id`.
    pub fn dependent_bounds(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].dependent
    }

    /// Current Hölder `p` of a node.
    pub fn p(&self, id: NodeId) -> f64 {
        self.nodes[id.0].holder.p
    }

    /// Current Hölder `q` of a node.
    pub fn q(&self, id: NodeId) -> f64 {
        self.nodes[id.0].holder.q
    }

    /// Sets a node's Hölder `p`, deriving `q`. Values at or below 1 collapse
    /// the node back to the independent case.
    pub fn set_p(&mut self, id: NodeId, p: f64) {
        self.nodes[id.0].holder.set_p(p);
    }

    /// Sets a node's Hölder `q`, deriving `p`. Values at or below 1 collapse
    /// the node back to the independent case.
    pub fn set_q(&mut self, id: NodeId, q: f64) {
        self.nodes[id.0].holder.set_q(q);
    }

    /// Marks a node Hölder-coupled, starting at `p = q = 2` with the standard
    /// optimization window.
    pub fn set_dependent(&mut self, id: NodeId) {
        self.nodes[id.0].holder.reset_opt_bounds();
        self.nodes[id.0].dependent.insert(0, id);
    }

    /// Evaluates a node's `(sigma, rho)` bound at `theta`.
    pub fn bound(&self, id: NodeId, theta: f64) -> (f64, f64) {
        let node = &self.nodes[id.0];
        let p = node.holder.p;
        let q = node.holder.q;
        match &node.kind {
            NodeKind::Arrival(model) => model.calc_bound(theta),
            NodeKind::ConstantService(rate_per_step) => (0.0, -rate_per_step),
            NodeKind::Aggregate(a, b) => {
                let (sigma_a, rho_a) = self.bound(*a, p * theta);
                let (sigma_b, rho_b) = self.bound(*b, q * theta);
                (sigma_a + sigma_b, rho_a + rho_b)
            }
            NodeKind::Convolution(s, t) => {
                let (sigma_s, mut rho_s) = self.bound(*s, p * theta);
                let (sigma_t, rho_t) = self.bound(*t, q * theta);
                if rho_s == rho_t {
                    // Perturb to keep the log term off its singularity.
                    rho_s *= 0.99;
                }
                let sigma = sigma_s + sigma_t
                    - (1.0 - (-theta * (rho_s - rho_t).abs()).exp()).ln() / theta;
                (sigma, rho_s.max(rho_t))
            }
            NodeKind::Output(a, s) => {
                let (sigma_a, rho_a) = self.bound(*a, p * theta);
                let (sigma_s, rho_s) = self.bound(*s, q * theta);
                let sigma =
                    sigma_a + sigma_s - (1.0 - (theta * (rho_a + rho_s)).exp()).ln() / theta;
                (sigma, rho_a)
            }
            NodeKind::Leftover(a, s) => {
                let (sigma_a, rho_a) = self.bound(*a, p * theta);
                let (sigma_s, rho_s) = self.bound(*s, q * theta);
                (sigma_a + sigma_s, rho_a + rho_s)
            }
            NodeKind::Latency { .. } => unreachable!("latency sink used as operand"),
            #[cfg(test)]
            NodeKind::Probe { sigma, rho } => (sigma + theta, rho + theta),
        }
    }

    /// Evaluates a latency sink at a specific `theta`. Any positive `theta`
    /// yields a valid (if loose) bound in seconds.
    pub fn latency_at(&self, id: NodeId, theta: f64) -> f64 {
        let node = &self.nodes[id.0];
        match &node.kind {
            NodeKind::Latency {
                arrival,
                service,
                epsilon,
            } => {
                let (sigma_a, rho_a) = self.bound(*arrival, node.holder.p * theta);
                let (sigma_s, rho_s) = self.bound(*service, node.holder.q * theta);
                let latency = ((epsilon * (1.0 - (theta * (rho_a + rho_s)).exp())).ln() / theta
                    - (sigma_a + sigma_s))
                    / rho_s;
                latency * STEP_SIZE
            }
            _ => unreachable!("latency_at on a non-latency node"),
        }
    }

    /// Tightest latency over theta, holding Hölder parameters fixed.
    ///
    /// Starts at theta = 1000 and refines with a shrinking grid search down
    /// to a step of 1e-9.
    pub fn latency(&self, id: NodeId) -> f64 {
        self.latency_at(id, self.optimize_theta(id))
    }

    fn optimize_theta(&self, id: NodeId) -> f64 {
        const MIN_THETA: f64 = 1e-9;
        const INITIAL_THETA: f64 = 1000.0;
        const STEP_DECREASE_FACTOR: f64 = 10.0;
        let mut theta = INITIAL_THETA;
        let mut step = INITIAL_THETA / STEP_DECREASE_FACTOR;
        while step >= MIN_THETA {
            theta = min_search(
                (theta - STEP_DECREASE_FACTOR * step).max(MIN_THETA),
                theta + STEP_DECREASE_FACTOR * step,
                step,
                |x| self.latency_at(id, x),
            );
            step /= STEP_DECREASE_FACTOR;
        }
        theta
    }

    /// Optimizes the Hölder parameters of every coupled node below the sink
    /// and returns the best latency found.
    ///
    /// Random search over each coupled node's p/q window, shrinking the
    /// window around the best point found. The RNG is re-seeded with a fixed
    /// value on every call so repeated analyses of the same graph return the
    /// same latency.
    pub fn dependency_optimization(&mut self, id: NodeId) -> f64 {
        const SEARCH_RANGE_DECREASE_COUNT: usize = 25;
        const SEARCH_RANGE_DECREASE_FACTOR: f64 = 1.2;
        const LOWER_EDGE: f64 = 1.001;
        let bounds = self.nodes[id.0].dependent.clone();
        let mut min_latency = self.latency(id);
        if bounds.is_empty() {
            return min_latency;
        }
        let mut best_p: Vec<f64> = bounds.iter().map(|&b| self.nodes[b.0].holder.p).collect();
        let mut rng = SmallRng::seed_from_u64(1);
        let iterations = bounds.len() * 10;
        for _ in 0..SEARCH_RANGE_DECREASE_COUNT {
            for _ in 0..iterations {
                // Perturb every coupled node, weighting the p and q windows
                // by their widths.
                for &bound_id in &bounds {
                    let holder = &mut self.nodes[bound_id.0].holder;
                    let range_p = holder.upper_p - holder.lower_p;
                    let range_q = holder.upper_q - holder.lower_q;
                    let mut r = rng.gen::<f64>() * (range_p + range_q);
                    if r <= range_p {
                        let value = holder.lower_p + r;
                        holder.set_p(value);
                    } else {
                        r -= range_p;
                        let value = holder.lower_q + r;
                        holder.set_q(value);
                    }
                }
                let latency = self.latency(id);
                if latency < min_latency {
                    min_latency = latency;
                    for (slot, &bound_id) in best_p.iter_mut().zip(&bounds) {
                        *slot = self.nodes[bound_id.0].holder.p;
                    }
                }
            }
            // Shrink each window around the best point seen so far.
            for (&bound_id, &best) in bounds.iter().zip(&best_p) {
                let holder = &mut self.nodes[bound_id.0].holder;
                holder.set_p(best);
                let range_p = (holder.upper_p - holder.lower_p) / SEARCH_RANGE_DECREASE_FACTOR;
                let range_q = (holder.upper_q - holder.lower_q) / SEARCH_RANGE_DECREASE_FACTOR;
                holder.lower_p = (holder.p - range_p / 2.0).max(LOWER_EDGE);
                holder.upper_p = holder.lower_p + range_p;
                holder.lower_q = (holder.q - range_q / 2.0).max(LOWER_EDGE);
                holder.upper_q = holder.lower_q + range_q;
            }
        }
        min_latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9 * a.abs().max(b.abs()).max(1.0)
    }

    impl<'a> Arena<'a> {
        fn probe(&mut self, sigma: f64, rho: f64, deps: &[FlowId]) -> NodeId {
            self.push(Node {
                kind: NodeKind::Probe { sigma, rho },
                deps: deps.iter().copied().collect(),
                dependent: Vec::new(),
                holder: HolderParams::independent(),
            })
        }
    }

    #[test]
    fn test_holder_params_conjugate() {
        let mut holder = HolderParams::independent();
        holder.set_p(1.5);
        assert!(approx_eq(holder.p, 1.5));
        assert!(approx_eq(holder.q, 3.0));
        assert!((1.0 / holder.p + 1.0 / holder.q - 1.0).abs() < 1e-12);
        holder.set_q(1.5);
        assert!(approx_eq(holder.p, 3.0));
        assert!(approx_eq(holder.q, 1.5));
        assert!((1.0 / holder.p + 1.0 / holder.q - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_set_p_at_most_one_means_independent() {
        let mut arena = Arena::new();
        let a = arena.probe(1.0, 2.0, &[1]);
        let b = arena.probe(3.0, 4.0, &[1]);
        let agg = arena.aggregate(a, b);
        assert!(approx_eq(arena.p(agg), 2.0));
        arena.set_p(agg, 0.5);
        assert!(approx_eq(arena.p(agg), 1.0));
        assert!(approx_eq(arena.q(agg), 1.0));
    }

    #[test]
    fn test_dependency_detection() {
        let mut arena = Arena::new();
        let a = arena.probe(0.0, 0.0, &[3, 7]);
        let b = arena.probe(0.0, 0.0, &[4, 8]);
        assert!(arena.independent(a, b));
        let agg = arena.aggregate(a, b);
        assert!(arena.dependent_bounds(agg).is_empty());
        assert_eq!(
            arena.dependencies(agg).iter().copied().collect::<Vec<_>>(),
            vec![3, 4, 7, 8]
        );

        let c = arena.probe(0.0, 0.0, &[7, 9]);
        assert!(!arena.independent(agg, c));
        let agg2 = arena.aggregate(agg, c);
        assert_eq!(arena.dependent_bounds(agg2), [agg2]);
        assert!(approx_eq(arena.p(agg2), 2.0));
    }

    #[test]
    fn test_dependent_list_accumulates_descendants() {
        let mut arena = Arena::new();
        let a = arena.probe(0.0, 0.0, &[1]);
        let b = arena.probe(0.0, 0.0, &[1]);
        let inner = arena.aggregate(a, b); // dependent
        let c = arena.probe(0.0, 0.0, &[2]);
        let outer = arena.aggregate(inner, c); // independent itself
        assert_eq!(arena.dependent_bounds(outer), [inner]);
        let d = arena.probe(0.0, 0.0, &[2]);
        let top = arena.aggregate(outer, d); // dependent via flow 2
        assert_eq!(arena.dependent_bounds(top), [top, inner]);
    }

    #[test]
    fn test_constant_service_bound() {
        let mut arena = Arena::new();
        for rate in [3.0, 4.0, 5.0] {
            let service = arena.constant_service(rate);
            for theta in [0.1, 0.2, 2.0] {
                let (sigma, rho) = arena.bound(service, theta);
                assert_eq!(sigma, 0.0);
                assert!(approx_eq(rho, -rate * STEP_SIZE));
            }
        }
    }

    #[test]
    fn test_aggregate_bound() {
        let mut arena = Arena::new();
        let a = arena.probe(1.0, 2.0, &[]);
        let b = arena.probe(3.0, 4.0, &[]);
        let agg = arena.aggregate(a, b);
        // Independent
        let (sigma, rho) = arena.bound(agg, 0.1);
        assert!(approx_eq(sigma, 4.2));
        assert!(approx_eq(rho, 6.2));
        let (sigma, rho) = arena.bound(agg, 2.0);
        assert!(approx_eq(sigma, 8.0));
        assert!(approx_eq(rho, 10.0));
        // Dependent p = 2
        arena.set_dependent(agg);
        let (sigma, rho) = arena.bound(agg, 0.1);
        assert!(approx_eq(sigma, 4.4));
        assert!(approx_eq(rho, 6.4));
        let (sigma, rho) = arena.bound(agg, 2.0);
        assert!(approx_eq(sigma, 12.0));
        assert!(approx_eq(rho, 14.0));
        // Dependent p = 1.5 (q = 3)
        arena.set_p(agg, 1.5);
        let (sigma, rho) = arena.bound(agg, 0.1);
        assert!(approx_eq(sigma, 4.45));
        assert!(approx_eq(rho, 6.45));
        let (sigma, rho) = arena.bound(agg, 2.0);
        assert!(approx_eq(sigma, 13.0));
        assert!(approx_eq(rho, 15.0));
    }

    #[test]
    fn test_convolution_bound() {
        let mut arena = Arena::new();
        let s = arena.probe(2.0, -3.0, &[]);
        let t = arena.probe(4.0, -5.0, &[]);
        let conv = arena.convolution(s, t);
        // Independent
        let (sigma, rho) = arena.bound(conv, 0.1);
        assert!(approx_eq(sigma, 6.2 - (1.0 - (-0.2f64).exp()).ln() / 0.1));
        assert!(approx_eq(rho, -2.9));
        let (sigma, rho) = arena.bound(conv, 2.0);
        assert!(approx_eq(sigma, 10.0 - (1.0 - (-4.0f64).exp()).ln() / 2.0));
        assert!(approx_eq(rho, -1.0));
        // Dependent p = 2
        arena.set_dependent(conv);
        let (sigma, rho) = arena.bound(conv, 0.1);
        assert!(approx_eq(sigma, 6.4 - (1.0 - (-0.2f64).exp()).ln() / 0.1));
        assert!(approx_eq(rho, -2.8));
        // Dependent p = 1.5 (q = 3)
        arena.set_p(conv, 1.5);
        let (sigma, rho) = arena.bound(conv, 0.1);
        assert!(approx_eq(sigma, 6.45 - (1.0 - (-0.185f64).exp()).ln() / 0.1));
        assert!(approx_eq(rho, -2.85));
    }

    #[test]
    fn test_convolution_equal_rho_perturbed() {
        let mut arena = Arena::new();
        let s = arena.probe(5.0, -10.0, &[]);
        let t = arena.probe(5.0, -10.0, &[]);
        let conv = arena.convolution(s, t);
        let (sigma, rho) = arena.bound(conv, 0.1);
        assert!(approx_eq(sigma, 10.2 - (1.0 - (-0.0099f64).exp()).ln() / 0.1));
        assert!(approx_eq(rho, -9.801));
        let (sigma, rho) = arena.bound(conv, 2.0);
        assert!(approx_eq(sigma, 14.0 - (1.0 - (-0.16f64).exp()).ln() / 2.0));
        assert!(approx_eq(rho, -7.92));
    }

    #[test]
    fn test_output_bound() {
        let mut arena = Arena::new();
        let a = arena.probe(1.0, 2.0, &[]);
        let s = arena.probe(3.0, -8.0, &[]);
        let out = arena.output(a, s);
        // Independent
        let (sigma, rho) = arena.bound(out, 0.25);
        assert!(approx_eq(sigma, 4.5 - (1.0 - (-1.375f64).exp()).ln() / 0.25));
        assert!(approx_eq(rho, 2.25));
        let (sigma, rho) = arena.bound(out, 1.0);
        assert!(approx_eq(sigma, 6.0 - (1.0 - (-4.0f64).exp()).ln() / 1.0));
        assert!(approx_eq(rho, 3.0));
        // Dependent p = 2
        arena.set_dependent(out);
        let (sigma, rho) = arena.bound(out, 0.25);
        assert!(approx_eq(sigma, 5.0 - (1.0 - (-1.25f64).exp()).ln() / 0.25));
        assert!(approx_eq(rho, 2.5));
        // Dependent p = 1.5 (q = 3)
        arena.set_p(out, 1.5);
        let (sigma, rho) = arena.bound(out, 0.25);
        assert!(approx_eq(sigma, 5.125 - (1.0 - (-1.21875f64).exp()).ln() / 0.25));
        assert!(approx_eq(rho, 2.375));
    }

    #[test]
    fn test_leftover_bound() {
        let mut arena = Arena::new();
        let a = arena.probe(1.0, 2.0, &[]);
        let s = arena.probe(3.0, 4.0, &[]);
        let leftover = arena.leftover(a, s);
        let (sigma, rho) = arena.bound(leftover, 0.1);
        assert!(approx_eq(sigma, 4.2));
        assert!(approx_eq(rho, 6.2));
        arena.set_dependent(leftover);
        let (sigma, rho) = arena.bound(leftover, 0.2);
        assert!(approx_eq(sigma, 4.8));
        assert!(approx_eq(rho, 6.8));
        arena.set_p(leftover, 1.5);
        let (sigma, rho) = arena.bound(leftover, 2.0);
        assert!(approx_eq(sigma, 13.0));
        assert!(approx_eq(rho, 15.0));
    }

    #[test]
    fn test_latency_bound_formula() {
        for epsilon in [0.01, 0.001, 0.0001] {
            let mut arena = Arena::new();
            let a = arena.probe(1.0, 2.0, &[]);
            let s = arena.probe(3.0, -8.0, &[]);
            let sink = arena.latency_bound(a, s, epsilon);
            // expected(theta, theta * (rho_a + rho_s), sigma_a + sigma_s, rho_s)
            let expected = |theta: f64, theta_rho_sum: f64, sigma_sum: f64, rho_s: f64| {
                STEP_SIZE * (((epsilon * (1.0 - theta_rho_sum.exp())).ln() / theta) - sigma_sum)
                    / rho_s
            };
            // Independent
            assert!(approx_eq(
                arena.latency_at(sink, 0.25),
                expected(0.25, -1.375, 4.5, -7.75)
            ));
            assert!(approx_eq(
                arena.latency_at(sink, 1.0),
                expected(1.0, -4.0, 6.0, -7.0)
            ));
            // Dependent p = 2
            arena.set_dependent(sink);
            assert!(approx_eq(
                arena.latency_at(sink, 0.25),
                expected(0.25, -1.25, 5.0, -7.5)
            ));
            // Dependent p = 1.5 (q = 3)
            arena.set_p(sink, 1.5);
            assert!(approx_eq(
                arena.latency_at(sink, 0.25),
                expected(0.25, -1.21875, 5.125, -7.25)
            ));
        }
    }

    #[test]
    fn test_dependency_optimization_improves_or_matches() {
        let mut arena = Arena::new();
        let a = arena.probe(1.0, 0.5, &[1]);
        let b = arena.probe(1.0, 0.5, &[1]);
        let agg = arena.aggregate(a, b);
        let service = arena.constant_service(300000.0);
        let sink = arena.latency_bound(agg, service, 0.001);
        assert_eq!(arena.dependent_bounds(sink), [agg]);
        let starting = arena.latency(sink);
        let optimized = arena.dependency_optimization(sink);
        assert!(optimized <= starting + 1e-15);
        // Invariant holds for the optimized parameters.
        assert!((1.0 / arena.p(agg) + 1.0 / arena.q(agg) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_dependency_optimization_is_reproducible() {
        let run = || {
            let mut arena = Arena::new();
            let a = arena.probe(1.0, 0.5, &[1]);
            let b = arena.probe(1.0, 0.5, &[1]);
            let agg = arena.aggregate(a, b);
            let service = arena.constant_service(300000.0);
            let sink = arena.latency_bound(agg, service, 0.001);
            arena.dependency_optimization(sink)
        };
        assert_eq!(run().to_bits(), run().to_bits());
    }

    #[test]
    fn test_dependency_optimization_without_bounds_is_plain_latency() {
        let mut arena = Arena::new();
        let a = arena.probe(1.0, 0.5, &[1]);
        let service = arena.constant_service(300000.0);
        let sink = arena.latency_bound(a, service, 0.001);
        let plain = arena.latency(sink);
        assert_eq!(arena.dependency_optimization(sink), plain);
    }
}
