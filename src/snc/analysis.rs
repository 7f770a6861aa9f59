//! Latency analysis over the flow/queue graph.
//!
//! Each algorithm walks the graph, assembles an operator DAG in a scratch
//! [`Arena`], and reduces it to a scalar latency through the latency sink.
//! The arena, and with it every node built for the analysis, is dropped when
//! the function returns.
//!
//! Flows only compete with traffic of equal or higher priority (priority
//! value at most their own); lower-priority traffic is invisible to them
//! under strict priority scheduling.

use std::collections::BTreeMap;

use tracing::trace;

use crate::graph::{priority_compare, Flow, FlowId, Network, QueueId};
use crate::snc::ops::{Arena, NodeId};

/// Aggregates a set of arrival nodes while minimizing the number of
/// dependent operators in the result.
///
/// Greedily packs arrivals into groups whose running aggregate stays
/// independent of each new member, then folds the groups together. Only the
/// final cross-group aggregations can end up dependent.
fn aggregate_arrivals(arena: &mut Arena<'_>, arrivals: &[NodeId]) -> NodeId {
    debug_assert!(!arrivals.is_empty());
    let mut groups: Vec<NodeId> = Vec::new();
    for &arrival in arrivals {
        let mut placed = false;
        for group in groups.iter_mut() {
            if arena.independent(arrival, *group) {
                *group = arena.aggregate(arrival, *group);
                placed = true;
                break;
            }
        }
        if !placed {
            groups.push(arrival);
        }
    }
    let mut aggregate = groups[0];
    for &group in &groups[1..] {
        aggregate = arena.aggregate(aggregate, group);
    }
    aggregate
}

/// Aggregate analysis for flows with a path of at most two queues.
///
/// Built to avoid introducing unnecessary dependencies: competing traffic is
/// characterized at its first queue, where flow arrivals are still mutually
/// independent, and only then pushed through output bounds toward the shared
/// second queue.
pub(crate) fn aggregate_two_hop(net: &Network, flow_id: FlowId) -> f64 {
    let flow = net.flow(flow_id).expect("analysis target is live");
    match flow.queues.len() {
        1 => one_hop(net, flow),
        2 => two_hop(net, flow),
        n => unreachable!("aggregate-two-hop analysis supports at most 2 hops, flow has {n}"),
    }
}

fn one_hop(net: &Network, flow: &Flow) -> f64 {
    let queue = net.queue(flow.queues[0]).expect("path queue is live");
    let mut arena = Arena::new();
    // Competing arrivals at the flow's only queue.
    let mut arrivals = Vec::new();
    for fi in &queue.flows {
        let f = net.flow(fi.flow).expect("queue flow set is consistent");
        if f.priority <= flow.priority && f.id != flow.id {
            arrivals.push(arena.arrival(&f.arrival, &f.deps));
        }
    }
    let mut service = arena.constant_service(queue.bandwidth);
    if !arrivals.is_empty() {
        let aggregate = aggregate_arrivals(&mut arena, &arrivals);
        service = arena.leftover(aggregate, service);
    }
    let arrival = arena.arrival(&flow.arrival, &flow.deps);
    let sink = arena.latency_bound(arrival, service, flow.epsilon / flow.queues.len() as f64);
    arena.latency(sink)
}

fn two_hop(net: &Network, flow: &Flow) -> f64 {
    let first_queue_id = flow.queues[0];
    let second_queue_id = flow.queues[1];
    let second_queue = net.queue(second_queue_id).expect("path queue is live");
    // Upstream queues feeding the shared second queue, each mapped to the
    // worst (highest-valued) priority among its competing flows.
    let mut first_queue_ids: BTreeMap<QueueId, u32> = BTreeMap::new();
    for fi in &second_queue.flows {
        if fi.index != 1 {
            continue;
        }
        let f = net.flow(fi.flow).expect("queue flow set is consistent");
        if f.priority <= flow.priority {
            let worst = first_queue_ids.entry(f.queues[0]).or_insert(f.priority);
            if f.priority > *worst {
                *worst = f.priority;
            }
        }
    }
    let mut arena = Arena::new();
    let mut first_queue_service = None;
    let mut aggregate_shared = None;
    let mut second_queue_arrivals = Vec::new();
    for (&queue_id, &worst_priority) in &first_queue_ids {
        let queue = net.queue(queue_id).expect("upstream queue is live");
        // Split this queue's contributors into those that continue into the
        // shared second queue and those that leave the picture.
        let mut shared = Vec::new();
        let mut non_shared = Vec::new();
        for fi in &queue.flows {
            if fi.index != 0 {
                continue;
            }
            let f = net.flow(fi.flow).expect("queue flow set is consistent");
            if f.priority <= worst_priority && f.id != flow.id {
                let arrival = arena.arrival(&f.arrival, &f.deps);
                if f.queues.get(1) == Some(&second_queue_id) {
                    shared.push(arrival);
                } else {
                    non_shared.push(arrival);
                }
            }
        }
        let mut service = arena.constant_service(queue.bandwidth);
        if !non_shared.is_empty() {
            let aggregate = aggregate_arrivals(&mut arena, &non_shared);
            service = arena.leftover(aggregate, service);
        }
        if queue_id == first_queue_id {
            first_queue_service = Some(service);
            if !shared.is_empty() {
                aggregate_shared = Some(aggregate_arrivals(&mut arena, &shared));
            }
        } else if !shared.is_empty() {
            // Competing traffic reaches the second queue through its own
            // first queue: bound its departures there.
            let aggregate = aggregate_arrivals(&mut arena, &shared);
            second_queue_arrivals.push(arena.output(aggregate, service));
        }
    }
    let first_queue_service =
        first_queue_service.expect("target flow contributes to its own first queue");
    let mut second_queue_service = arena.constant_service(second_queue.bandwidth);
    if !second_queue_arrivals.is_empty() {
        let aggregate = aggregate_arrivals(&mut arena, &second_queue_arrivals);
        second_queue_service = arena.leftover(aggregate, second_queue_service);
    }
    let mut service = arena.convolution(first_queue_service, second_queue_service);
    if let Some(shared) = aggregate_shared {
        service = arena.leftover(shared, service);
    }
    let arrival = arena.arrival(&flow.arrival, &flow.deps);
    let sink = arena.latency_bound(arrival, service, flow.epsilon);
    let latency = arena.dependency_optimization(sink);
    trace!(flow = %flow.name, latency, "two-hop aggregate analysis");
    latency
}

/// Flows competing with `target`, sorted into analysis order, with the target
/// itself last. With no target, every flow in the graph, sorted.
fn sorted_flows<'net>(net: &'net Network, target: Option<&'net Flow>) -> Vec<&'net Flow> {
    let mut sorted: Vec<&Flow> = net
        .flows()
        .filter(|f| match target {
            None => true,
            Some(t) => f.priority <= t.priority && f.id != t.id,
        })
        .collect();
    sorted.sort_by(|a, b| priority_compare(a, b));
    if let Some(t) = target {
        sorted.push(t);
    }
    sorted
}

/// Hop-by-hop analysis: bound the flow separately at each queue along its
/// path, splitting its epsilon budget evenly across hops.
///
/// Walks flows in priority order, maintaining each queue's leftover service
/// and each flow's output bound from hop to hop.
pub(crate) fn hop_by_hop(net: &Network, target: Option<FlowId>) -> Vec<(FlowId, f64)> {
    let target_flow = target.map(|id| net.flow(id).expect("analysis target is live"));
    let mut arena = Arena::new();
    let mut leftover: BTreeMap<QueueId, NodeId> = BTreeMap::new();
    for queue in net.queues() {
        leftover.insert(queue.id, arena.constant_service(queue.bandwidth));
    }
    let mut results = Vec::new();
    for f in sorted_flows(net, target_flow) {
        let compute = target.is_none() || target == Some(f.id);
        let mut latency = 0.0;
        let mut arrival = arena.arrival(&f.arrival, &f.deps);
        for &queue_id in &f.queues {
            let service = leftover[&queue_id];
            if compute {
                let sink =
                    arena.latency_bound(arrival, service, f.epsilon / f.queues.len() as f64);
                latency += arena.dependency_optimization(sink);
            }
            leftover.insert(queue_id, arena.leftover(arrival, service));
            arrival = arena.output(arrival, service);
        }
        if compute {
            results.push((f.id, latency));
        }
    }
    results
}

/// Convolution analysis: convolute the leftover service of every queue on the
/// flow's path and bound the flow once against the combined service, spending
/// the full epsilon budget.
pub(crate) fn convolution(net: &Network, target: Option<FlowId>) -> Vec<(FlowId, f64)> {
    let target_flow = target.map(|id| net.flow(id).expect("analysis target is live"));
    let mut arena = Arena::new();
    let mut leftover: BTreeMap<QueueId, NodeId> = BTreeMap::new();
    for queue in net.queues() {
        leftover.insert(queue.id, arena.constant_service(queue.bandwidth));
    }
    let mut results = Vec::new();
    for f in sorted_flows(net, target_flow) {
        let compute = target.is_none() || target == Some(f.id);
        let mut convoluted = leftover[&f.queues[0]];
        for &queue_id in &f.queues[1..] {
            convoluted = arena.convolution(convoluted, leftover[&queue_id]);
        }
        let mut arrival = arena.arrival(&f.arrival, &f.deps);
        if compute {
            let sink = arena.latency_bound(arrival, convoluted, f.epsilon);
            results.push((f.id, arena.dependency_optimization(sink)));
        }
        for &queue_id in &f.queues {
            let service = leftover[&queue_id];
            leftover.insert(queue_id, arena.leftover(arrival, service));
            arrival = arena.output(arrival, service);
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ClientConfig, FlowConfig, QueueConfig};
    use crate::snc::mgf::Mgf;
    use crate::snc::mmbp::MmbpArrival;
    use crate::snc::{Algorithm, STEP_SIZE};
    use crate::trace::ProcessedEntry;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10 * a.abs().max(b.abs()).max(1.0)
    }

    fn deterministic_arrival(work: f64, p: f64) -> MmbpArrival {
        let mut mgf = Mgf::deterministic();
        mgf.add_sample(&ProcessedEntry {
            arrival_ns: 0,
            work,
            is_get: true,
        });
        mgf.set_prob_request(p);
        MmbpArrival::from_parts(vec![vec![1.0]], vec![mgf]).expect("one-state model")
    }

    fn flow_config(name: &str, queues: &[&str], priority: u32) -> FlowConfig {
        FlowConfig {
            name: Some(name.to_string()),
            queues: Some(queues.iter().map(|q| q.to_string()).collect()),
            arrival_info: Some(deterministic_arrival(0.1, STEP_SIZE)),
            priority: Some(priority),
            ..FlowConfig::default()
        }
    }

    /// Three queues of bandwidth 1; F1/F2 over [Q1, Q2], F3/F4 over
    /// [Q3, Q2], explicit priorities 1..4, two clients of two flows each so
    /// every flow gets epsilon 0.0005.
    fn test_network(algorithm: Algorithm) -> Network {
        let mut net = Network::new(algorithm);
        for name in ["Q1", "Q2", "Q3"] {
            net.add_queue(&QueueConfig {
                name: Some(name.to_string()),
                bandwidth: Some(1.0),
            });
        }
        net.add_client(&ClientConfig {
            name: Some("C1".to_string()),
            slo: Some(1.0),
            slo_percentile: Some(99.9),
            flows: Some(vec![
                flow_config("F1", &["Q1", "Q2"], 1),
                flow_config("F2", &["Q1", "Q2"], 2),
            ]),
            dependencies: None,
        });
        net.add_client(&ClientConfig {
            name: Some("C2".to_string()),
            slo: Some(1.0),
            slo_percentile: Some(99.9),
            flows: Some(vec![
                flow_config("F3", &["Q3", "Q2"], 3),
                flow_config("F4", &["Q3", "Q2"], 4),
            ]),
            dependencies: None,
        });
        net
    }

    fn flow<'n>(net: &'n Network, name: &str) -> &'n Flow {
        net.flow(net.flow_id_by_name(name)).expect("flow")
    }

    #[test]
    fn test_aggregate_two_hop_matches_reference_dags() {
        let mut net = test_network(Algorithm::AggregateTwoHop);
        let [f1, f2, f3, f4] =
            ["F1", "F2", "F3", "F4"].map(|name| flow(&net, name).clone());

        // F1 sees no competing traffic: plain tandem service.
        {
            let mut arena = Arena::new();
            let s1 = arena.constant_service(1.0);
            let s2 = arena.constant_service(1.0);
            let conv = arena.convolution(s1, s2);
            let arrival = arena.arrival(&f1.arrival, &f1.deps);
            let sink = arena.latency_bound(arrival, conv, f1.epsilon);
            let expected = arena.dependency_optimization(sink);
            assert!(approx_eq(net.calc_flow_latency(f1.id), expected));
        }

        // F2 additionally yields to F1, which shares both queues.
        {
            let mut arena = Arena::new();
            let s1 = arena.constant_service(1.0);
            let s2 = arena.constant_service(1.0);
            let conv = arena.convolution(s1, s2);
            let a1 = arena.arrival(&f1.arrival, &f1.deps);
            let service = arena.leftover(a1, conv);
            let a2 = arena.arrival(&f2.arrival, &f2.deps);
            let sink = arena.latency_bound(a2, service, f2.epsilon);
            let expected = arena.dependency_optimization(sink);
            assert!(approx_eq(net.calc_flow_latency(f2.id), expected));
        }

        // F3's competitors reach Q2 through Q1: their output bound joins the
        // second queue's arrivals.
        {
            let mut arena = Arena::new();
            let s1 = arena.constant_service(1.0);
            let s2 = arena.constant_service(1.0);
            let s3 = arena.constant_service(1.0);
            let a1 = arena.arrival(&f1.arrival, &f1.deps);
            let a2 = arena.arrival(&f2.arrival, &f2.deps);
            let agg = arena.aggregate(a2, a1);
            let output = arena.output(agg, s1);
            let leftover_q2 = arena.leftover(output, s2);
            let service = arena.convolution(s3, leftover_q2);
            let a3 = arena.arrival(&f3.arrival, &f3.deps);
            let sink = arena.latency_bound(a3, service, f3.epsilon);
            let expected = arena.dependency_optimization(sink);
            assert!(approx_eq(net.calc_flow_latency(f3.id), expected));
        }

        // F4 also yields to F3 at its own first queue.
        {
            let mut arena = Arena::new();
            let s1 = arena.constant_service(1.0);
            let s2 = arena.constant_service(1.0);
            let s3 = arena.constant_service(1.0);
            let a1 = arena.arrival(&f1.arrival, &f1.deps);
            let a2 = arena.arrival(&f2.arrival, &f2.deps);
            let agg = arena.aggregate(a2, a1);
            let output = arena.output(agg, s1);
            let leftover_q2 = arena.leftover(output, s2);
            let conv = arena.convolution(s3, leftover_q2);
            let a3 = arena.arrival(&f3.arrival, &f3.deps);
            let service = arena.leftover(a3, conv);
            let a4 = arena.arrival(&f4.arrival, &f4.deps);
            let sink = arena.latency_bound(a4, service, f4.epsilon);
            let expected = arena.dependency_optimization(sink);
            assert!(approx_eq(net.calc_flow_latency(f4.id), expected));
        }
    }

    #[test]
    fn test_hop_by_hop_matches_reference_dags() {
        let mut net = test_network(Algorithm::HopByHop);
        let [f1, f2] = ["F1", "F2"].map(|name| flow(&net, name).clone());

        // F1: plain constant services at both hops, epsilon split per hop.
        {
            let mut arena = Arena::new();
            let s1 = arena.constant_service(1.0);
            let s2 = arena.constant_service(1.0);
            let a1 = arena.arrival(&f1.arrival, &f1.deps);
            let sink_q1 = arena.latency_bound(a1, s1, f1.epsilon / 2.0);
            let expected_q1 = arena.dependency_optimization(sink_q1);
            let a1_q2 = arena.output(a1, s1);
            let sink_q2 = arena.latency_bound(a1_q2, s2, f1.epsilon / 2.0);
            let expected_q2 = arena.dependency_optimization(sink_q2);
            assert!(approx_eq(net.calc_flow_latency(f1.id), expected_q1 + expected_q2));
        }

        // F2: F1 has consumed service at both queues.
        {
            let mut arena = Arena::new();
            let s1 = arena.constant_service(1.0);
            let s2 = arena.constant_service(1.0);
            let a1 = arena.arrival(&f1.arrival, &f1.deps);
            let a2 = arena.arrival(&f2.arrival, &f2.deps);
            let f2_service_q1 = arena.leftover(a1, s1);
            let sink_q1 = arena.latency_bound(a2, f2_service_q1, f2.epsilon / 2.0);
            let expected_q1 = arena.dependency_optimization(sink_q1);
            let a1_q2 = arena.output(a1, s1);
            let f2_service_q2 = arena.leftover(a1_q2, s2);
            let a2_q2 = arena.output(a2, f2_service_q1);
            let sink_q2 = arena.latency_bound(a2_q2, f2_service_q2, f2.epsilon / 2.0);
            let expected_q2 = arena.dependency_optimization(sink_q2);
            assert!(approx_eq(net.calc_flow_latency(f2.id), expected_q1 + expected_q2));
        }
    }

    #[test]
    fn test_convolution_matches_reference_dags() {
        let mut net = test_network(Algorithm::Convolution);
        let [f1, f2] = ["F1", "F2"].map(|name| flow(&net, name).clone());

        // F1: convolution of the untouched constant services.
        {
            let mut arena = Arena::new();
            let s1 = arena.constant_service(1.0);
            let s2 = arena.constant_service(1.0);
            let conv = arena.convolution(s1, s2);
            let a1 = arena.arrival(&f1.arrival, &f1.deps);
            let sink = arena.latency_bound(a1, conv, f1.epsilon);
            let expected = arena.dependency_optimization(sink);
            assert!(approx_eq(net.calc_flow_latency(f1.id), expected));
        }

        // F2: convolution of both queues' leftover services after F1.
        {
            let mut arena = Arena::new();
            let s1 = arena.constant_service(1.0);
            let s2 = arena.constant_service(1.0);
            let a1 = arena.arrival(&f1.arrival, &f1.deps);
            let f2_service_q1 = arena.leftover(a1, s1);
            let a1_q2 = arena.output(a1, s1);
            let f2_service_q2 = arena.leftover(a1_q2, s2);
            let conv = arena.convolution(f2_service_q1, f2_service_q2);
            let a2 = arena.arrival(&f2.arrival, &f2.deps);
            let sink = arena.latency_bound(a2, conv, f2.epsilon);
            let expected = arena.dependency_optimization(sink);
            assert!(approx_eq(net.calc_flow_latency(f2.id), expected));
        }
    }

    #[test]
    fn test_one_hop_aggregate_excludes_lower_priority_traffic() {
        let mut net = Network::new(Algorithm::AggregateTwoHop);
        net.add_queue(&QueueConfig {
            name: Some("Q1".to_string()),
            bandwidth: Some(1.0),
        });
        net.add_client(&ClientConfig {
            name: Some("C1".to_string()),
            slo: Some(1.0),
            slo_percentile: Some(99.9),
            flows: Some(vec![flow_config("F1", &["Q1"], 1)]),
            dependencies: None,
        });
        net.add_client(&ClientConfig {
            name: Some("C2".to_string()),
            slo: Some(1.0),
            slo_percentile: Some(99.9),
            flows: Some(vec![flow_config("F2", &["Q1"], 2)]),
            dependencies: None,
        });
        let f1 = flow(&net, "F1").clone();
        // F1 outranks F2, so its bound is against the raw queue service.
        let mut arena = Arena::new();
        let service = arena.constant_service(1.0);
        let arrival = arena.arrival(&f1.arrival, &f1.deps);
        let sink = arena.latency_bound(arrival, service, f1.epsilon);
        let expected = arena.latency(sink);
        assert!(approx_eq(net.calc_flow_latency(f1.id), expected));
        // F2 must account for F1.
        let f2 = flow(&net, "F2").clone();
        let mut arena = Arena::new();
        let raw = arena.constant_service(1.0);
        let a1 = arena.arrival(&f1.arrival, &f1.deps);
        let service = arena.leftover(a1, raw);
        let a2 = arena.arrival(&f2.arrival, &f2.deps);
        let sink = arena.latency_bound(a2, service, f2.epsilon);
        let expected = arena.latency(sink);
        assert!(approx_eq(net.calc_flow_latency(f2.id), expected));
    }

    #[test]
    fn test_all_flows_form_computes_everything() {
        let net = test_network(Algorithm::HopByHop);
        let results = hop_by_hop(&net, None);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|(_, latency)| *latency > 0.0));
        let results = convolution(&net, None);
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|(_, latency)| *latency > 0.0));
    }
}
