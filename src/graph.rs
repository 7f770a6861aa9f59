//! The flow/queue/client graph the controller admits into.
//!
//! A [`Queue`] is a congestion point with a fixed bandwidth in work units per
//! second (for full-bisection networks this is typically an end-host link). A
//! [`Flow`] is a stream of requests traversing an ordered list of queues,
//! carrying its fitted arrival model. A [`Client`] is an ordered set of flows
//! representing one tenant's end-to-end behavior, with the tenant's SLO
//! attached.
//!
//! All three are created from wire-facing config objects ([`ClientConfig`],
//! [`FlowConfig`], [`QueueConfig`]); the configs keep the JSON field names of
//! the RPC surface and model required fields as `Option` so the admission
//! controller can distinguish a missing argument from an invalid one. The
//! [`Network`] methods assume configs have already passed that validation.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::snc::mmbp::MmbpArrival;
use crate::snc::{analysis, Algorithm};

/// Identifier of a flow. 0 is reserved as invalid.
pub type FlowId = u32;
/// Identifier of a client. 0 is reserved as invalid.
pub type ClientId = u32;
/// Identifier of a queue. 0 is reserved as invalid.
pub type QueueId = u32;

/// The reserved invalid flow id.
pub const INVALID_FLOW_ID: FlowId = 0;
/// The reserved invalid client id.
pub const INVALID_CLIENT_ID: ClientId = 0;
/// The reserved invalid queue id.
pub const INVALID_QUEUE_ID: QueueId = 0;

/// A flow's membership in a queue: which flow, and at which hop of its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FlowIndex {
    /// The traversing flow.
    pub flow: FlowId,
    /// Index of this queue within the flow's path.
    pub index: u32,
}

/// A stream of requests from one source to one destination, traversing one or
/// more queues with unchanged request sizes.
#[derive(Debug, Clone)]
pub struct Flow {
    /// Stable id of the flow.
    pub id: FlowId,
    /// Globally unique name.
    pub name: String,
    /// Owning client.
    pub client: ClientId,
    /// Ordered list of queues visited.
    pub queues: Vec<QueueId>,
    /// Priority; lower values are served first.
    pub priority: u32,
    /// Most recently computed latency bound in seconds.
    pub latency: f64,
    /// Fitted arrival model.
    pub arrival: MmbpArrival,
    /// Flow ids this flow's arrivals depend on; always contains the flow
    /// itself, plus the flows of any declared dependent clients.
    pub deps: BTreeSet<FlowId>,
    /// Tail probability budget for this flow's latency bound.
    pub epsilon: f64,
}

/// A tenant: an ordered sequence of flows with an end-to-end latency SLO.
#[derive(Debug, Clone)]
pub struct Client {
    /// Stable id of the client.
    pub id: ClientId,
    /// Globally unique name.
    pub name: String,
    /// Ordered list of owned flows.
    pub flows: Vec<FlowId>,
    /// Latency objective in seconds.
    pub slo: f64,
    /// Percentile the objective applies to, in (0, 100).
    pub slo_percentile: f64,
    /// Most recently computed end-to-end latency (sum of flow latencies).
    pub latency: f64,
}

/// A congestion point with fixed bandwidth.
#[derive(Debug, Clone)]
pub struct Queue {
    /// Stable id of the queue.
    pub id: QueueId,
    /// Globally unique name.
    pub name: String,
    /// Bandwidth in work units per second.
    pub bandwidth: f64,
    /// Flows traversing this queue, with their hop indices. Unordered.
    pub flows: Vec<FlowIndex>,
}

/// Wire-facing flow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Flow name, globally unique.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Names of the queues the flow visits, in path order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queues: Option<Vec<String>>,
    /// Serialized arrival model fitted from the flow's trace.
    #[serde(rename = "arrivalInfo", default, skip_serializing_if = "Option::is_none")]
    pub arrival_info: Option<MmbpArrival>,
    /// Initial priority; overwritten by the controller's SLO-based
    /// assignment on admission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// Hostname of the enforcer responsible for this flow.
    #[serde(rename = "enforcerAddr", default, skip_serializing_if = "Option::is_none")]
    pub enforcer_addr: Option<String>,
    /// Destination address the enforcer should match.
    #[serde(rename = "dstAddr", default, skip_serializing_if = "Option::is_none")]
    pub dst_addr: Option<String>,
    /// Source address the enforcer should match.
    #[serde(rename = "srcAddr", default, skip_serializing_if = "Option::is_none")]
    pub src_addr: Option<String>,
}

impl FlowConfig {
    /// The enforcer triple, present only when all three addresses are set.
    pub fn enforcer_triple(&self) -> Option<(&str, &str, &str)> {
        match (&self.enforcer_addr, &self.dst_addr, &self.src_addr) {
            (Some(enforcer), Some(dst), Some(src)) => Some((enforcer, dst, src)),
            _ => None,
        }
    }
}

/// Wire-facing client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client name, globally unique.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Latency objective in seconds; must be positive.
    #[serde(rename = "SLO", default, skip_serializing_if = "Option::is_none")]
    pub slo: Option<f64>,
    /// Percentile of the objective, in (0, 100). Defaults to 99.9.
    #[serde(rename = "SLOpercentile", default, skip_serializing_if = "Option::is_none")]
    pub slo_percentile: Option<f64>,
    /// The client's flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flows: Option<Vec<FlowConfig>>,
    /// Names of clients whose traffic this client's traffic depends on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
}

/// Default SLO percentile when a client config omits it.
pub const DEFAULT_SLO_PERCENTILE: f64 = 99.9;

/// Wire-facing queue configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name, globally unique.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Bandwidth in work units per second; must be positive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<f64>,
}

/// Orders flows for analysis: priority ascending, then latency descending
/// (higher-latency flows care more about their priority).
pub(crate) fn priority_compare(f1: &Flow, f2: &Flow) -> std::cmp::Ordering {
    f1.priority
        .cmp(&f2.priority)
        .then_with(|| f2.latency.total_cmp(&f1.latency))
}

/// The process-wide flow/queue/client graph and its latency calculator.
///
/// Ids are handed out from monotone counters and never reused within a
/// process lifetime. Iteration over flows, clients, and queues is in id
/// order, keeping every analysis deterministic.
#[derive(Debug)]
pub struct Network {
    algorithm: Algorithm,
    flow_ids: HashMap<String, FlowId>,
    client_ids: HashMap<String, ClientId>,
    queue_ids: HashMap<String, QueueId>,
    flows: BTreeMap<FlowId, Flow>,
    clients: BTreeMap<ClientId, Client>,
    queues: BTreeMap<QueueId, Queue>,
    next_flow_id: FlowId,
    next_client_id: ClientId,
    next_queue_id: QueueId,
}

impl Network {
    /// An empty graph using `algorithm` for latency analysis.
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            flow_ids: HashMap::new(),
            client_ids: HashMap::new(),
            queue_ids: HashMap::new(),
            flows: BTreeMap::new(),
            clients: BTreeMap::new(),
            queues: BTreeMap::new(),
            next_flow_id: INVALID_FLOW_ID + 1,
            next_client_id: INVALID_CLIENT_ID + 1,
            next_queue_id: INVALID_QUEUE_ID + 1,
        }
    }

    /// The configured analysis algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Adds a client and its flows. The config must already be validated.
    pub fn add_client(&mut self, config: &ClientConfig) -> ClientId {
        let client_id = self.next_client_id;
        self.next_client_id += 1;
        let name = config.name.clone().expect("validated client config: name");
        let slo = config.slo.expect("validated client config: SLO");
        let slo_percentile = config.slo_percentile.unwrap_or(DEFAULT_SLO_PERCENTILE);
        self.client_ids.insert(name.clone(), client_id);
        self.clients.insert(
            client_id,
            Client {
                id: client_id,
                name,
                flows: Vec::new(),
                slo,
                slo_percentile,
                latency: 0.0,
            },
        );
        let flow_configs = config.flows.as_ref().expect("validated client config: flows");
        let epsilon = (1.0 - slo_percentile / 100.0) / flow_configs.len() as f64;
        for flow_config in flow_configs {
            self.init_flow(flow_config, client_id, epsilon);
        }
        client_id
    }

    fn init_flow(&mut self, config: &FlowConfig, client_id: ClientId, epsilon: f64) -> FlowId {
        let flow_id = self.next_flow_id;
        self.next_flow_id += 1;
        let name = config.name.clone().expect("validated flow config: name");
        self.flow_ids.insert(name.clone(), flow_id);
        self.clients
            .get_mut(&client_id)
            .expect("flow's owning client is live")
            .flows
            .push(flow_id);
        let queue_names = config.queues.as_ref().expect("validated flow config: queues");
        let mut queues = Vec::with_capacity(queue_names.len());
        for (index, queue_name) in queue_names.iter().enumerate() {
            let queue_id = self.queue_id_by_name(queue_name);
            queues.push(queue_id);
            self.queues
                .get_mut(&queue_id)
                .expect("validated flow config: live queue")
                .flows
                .push(FlowIndex {
                    flow: flow_id,
                    index: index as u32,
                });
        }
        let arrival = config
            .arrival_info
            .clone()
            .expect("validated flow config: arrivalInfo");
        // The flow's own arrivals trivially depend on themselves.
        let mut deps = BTreeSet::new();
        deps.insert(flow_id);
        self.flows.insert(
            flow_id,
            Flow {
                id: flow_id,
                name,
                client: client_id,
                queues,
                priority: config.priority.unwrap_or(1),
                latency: 0.0,
                arrival,
                deps,
                epsilon,
            },
        );
        flow_id
    }

    /// Adds a queue. The config must already be validated.
    pub fn add_queue(&mut self, config: &QueueConfig) -> QueueId {
        let queue_id = self.next_queue_id;
        self.next_queue_id += 1;
        let name = config.name.clone().expect("validated queue config: name");
        self.queue_ids.insert(name.clone(), queue_id);
        self.queues.insert(
            queue_id,
            Queue {
                id: queue_id,
                name,
                bandwidth: config.bandwidth.expect("validated queue config: bandwidth"),
                flows: Vec::new(),
            },
        );
        queue_id
    }

    /// Removes a client and all its flows, detaching them from their queues.
    pub fn del_client(&mut self, client_id: ClientId) {
        let Some(client) = self.clients.remove(&client_id) else {
            return;
        };
        for flow_id in &client.flows {
            let Some(flow) = self.flows.remove(flow_id) else {
                continue;
            };
            for queue_id in &flow.queues {
                if let Some(queue) = self.queues.get_mut(queue_id) {
                    queue.flows.retain(|fi| fi.flow != flow.id);
                }
            }
            self.flow_ids.remove(&flow.name);
        }
        self.client_ids.remove(&client.name);
    }

    /// Removes a queue. The queue must have no traversing flows.
    pub fn del_queue(&mut self, queue_id: QueueId) {
        let Some(queue) = self.queues.get(&queue_id) else {
            return;
        };
        assert!(queue.flows.is_empty(), "deleting a queue with live flows");
        let name = queue.name.clone();
        self.queues.remove(&queue_id);
        self.queue_ids.remove(&name);
    }

    /// Sets a flow's priority.
    pub fn set_flow_priority(&mut self, flow_id: FlowId, priority: u32) {
        if let Some(flow) = self.flows.get_mut(&flow_id) {
            flow.priority = priority;
        }
    }

    /// Restores a flow's mutable analysis state. Used to roll back a failed
    /// admission.
    pub(crate) fn restore_flow_state(
        &mut self,
        flow_id: FlowId,
        deps: BTreeSet<FlowId>,
        priority: u32,
        latency: f64,
    ) {
        if let Some(flow) = self.flows.get_mut(&flow_id) {
            flow.deps = deps;
            flow.priority = priority;
            flow.latency = latency;
        }
    }

    /// Restores a client's computed latency. Used to roll back a failed
    /// admission.
    pub(crate) fn restore_client_latency(&mut self, client_id: ClientId, latency: f64) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.latency = latency;
        }
    }

    /// Declares a symmetric dependency between two clients' traffic: each
    /// flow of either client adds the other client's flow ids to its
    /// dependency set.
    pub fn add_dependency(&mut self, client1: ClientId, client2: ClientId) {
        let flows1 = self.clients.get(&client1).map(|c| c.flows.clone()).unwrap_or_default();
        let flows2 = self.clients.get(&client2).map(|c| c.flows.clone()).unwrap_or_default();
        for flow_id in &flows1 {
            if let Some(flow) = self.flows.get_mut(flow_id) {
                flow.deps.extend(flows2.iter().copied());
            }
        }
        for flow_id in &flows2 {
            if let Some(flow) = self.flows.get_mut(flow_id) {
                flow.deps.extend(flows1.iter().copied());
            }
        }
    }

    /// Looks up a flow.
    pub fn flow(&self, flow_id: FlowId) -> Option<&Flow> {
        self.flows.get(&flow_id)
    }

    /// Looks up a client.
    pub fn client(&self, client_id: ClientId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    /// Looks up a queue.
    pub fn queue(&self, queue_id: QueueId) -> Option<&Queue> {
        self.queues.get(&queue_id)
    }

    /// Resolves a flow name, returning [`INVALID_FLOW_ID`] if unknown.
    pub fn flow_id_by_name(&self, name: &str) -> FlowId {
        self.flow_ids.get(name).copied().unwrap_or(INVALID_FLOW_ID)
    }

    /// Resolves a client name, returning [`INVALID_CLIENT_ID`] if unknown.
    pub fn client_id_by_name(&self, name: &str) -> ClientId {
        self.client_ids
            .get(name)
            .copied()
            .unwrap_or(INVALID_CLIENT_ID)
    }

    /// Resolves a queue name, returning [`INVALID_QUEUE_ID`] if unknown.
    pub fn queue_id_by_name(&self, name: &str) -> QueueId {
        self.queue_ids
            .get(name)
            .copied()
            .unwrap_or(INVALID_QUEUE_ID)
    }

    /// Iterates flows in id order.
    pub fn flows(&self) -> impl Iterator<Item = &Flow> {
        self.flows.values()
    }

    /// Iterates clients in id order.
    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    /// Iterates queues in id order.
    pub fn queues(&self) -> impl Iterator<Item = &Queue> {
        self.queues.values()
    }

    /// Number of live flows.
    pub fn flow_count(&self) -> usize {
        self.flows.len()
    }

    /// Number of live clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Number of live queues.
    pub fn queue_count(&self) -> usize {
        self.queues.len()
    }

    /// Computes and stores one flow's latency bound. Assumes priorities are
    /// already assigned.
    pub fn calc_flow_latency(&mut self, flow_id: FlowId) -> f64 {
        let computed = match self.algorithm {
            Algorithm::AggregateTwoHop => {
                vec![(flow_id, analysis::aggregate_two_hop(self, flow_id))]
            }
            Algorithm::HopByHop => analysis::hop_by_hop(self, Some(flow_id)),
            Algorithm::Convolution => analysis::convolution(self, Some(flow_id)),
        };
        let mut result = 0.0;
        for (id, latency) in computed {
            if let Some(flow) = self.flows.get_mut(&id) {
                flow.latency = latency;
            }
            if id == flow_id {
                result = latency;
            }
        }
        result
    }

    /// Computes and stores a client's end-to-end latency: the sum of its flow
    /// latencies.
    pub fn calc_client_latency(&mut self, client_id: ClientId) -> f64 {
        let flow_ids = self
            .clients
            .get(&client_id)
            .map(|c| c.flows.clone())
            .unwrap_or_default();
        let mut latency = 0.0;
        for flow_id in flow_ids {
            latency += self.calc_flow_latency(flow_id);
        }
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.latency = latency;
        }
        latency
    }

    /// Recomputes latency for every client in the graph.
    pub fn calc_all_latency(&mut self) {
        let client_ids: Vec<ClientId> = self.clients.keys().copied().collect();
        for client_id in client_ids {
            self.calc_client_latency(client_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snc::mgf::Mgf;
    use crate::snc::STEP_SIZE;
    use crate::trace::ProcessedEntry;

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

    fn queue_config(name: &str, bandwidth: f64) -> QueueConfig {
        QueueConfig {
            name: Some(name.to_string()),
            bandwidth: Some(bandwidth),
        }
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

    fn client_config(name: &str, slo: f64, flows: Vec<FlowConfig>) -> ClientConfig {
        ClientConfig {
            name: Some(name.to_string()),
            slo: Some(slo),
            slo_percentile: Some(99.9),
            flows: Some(flows),
            dependencies: None,
        }
    }

    #[test]
    fn test_add_client_wires_queues_and_epsilon() {
        let mut net = Network::new(Algorithm::AggregateTwoHop);
        net.add_queue(&queue_config("Q1", 1.0));
        net.add_queue(&queue_config("Q2", 1.0));
        let client_id = net.add_client(&client_config(
            "C1",
            1.0,
            vec![flow_config("F1", &["Q1", "Q2"], 1), flow_config("F2", &["Q2"], 1)],
        ));
        let client = net.client(client_id).expect("client");
        assert_eq!(client.flows.len(), 2);
        let f1 = net.flow(net.flow_id_by_name("F1")).expect("F1");
        // Per-flow epsilon: (1 - 99.9/100) / 2 flows.
        assert!((f1.epsilon - 0.0005).abs() < 1e-12);
        assert!(f1.deps.contains(&f1.id));
        // Queue flow sets carry (flow, index) pairs.
        let q1 = net.queue(net.queue_id_by_name("Q1")).expect("Q1");
        assert_eq!(q1.flows, vec![FlowIndex { flow: f1.id, index: 0 }]);
        let q2 = net.queue(net.queue_id_by_name("Q2")).expect("Q2");
        assert_eq!(q2.flows.len(), 2);
        assert!(q2.flows.contains(&FlowIndex { flow: f1.id, index: 1 }));
    }

    #[test]
    fn test_queue_flow_set_invariant() {
        let mut net = Network::new(Algorithm::AggregateTwoHop);
        net.add_queue(&queue_config("Q1", 1.0));
        net.add_queue(&queue_config("Q2", 1.0));
        net.add_client(&client_config(
            "C1",
            1.0,
            vec![flow_config("F1", &["Q1", "Q2"], 1)],
        ));
        net.add_client(&client_config("C2", 1.0, vec![flow_config("F2", &["Q2"], 1)]));
        // Every queue holds exactly one entry per flow listing it, at the
        // right index.
        for queue in net.queues() {
            for fi in &queue.flows {
                let flow = net.flow(fi.flow).expect("live flow");
                assert_eq!(flow.queues[fi.index as usize], queue.id);
                assert_eq!(queue.flows.iter().filter(|o| o.flow == fi.flow).count(), 1);
            }
        }
        for flow in net.flows() {
            for (index, queue_id) in flow.queues.iter().enumerate() {
                let queue = net.queue(*queue_id).expect("live queue");
                assert!(queue.flows.contains(&FlowIndex {
                    flow: flow.id,
                    index: index as u32
                }));
            }
        }
    }

    #[test]
    fn test_del_client_detaches_flows_but_keeps_id_counters() {
        let mut net = Network::new(Algorithm::AggregateTwoHop);
        net.add_queue(&queue_config("Q1", 1.0));
        let c1 = net.add_client(&client_config(
            "C1",
            1.0,
            vec![flow_config("F1", &["Q1"], 1)],
        ));
        let f1 = net.flow_id_by_name("F1");
        net.del_client(c1);
        assert_eq!(net.flow_id_by_name("F1"), INVALID_FLOW_ID);
        assert_eq!(net.client_id_by_name("C1"), INVALID_CLIENT_ID);
        assert!(net.queue(net.queue_id_by_name("Q1")).expect("Q1").flows.is_empty());
        // Ids never rewind.
        let c2 = net.add_client(&client_config(
            "C1",
            1.0,
            vec![flow_config("F1", &["Q1"], 1)],
        ));
        assert!(c2 > c1);
        assert!(net.flow_id_by_name("F1") > f1);
    }

    #[test]
    fn test_dependencies_are_symmetric() {
        let mut net = Network::new(Algorithm::AggregateTwoHop);
        net.add_queue(&queue_config("Q1", 1.0));
        let c1 = net.add_client(&client_config(
            "C1",
            1.0,
            vec![flow_config("F1", &["Q1"], 1)],
        ));
        let c2 = net.add_client(&client_config(
            "C2",
            1.0,
            vec![flow_config("F2", &["Q1"], 1)],
        ));
        net.add_dependency(c1, c2);
        let f1 = net.flow(net.flow_id_by_name("F1")).expect("F1");
        let f2 = net.flow(net.flow_id_by_name("F2")).expect("F2");
        assert!(f1.deps.contains(&f2.id));
        assert!(f2.deps.contains(&f1.id));
    }

    #[test]
    fn test_priority_compare_orders_by_priority_then_latency() {
        let mut net = Network::new(Algorithm::AggregateTwoHop);
        net.add_queue(&queue_config("Q1", 1.0));
        net.add_client(&client_config(
            "C1",
            1.0,
            vec![flow_config("F1", &["Q1"], 2), flow_config("F2", &["Q1"], 1)],
        ));
        let f1 = net.flow(net.flow_id_by_name("F1")).expect("F1").clone();
        let mut f2 = net.flow(net.flow_id_by_name("F2")).expect("F2").clone();
        assert_eq!(priority_compare(&f2, &f1), std::cmp::Ordering::Less);
        // Same priority: higher latency first.
        f2.priority = 2;
        let mut f1_slow = f1.clone();
        f1_slow.latency = 1.0;
        assert_eq!(priority_compare(&f1_slow, &f2), std::cmp::Ordering::Less);
    }
}
