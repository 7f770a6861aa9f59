//! The admission controller.
//!
//! When a set of tenants seeks admission, their latency bounds are computed
//! with the SNC engine and compared against their SLOs, and every
//! already-admitted client that could be affected by the newcomers is
//! re-checked. Only if everyone still meets their SLO does the batch commit;
//! otherwise every newly inserted client is removed again and the graph is
//! back where it started. Committed admissions push each flow's assigned
//! priority to its enforcer.
//!
//! The controller is single-threaded: requests mutate the graph one at a
//! time, in arrival order.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::enforcer::Enforcer;
use crate::graph::{
    ClientConfig, ClientId, FlowConfig, FlowId, FlowIndex, Network, QueueConfig,
    INVALID_CLIENT_ID, INVALID_FLOW_ID, INVALID_QUEUE_ID,
};
use crate::metrics::MeisterMetrics;
use crate::priority::configure_priorities_by_slo;
use crate::rpc::Status;
use crate::snc::Algorithm;

/// Outcome of an add-clients request.
///
/// An infeasible batch is not an error: it reports `admitted = false` with
/// [`Status::Success`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    /// Whether the batch was admitted.
    pub admitted: bool,
    /// Validation status of the request.
    pub status: Status,
}

impl AdmissionDecision {
    fn rejected(status: Status) -> Self {
        Self {
            admitted: false,
            status,
        }
    }
}

/// Admission controller over the flow/queue/client graph.
///
/// Retains each admitted client's original config so a later removal can
/// issue the matching enforcer retractions.
#[derive(Debug)]
pub struct Controller<E: Enforcer> {
    net: Network,
    store: BTreeMap<ClientId, ClientConfig>,
    enforcer: E,
    metrics: MeisterMetrics,
}

impl<E: Enforcer> Controller<E> {
    /// A controller over an empty graph.
    pub fn new(algorithm: Algorithm, enforcer: E) -> Self {
        Self {
            net: Network::new(algorithm),
            store: BTreeMap::new(),
            enforcer,
            metrics: MeisterMetrics::new(),
        }
    }

    /// Read access to the admission graph.
    pub fn network(&self) -> &Network {
        &self.net
    }

    /// The controller's metric set.
    pub fn metrics(&self) -> &MeisterMetrics {
        &self.metrics
    }

    /// Read access to the enforcement sink.
    pub fn enforcer(&self) -> &E {
        &self.enforcer
    }

    /// The retained config of an admitted client, if any.
    pub fn stored_config(&self, client_id: ClientId) -> Option<&ClientConfig> {
        self.store.get(&client_id)
    }

    /// Performs the admission check on a batch of clients and inserts them if
    /// every SLO still holds. Transactional: on any failure the graph is
    /// unchanged.
    pub fn add_clients(&mut self, configs: &[ClientConfig]) -> AdmissionDecision {
        let status = self.check_client_configs(configs);
        if status != Status::Success {
            self.metrics.rejected_batches.inc();
            return AdmissionDecision::rejected(status);
        }
        // Snapshot the analysis state the batch is allowed to disturb, so a
        // failed admission can restore the graph exactly.
        let snapshot = self.snapshot();
        // Insert the batch and retain the raw configs for later removal.
        let mut client_ids = BTreeSet::new();
        for config in configs {
            let client_id = self.net.add_client(config);
            client_ids.insert(client_id);
            self.store.insert(client_id, config.clone());
        }
        // Declared inter-client dependencies, which may reference clients
        // inside or outside the batch.
        for config in configs {
            let status = self.add_dependencies(config);
            if status != Status::Success {
                self.rollback(&client_ids, &snapshot);
                self.metrics.rejected_batches.inc();
                return AdmissionDecision::rejected(status);
            }
        }
        configure_priorities_by_slo(&mut self.net);
        let analysis_start = Instant::now();
        let mut admitted = true;
        // Check the newcomers and collect the flows their admission can
        // affect.
        let mut affected = BTreeSet::new();
        for &client_id in &client_ids {
            let latency = self.net.calc_client_latency(client_id);
            let client = self.net.client(client_id).expect("batch client is live");
            if latency > client.slo {
                info!(
                    client = %client.name,
                    latency,
                    slo = client.slo,
                    "new client cannot meet its SLO"
                );
                admitted = false;
                break;
            }
            let flow_ids = client.flows.clone();
            for flow_id in flow_ids {
                mark_affected_flows(
                    &self.net,
                    &mut affected,
                    FlowIndex {
                        flow: flow_id,
                        index: 0,
                    },
                    0,
                );
            }
        }
        // Re-check every affected client outside the batch.
        if admitted {
            let affected_clients: BTreeSet<ClientId> = affected
                .iter()
                .filter_map(|fi| self.net.flow(fi.flow).map(|f| f.client))
                .collect();
            for client_id in affected_clients {
                if client_ids.contains(&client_id) {
                    continue;
                }
                let latency = self.net.calc_client_latency(client_id);
                let client = self.net.client(client_id).expect("affected client is live");
                if latency > client.slo {
                    info!(
                        client = %client.name,
                        latency,
                        slo = client.slo,
                        "admission would break an existing client's SLO"
                    );
                    admitted = false;
                    break;
                }
            }
        }
        self.metrics
            .analysis_seconds
            .observe(analysis_start.elapsed().as_secs_f64());
        if !admitted {
            self.rollback(&client_ids, &snapshot);
            self.metrics.infeasible_batches.inc();
            return AdmissionDecision {
                admitted: false,
                status: Status::Success,
            };
        }
        // Committed: push priorities for every flow carrying an enforcer
        // triple.
        for config in configs {
            for flow_config in config.flows.as_ref().expect("validated config").iter() {
                let Some((enforcer, dst, src)) = flow_config.enforcer_triple() else {
                    continue;
                };
                let name = flow_config.name.as_deref().expect("validated config");
                let flow_id = self.net.flow_id_by_name(name);
                let priority = self
                    .net
                    .flow(flow_id)
                    .expect("admitted flow is live")
                    .priority;
                self.enforcer.update_client(enforcer, dst, src, priority);
            }
        }
        self.metrics.admitted_clients.inc_by(client_ids.len() as u64);
        self.update_gauges();
        info!(clients = client_ids.len(), "admitted client batch");
        AdmissionDecision {
            admitted: true,
            status: Status::Success,
        }
    }

    /// Removes a client, retracting its enforcer entries.
    pub fn del_client(&mut self, name: &str) -> Status {
        let client_id = self.net.client_id_by_name(name);
        if client_id == INVALID_CLIENT_ID {
            return Status::ClientNameNonexistent;
        }
        let config = self
            .store
            .remove(&client_id)
            .expect("admitted client has a stored config");
        for flow_config in config.flows.as_ref().into_iter().flatten() {
            if let Some((enforcer, dst, src)) = flow_config.enforcer_triple() {
                self.enforcer.remove_client(enforcer, dst, src);
            }
        }
        self.net.del_client(client_id);
        self.metrics.removed_clients.inc();
        self.update_gauges();
        info!(client = name, "removed client");
        Status::Success
    }

    /// Registers a queue.
    pub fn add_queue(&mut self, config: &QueueConfig) -> Status {
        let Some(name) = &config.name else {
            return Status::MissingArgument;
        };
        if self.net.queue_id_by_name(name) != INVALID_QUEUE_ID {
            return Status::QueueNameInUse;
        }
        let Some(bandwidth) = config.bandwidth else {
            return Status::MissingArgument;
        };
        if bandwidth <= 0.0 {
            return Status::InvalidArgument;
        }
        self.net.add_queue(config);
        self.update_gauges();
        Status::Success
    }

    /// Removes a queue. Refused while any flow traverses it.
    pub fn del_queue(&mut self, name: &str) -> Status {
        let queue_id = self.net.queue_id_by_name(name);
        if queue_id == INVALID_QUEUE_ID {
            return Status::QueueNameNonexistent;
        }
        let queue = self.net.queue(queue_id).expect("resolved queue is live");
        if !queue.flows.is_empty() {
            return Status::QueueHasActiveFlows;
        }
        self.net.del_queue(queue_id);
        self.update_gauges();
        Status::Success
    }

    fn check_client_configs(&self, configs: &[ClientConfig]) -> Status {
        let mut client_names = HashSet::new();
        let mut flow_names = HashSet::new();
        for config in configs {
            let status = self.check_client_config(&mut client_names, &mut flow_names, config);
            if status != Status::Success {
                debug!(?status, "rejecting client batch");
                return status;
            }
        }
        Status::Success
    }

    fn check_client_config(
        &self,
        client_names: &mut HashSet<String>,
        flow_names: &mut HashSet<String>,
        config: &ClientConfig,
    ) -> Status {
        let Some(name) = &config.name else {
            return Status::MissingArgument;
        };
        if self.net.client_id_by_name(name) != INVALID_CLIENT_ID {
            return Status::ClientNameInUse;
        }
        if !client_names.insert(name.clone()) {
            return Status::ClientNameInUse;
        }
        let Some(slo) = config.slo else {
            return Status::MissingArgument;
        };
        if slo <= 0.0 {
            return Status::InvalidArgument;
        }
        if let Some(percentile) = config.slo_percentile {
            if !(0.0 < percentile && percentile < 100.0) {
                return Status::InvalidArgument;
            }
        }
        let Some(flows) = &config.flows else {
            return Status::MissingArgument;
        };
        if flows.is_empty() {
            return Status::InvalidArgument;
        }
        for flow in flows {
            let status = self.check_flow_config(flow_names, flow);
            if status != Status::Success {
                return status;
            }
        }
        Status::Success
    }

    fn check_flow_config(&self, flow_names: &mut HashSet<String>, config: &FlowConfig) -> Status {
        let Some(name) = &config.name else {
            return Status::MissingArgument;
        };
        if self.net.flow_id_by_name(name) != INVALID_FLOW_ID {
            return Status::FlowNameInUse;
        }
        if !flow_names.insert(name.clone()) {
            return Status::FlowNameInUse;
        }
        let Some(queues) = &config.queues else {
            return Status::MissingArgument;
        };
        if queues.is_empty() {
            return Status::InvalidArgument;
        }
        // The default analysis only supports paths of up to two queues.
        if self.net.algorithm() == Algorithm::AggregateTwoHop && queues.len() > 2 {
            return Status::InvalidArgument;
        }
        for queue_name in queues {
            if self.net.queue_id_by_name(queue_name) == INVALID_QUEUE_ID {
                return Status::QueueNameNonexistent;
            }
        }
        let Some(arrival) = &config.arrival_info else {
            return Status::MissingArgument;
        };
        if !arrival.is_well_formed() {
            return Status::InvalidArgument;
        }
        Status::Success
    }

    fn add_dependencies(&mut self, config: &ClientConfig) -> Status {
        let Some(dependencies) = &config.dependencies else {
            return Status::Success;
        };
        let name = config.name.as_deref().expect("validated config");
        let client_id = self.net.client_id_by_name(name);
        for dependency in dependencies {
            let other = self.net.client_id_by_name(dependency);
            if other == INVALID_CLIENT_ID {
                return Status::ClientNameNonexistent;
            }
            self.net.add_dependency(client_id, other);
        }
        Status::Success
    }

    fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            flows: self
                .net
                .flows()
                .map(|f| (f.id, f.deps.clone(), f.priority, f.latency))
                .collect(),
            clients: self.net.clients().map(|c| (c.id, c.latency)).collect(),
        }
    }

    fn rollback(&mut self, client_ids: &BTreeSet<ClientId>, snapshot: &GraphSnapshot) {
        for &client_id in client_ids {
            self.store.remove(&client_id);
            self.net.del_client(client_id);
        }
        // Priorities, latencies, and dependency sets of surviving flows were
        // touched while the batch was live; put them back.
        for (flow_id, deps, priority, latency) in &snapshot.flows {
            self.net
                .restore_flow_state(*flow_id, deps.clone(), *priority, *latency);
        }
        for (client_id, latency) in &snapshot.clients {
            self.net.restore_client_latency(*client_id, *latency);
        }
        self.update_gauges();
    }

    fn update_gauges(&self) {
        self.metrics.live_clients.set(self.net.client_count() as i64);
        self.metrics.live_queues.set(self.net.queue_count() as i64);
        self.metrics.live_flows.set(self.net.flow_count() as i64);
    }
}

/// Pre-admission analysis state of every live flow and client.
struct GraphSnapshot {
    flows: Vec<(FlowId, BTreeSet<FlowId>, u32, f64)>,
    clients: Vec<(ClientId, f64)>,
}

/// Transitively marks flows whose latency the admission can change.
///
/// A flow hop is affected when it shares a downstream queue with an affected
/// hop of equal or lower priority; strictly higher-priority flows never see
/// the newcomers.
fn mark_affected_flows(
    net: &Network,
    affected: &mut BTreeSet<FlowIndex>,
    fi: FlowIndex,
    priority: u32,
) {
    let Some(flow) = net.flow(fi.flow) else {
        return;
    };
    if flow.priority < priority {
        return;
    }
    if !affected.insert(fi) {
        return;
    }
    for index in (fi.index as usize)..flow.queues.len() {
        let Some(queue) = net.queue(flow.queues[index]) else {
            continue;
        };
        for &other in &queue.flows {
            mark_affected_flows(net, affected, other, flow.priority);
        }
    }
}
