//! Priority assignment by SLO.

use crate::graph::Network;

/// Assigns flow priorities so that the tightest SLO gets the highest
/// priority.
///
/// Clients are sorted by SLO ascending and walked with a dense counter
/// starting at 0: clients with equal SLOs share a priority, and the counter
/// increments whenever the SLO strictly increases. Every flow inherits its
/// client's priority.
pub fn configure_priorities_by_slo(net: &mut Network) {
    let mut clients: Vec<(f64, Vec<u32>)> = net
        .clients()
        .map(|c| (c.slo, c.flows.clone()))
        .collect();
    clients.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut priority = 0;
    let mut current_slo = None;
    for (slo, flow_ids) in clients {
        match current_slo {
            Some(current) if slo > current => {
                priority += 1;
                current_slo = Some(slo);
            }
            None => current_slo = Some(slo),
            _ => {}
        }
        for flow_id in flow_ids {
            net.set_flow_priority(flow_id, priority);
        }
    }
}
