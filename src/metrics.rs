//! Prometheus metrics for the admission controller.
//!
//! Counters and gauges work standalone; registering them with a
//! [`Registry`] is only needed for exposition. The controller updates them
//! inline, so they cost an atomic op each.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};

/// Metrics describing admission activity and analysis cost.
#[derive(Clone)]
pub struct MeisterMetrics {
    /// Clients admitted into the graph.
    pub admitted_clients: IntCounter,

    /// Batches rejected for invalid arguments.
    pub rejected_batches: IntCounter,

    /// Batches turned away because an SLO could not be met.
    pub infeasible_batches: IntCounter,

    /// Clients removed via DelClient.
    pub removed_clients: IntCounter,

    /// Wall time spent in latency analysis per admission request.
    pub analysis_seconds: Histogram,

    /// Clients currently in the graph.
    pub live_clients: IntGauge,

    /// Queues currently in the graph.
    pub live_queues: IntGauge,

    /// Flows currently in the graph.
    pub live_flows: IntGauge,
}

impl Default for MeisterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MeisterMetrics {
    /// Creates the metric set with the `sncm` prefix.
    pub fn new() -> Self {
        Self {
            admitted_clients: IntCounter::with_opts(Opts::new(
                "sncm_admitted_clients",
                "Clients admitted into the graph",
            ))
            .expect("metric creation should not fail"),

            rejected_batches: IntCounter::with_opts(Opts::new(
                "sncm_rejected_batches",
                "Admission batches rejected for invalid arguments",
            ))
            .expect("metric creation should not fail"),

            infeasible_batches: IntCounter::with_opts(Opts::new(
                "sncm_infeasible_batches",
                "Admission batches turned away as infeasible",
            ))
            .expect("metric creation should not fail"),

            removed_clients: IntCounter::with_opts(Opts::new(
                "sncm_removed_clients",
                "Clients removed on request",
            ))
            .expect("metric creation should not fail"),

            analysis_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    "sncm_analysis_seconds",
                    "Wall time of latency analysis per admission request",
                )
                .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
            )
            .expect("metric creation should not fail"),

            live_clients: IntGauge::with_opts(Opts::new(
                "sncm_live_clients",
                "Clients currently admitted",
            ))
            .expect("metric creation should not fail"),

            live_queues: IntGauge::with_opts(Opts::new(
                "sncm_live_queues",
                "Queues currently registered",
            ))
            .expect("metric creation should not fail"),

            live_flows: IntGauge::with_opts(Opts::new(
                "sncm_live_flows",
                "Flows currently admitted",
            ))
            .expect("metric creation should not fail"),
        }
    }

    /// Registers every metric with `registry` for scraping.
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.admitted_clients.clone()))?;
        registry.register(Box::new(self.rejected_batches.clone()))?;
        registry.register(Box::new(self.infeasible_batches.clone()))?;
        registry.register(Box::new(self.removed_clients.clone()))?;
        registry.register(Box::new(self.analysis_seconds.clone()))?;
        registry.register(Box::new(self.live_clients.clone()))?;
        registry.register(Box::new(self.live_queues.clone()))?;
        registry.register(Box::new(self.live_flows.clone()))?;
        Ok(())
    }
}

impl std::fmt::Debug for MeisterMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeisterMetrics")
            .field("admitted_clients", &self.admitted_clients.get())
            .field("rejected_batches", &self.rejected_batches.get())
            .field("infeasible_batches", &self.infeasible_batches.get())
            .field("live_clients", &self.live_clients.get())
            .finish()
    }
}
