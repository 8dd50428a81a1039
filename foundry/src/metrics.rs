use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::Error;

/// Counters for the build pipeline and lifecycle operations.
pub struct Metrics {
    registry: Registry,
    pub builds_triggered: IntCounter,
    pub build_outcomes: IntCounterVec,
    pub deploys: IntCounterVec,
    pub teardown_failures: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, Error> {
        let registry = Registry::new_custom(Some("foundry".into()), None)?;

        let builds_triggered = IntCounter::new("builds_triggered_total", "Build jobs submitted")?;
        let build_outcomes = IntCounterVec::new(
            Opts::new("build_outcomes_total", "Terminal states reached by build watchers"),
            &["outcome"],
        )?;
        let deploys = IntCounterVec::new(
            Opts::new("deploys_total", "Deploy reconciliations by result"),
            &["result"],
        )?;
        let teardown_failures = IntCounter::new(
            "teardown_failures_total",
            "Project teardowns that left at least one step failed",
        )?;

        registry.register(Box::new(builds_triggered.clone()))?;
        registry.register(Box::new(build_outcomes.clone()))?;
        registry.register(Box::new(deploys.clone()))?;
        registry.register(Box::new(teardown_failures.clone()))?;

        Ok(Self {
            registry,
            builds_triggered,
            build_outcomes,
            deploys,
            teardown_failures,
        })
    }

    pub fn record_build(&self, outcome: &str) {
        self.build_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_deploy(&self, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.deploys.with_label_values(&[result]).inc();
    }

    /// Text exposition format of every registered counter.
    pub fn render(&self) -> Result<String, Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
