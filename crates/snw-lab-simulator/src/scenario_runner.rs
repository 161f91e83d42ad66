use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use snw_lab_abstract::{SimConfig, TestAssertion, TestScenario};
use tracing::{info, warn};

use crate::session::{DEFAULT_DURATION, DEFAULT_GRACE, Session};
use crate::trace::SimulationReport;

#[derive(Debug)]
pub struct ScenarioOutcome {
    pub report: SimulationReport,
    /// One line per failed assertion.
    pub failures: Vec<String>,
}

impl ScenarioOutcome {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn load_scenario(path: &Path) -> Result<TestScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse scenario file {}", path.display()))
}

/// Run `scenario` on top of `base`, then check its assertions.
pub fn run_scenario(scenario: &TestScenario, base: SimConfig) -> Result<ScenarioOutcome> {
    let mut config = base;
    scenario.config.apply_to(&mut config);
    info!(name = %scenario.name, "running scenario: {}", scenario.description);

    let duration = scenario
        .duration_ms
        .map_or(DEFAULT_DURATION, Duration::from_millis);
    let grace = scenario.grace_ms.map_or(DEFAULT_GRACE, Duration::from_millis);
    let report = Session::new(config)?
        .with_duration(duration)
        .with_grace(grace)
        .run(&scenario.actions)?;

    let failures = check_assertions(&report, &scenario.assertions);
    for failure in &failures {
        warn!(name = %scenario.name, "assertion failed: {failure}");
    }
    Ok(ScenarioOutcome { report, failures })
}

pub fn check_assertions(report: &SimulationReport, assertions: &[TestAssertion]) -> Vec<String> {
    assertions
        .iter()
        .filter_map(|assertion| match assertion {
            TestAssertion::DataDelivered { data } => (!report
                .delivered_data
                .iter()
                .any(|delivered| delivered == data.as_bytes()))
            .then(|| format!("{data:?} was never delivered")),
            TestAssertion::DeliveredCount { count } => (report.delivered_data.len() != *count)
                .then(|| {
                    format!(
                        "expected {count} messages, {} delivered",
                        report.delivered_data.len()
                    )
                }),
            TestAssertion::Terminated => (!(report.sentinel_received && report.terminated))
                .then(|| {
                    format!(
                        "termination incomplete (sentinel received: {}, threads exited: {})",
                        report.sentinel_received, report.terminated
                    )
                }),
            TestAssertion::MaxDuration { ms } => (report.duration_ms > *ms)
                .then(|| format!("took {}ms, limit {ms}ms", report.duration_ms)),
        })
        .collect()
}
