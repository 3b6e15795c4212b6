//! Risk analyzer boundary.
//!
//! The analyzer itself is an external collaborator (model service, rule
//! engine). The orchestrator only consumes its verdict; an unreachable
//! analyzer degrades to [`RiskAssessment::unavailable`].

use async_trait::async_trait;

/// Verdict status meaning confirmed high risk.
pub const STATUS_CRITICAL: &str = "CRITICAL";
/// Fallback status when the analyzer could not be reached.
pub const STATUS_UNAVAILABLE: &str = "Unavailable";

/// Input handed to the analyzer for one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskRequest {
    pub agent_id: String,
    /// Workload classification: T1/T2/T3.
    pub workload_tier: String,
    /// Available disk in bytes.
    pub disk_available: u64,
    pub rebalance_signal: bool,
}

/// Analyzer verdict for one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub status: String,
    pub confidence: f64,
    pub prediction: String,
    pub root_cause: String,
}

impl RiskAssessment {
    /// The degraded verdict used when the analyzer cannot be reached.
    pub fn unavailable() -> Self {
        Self {
            status: STATUS_UNAVAILABLE.to_string(),
            confidence: 0.0,
            prediction: String::new(),
            root_cause: String::new(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_CRITICAL)
    }

    pub fn is_unavailable(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_UNAVAILABLE)
    }
}

/// External risk evaluation service.
#[async_trait]
pub trait RiskAnalyzer: Send + Sync {
    async fn analyze(&self, request: &RiskRequest) -> anyhow::Result<RiskAssessment>;
}

/// Analyzer used when no analyzer endpoint is configured. Always reports
/// [`STATUS_UNAVAILABLE`], so migrations only fire on a forced rebalance
/// signal.
pub struct NullAnalyzer;

#[async_trait]
impl RiskAnalyzer for NullAnalyzer {
    async fn analyze(&self, _request: &RiskRequest) -> anyhow::Result<RiskAssessment> {
        Ok(RiskAssessment::unavailable())
    }
}

/// Migration trigger: confirmed high risk, or a forced rebalance signal
/// while the analyzer is down. The second disjunct keeps an operator's
/// signal effective during an analyzer outage.
pub fn should_migrate(assessment: &RiskAssessment, rebalance_signal: bool) -> bool {
    assessment.is_critical() || (rebalance_signal && assessment.is_unavailable())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(status: &str) -> RiskAssessment {
        RiskAssessment {
            status: status.to_string(),
            confidence: 0.9,
            prediction: String::new(),
            root_cause: String::new(),
        }
    }

    #[test]
    fn critical_always_triggers() {
        assert!(should_migrate(&verdict(STATUS_CRITICAL), false));
        assert!(should_migrate(&verdict(STATUS_CRITICAL), true));
    }

    #[test]
    fn status_comparison_ignores_case() {
        assert!(should_migrate(&verdict("Critical"), false));
        assert!(should_migrate(&verdict("critical"), false));
        assert!(should_migrate(&verdict("UNAVAILABLE"), true));
        assert!(!should_migrate(&verdict("unavailable"), false));
    }

    #[test]
    fn forced_signal_triggers_only_when_analyzer_down() {
        // A live analyzer saying HEALTHY overrides a stale signal.
        assert!(!should_migrate(&verdict("HEALTHY"), true));
        // Analyzer down + forced signal still migrates.
        assert!(should_migrate(&RiskAssessment::unavailable(), true));
        // Analyzer down alone does not.
        assert!(!should_migrate(&RiskAssessment::unavailable(), false));
    }

    #[test]
    fn unavailable_fallback_shape() {
        let fallback = RiskAssessment::unavailable();
        assert_eq!(fallback.status, STATUS_UNAVAILABLE);
        assert_eq!(fallback.confidence, 0.0);
    }
}
