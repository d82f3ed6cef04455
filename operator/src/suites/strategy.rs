use octopus_types::{ClusterTestSuite, PodPhase, TestResult, TestStatus};

/// Picks the next test to launch. Exactly one strategy is active per suite,
/// selected by `maxRetries`; the scheduler never consults both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Run every test `count` times and record all outcomes.
    /// Active when `maxRetries == 0`.
    Repeat,
    /// Run a test again only while it has neither passed nor an attempt in
    /// flight and attempts remain (`maxRetries + 1` in total).
    /// Active when `maxRetries > 0`.
    Retry,
}

impl Strategy {
    pub fn for_suite(suite: &ClusterTestSuite) -> Strategy {
        if suite.spec.max_retries > 0 {
            Strategy::Retry
        } else {
            Strategy::Repeat
        }
    }

    /// Next candidate among tests that may share the cluster with others.
    pub fn next_concurrent<'a>(&self, suite: &'a ClusterTestSuite) -> Option<&'a TestResult> {
        self.next(suite, |tr| !tr.disabled_concurrency)
    }

    /// Next candidate among tests that must run alone.
    pub fn next_sequential<'a>(&self, suite: &'a ClusterTestSuite) -> Option<&'a TestResult> {
        self.next(suite, |tr| tr.disabled_concurrency)
    }

    fn next<'a>(
        &self,
        suite: &'a ClusterTestSuite,
        matches: impl Fn(&TestResult) -> bool,
    ) -> Option<&'a TestResult> {
        let spec = suite.spec.normalized();
        let results = suite
            .status
            .as_ref()
            .map(|s| s.results.as_slice())
            .unwrap_or_default();
        // Iteration follows the stored results order, so earlier definitions
        // exhaust their executions before later ones start.
        results.iter().find(|tr| {
            if !matches(tr) || tr.status == TestStatus::Skipped {
                return false;
            }
            match self {
                Strategy::Repeat => (tr.executions.len() as i64) < spec.count,
                Strategy::Retry => {
                    if (tr.executions.len() as i64) > spec.max_retries {
                        return false;
                    }
                    !tr.executions.iter().any(|ex| {
                        ex.pod_phase == Some(PodPhase::Succeeded) || ex.in_progress()
                    })
                }
            }
        })
    }
}
