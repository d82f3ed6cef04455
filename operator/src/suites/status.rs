use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::jiff::Timestamp;
use kube::ResourceExt;
use octopus_common::labels;
use octopus_types::{
    ClusterTestSuite, PodPhase, TestDefinition, TestResult, TestStatus, TestSuiteConditionType,
    TestSuiteSpec, TestSuiteStatus,
};
use owo_colors::OwoColorize;

use crate::util::Error;

/// Injectable time source; tests pass a fixed provider.
pub type NowProvider = fn() -> Time;

pub fn system_now() -> Time {
    Time(Timestamp::now())
}

/// Pure derivations of suite, test and execution status from observed pods.
/// All operations take the suite by reference and return a new status; the
/// single persistence call happens in the reconcile loop.
pub struct StatusService {
    now: NowProvider,
}

impl StatusService {
    pub fn new(now: NowProvider) -> Self {
        StatusService { now }
    }

    /// Seeds the status for a freshly resolved suite. Definition order is
    /// preserved in `results`; no entries are added or removed afterwards.
    pub fn initialize(
        &self,
        suite: &ClusterTestSuite,
        defs: &[TestDefinition],
    ) -> TestSuiteStatus {
        let mut out = suite.status.clone().unwrap_or_default();
        out.start_time = Some((self.now)());
        if defs.is_empty() {
            out.completion_time = Some((self.now)());
            out.set_condition(TestSuiteConditionType::Succeeded, "", "");
            return out;
        }
        out.set_condition(TestSuiteConditionType::Running, "", "");
        out.results = defs
            .iter()
            .map(|def| TestResult {
                name: def.name_any(),
                namespace: def.namespace().unwrap_or_default(),
                status: if def.spec.skip {
                    TestStatus::Skipped
                } else {
                    TestStatus::NotYetScheduled
                },
                executions: Vec::new(),
                disabled_concurrency: def.spec.disable_concurrency,
            })
            .collect();
        out
    }

    /// Folds the observed pods into the suite status: execution phases, test
    /// statuses and the suite condition, in that order. Aggregation is
    /// lossless; pods that match no result are logged and skipped, phases
    /// outside the known set become Unknown.
    pub fn ensure_status_up_to_date(
        &self,
        suite: &ClusterTestSuite,
        pods: &[Pod],
    ) -> TestSuiteStatus {
        let spec = suite.spec.normalized();
        let mut out = suite.status.clone().unwrap_or_default();
        for pod in pods {
            let Some(def_name) = pod.labels().get(labels::DEF_NAME) else {
                eprintln!(
                    "{}",
                    format!(
                        "⚠️ Testing pod '{}' carries no '{}' label; skipping it",
                        pod.name_any(),
                        labels::DEF_NAME
                    )
                    .yellow()
                );
                continue;
            };
            let pod_ns = pod.namespace().unwrap_or_default();
            let Some(result) = out
                .results
                .iter_mut()
                .find(|tr| tr.name == *def_name && tr.namespace == pod_ns)
            else {
                eprintln!(
                    "{}",
                    format!(
                        "⚠️ Testing pod '{}' matches no result [test: {}, namespace: {}]",
                        pod.name_any(),
                        def_name,
                        pod_ns
                    )
                    .yellow()
                );
                continue;
            };
            let pod_name = pod.name_any();
            // A pod created right before a failed status write has no
            // execution yet; record it so scheduling does not repeat it.
            if !result.executions.iter().any(|e| e.id == pod_name) {
                result.executions.push(octopus_types::TestExecution {
                    id: pod_name.clone(),
                    start_time: pod
                        .metadata
                        .creation_timestamp
                        .clone()
                        .or_else(|| Some((self.now)())),
                    ..Default::default()
                });
            }
            let Some(observed) = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .map(|p| p.parse().unwrap_or(PodPhase::Unknown))
            else {
                continue;
            };
            for exec in result.executions.iter_mut().filter(|e| e.id == pod_name) {
                if exec.pod_phase == Some(observed) {
                    continue;
                }
                // Terminal phases never regress; Unknown stays overwritable.
                if exec.pod_phase.is_some_and(|p| p.is_terminal()) {
                    continue;
                }
                exec.pod_phase = Some(observed);
                match observed {
                    PodPhase::Succeeded => {
                        exec.completion_time = Some((self.now)());
                    }
                    PodPhase::Failed => {
                        exec.completion_time = Some((self.now)());
                        let status = pod.status.as_ref();
                        exec.reason = status
                            .and_then(|s| s.reason.clone())
                            .unwrap_or_default();
                        exec.message = status
                            .and_then(|s| s.message.clone())
                            .unwrap_or_default();
                    }
                    _ => {}
                }
            }
        }
        for tr in out.results.iter_mut() {
            tr.status = calculate_test_status(tr, spec.max_retries, spec.count);
        }
        self.adjust_suite_condition(&mut out);
        out
    }

    /// Records a freshly created pod on the matching result.
    pub fn mark_as_scheduled(
        &self,
        status: &TestSuiteStatus,
        test_name: &str,
        test_ns: &str,
        pod_name: &str,
    ) -> Result<TestSuiteStatus, Error> {
        let mut out = status.clone();
        if out.mark_as_scheduled(test_name, test_ns, pod_name, (self.now)()) {
            Ok(out)
        } else {
            Err(Error::UnknownResult {
                name: test_name.to_string(),
                namespace: test_ns.to_string(),
                pod_name: pod_name.to_string(),
            })
        }
    }

    fn adjust_suite_condition(&self, status: &mut TestSuiteStatus) {
        let prev = status.current_condition();
        let mut any_in_progress = false;
        let mut any_failed = false;
        let mut any_unknown = false;
        for tr in &status.results {
            match tr.status {
                TestStatus::NotYetScheduled | TestStatus::Scheduled | TestStatus::Running => {
                    any_in_progress = true;
                }
                TestStatus::Failed => any_failed = true,
                TestStatus::Unknown => any_unknown = true,
                TestStatus::Succeeded | TestStatus::Skipped => {}
            }
        }
        let new_cond = if any_in_progress {
            TestSuiteConditionType::Running
        } else if any_failed {
            TestSuiteConditionType::Failed
        } else if any_unknown {
            TestSuiteConditionType::Error
        } else {
            TestSuiteConditionType::Succeeded
        };
        if new_cond == prev {
            return;
        }
        status.set_condition(new_cond, "", "");
        if matches!(
            new_cond,
            TestSuiteConditionType::Succeeded
                | TestSuiteConditionType::Failed
                | TestSuiteConditionType::Error
        ) {
            status.completion_time = Some((self.now)());
        }
    }
}

/// Derives a test's status from its executions under the active regime.
fn calculate_test_status(tr: &TestResult, max_retries: i64, count: i64) -> TestStatus {
    // A skipped test never ran and never will.
    if tr.status == TestStatus::Skipped {
        return TestStatus::Skipped;
    }
    if tr.executions.is_empty() {
        return TestStatus::NotYetScheduled;
    }

    // An execution without an observed phase is an attempt in flight whose
    // pod has not reported yet.
    let any_in_flight = tr
        .executions
        .iter()
        .any(|ex| ex.pod_phase.is_none() || ex.in_progress());
    let any_unknown = tr
        .executions
        .iter()
        .any(|ex| ex.pod_phase == Some(PodPhase::Unknown));

    if max_retries > 0 {
        if tr
            .executions
            .iter()
            .any(|ex| ex.pod_phase == Some(PodPhase::Succeeded))
        {
            return TestStatus::Succeeded;
        }
        if any_in_flight {
            return TestStatus::Running;
        }
        if (tr.executions.len() as i64) < max_retries + 1 {
            // Attempts remain.
            return TestStatus::Running;
        }
        if any_unknown {
            return TestStatus::Unknown;
        }
        return TestStatus::Failed;
    }

    if (tr.executions.len() as i64) < count {
        return TestStatus::Running;
    }
    if any_in_flight {
        return TestStatus::Running;
    }
    if any_unknown {
        return TestStatus::Unknown;
    }
    if tr
        .executions
        .iter()
        .any(|ex| ex.pod_phase == Some(PodPhase::Failed))
    {
        return TestStatus::Failed;
    }
    TestStatus::Succeeded
}

/// Rejects suite specs the engine cannot run. There is no admission webhook;
/// a rejected spec surfaces as an initialization failure on the condition.
pub fn validate_spec(spec: &TestSuiteSpec) -> Result<(), Error> {
    if spec.concurrency < 0 || spec.count < 0 || spec.max_retries < 0 {
        return Err(Error::InvalidSpec(
            "concurrency, count and maxRetries must not be negative".to_string(),
        ));
    }
    if spec.count > 1 && spec.max_retries > 0 {
        return Err(Error::InvalidSpec(
            "count and maxRetries cannot be used together".to_string(),
        ));
    }
    if let Some(timeout) = spec.suite_timeout.as_deref()
        && let Err(e) = parse_duration::parse(timeout)
    {
        return Err(Error::InvalidSpec(format!(
            "suiteTimeout '{}' is not a valid duration: {}",
            timeout, e
        )));
    }
    Ok(())
}
