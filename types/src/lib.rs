use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// API group of both custom resources.
pub const GROUP: &str = "testing.octopus.dev";

/// Condition reason used when a suite could not be initialized (missing
/// definition, bad selector, invalid spec). A suite carrying this reason is
/// still considered uninitialized so that a later correction can proceed.
pub const REASON_INITIALIZATION_FAILURE: &str = "initializationFailure";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TestsSelector {
    /// Find test definitions by exact name and namespace.
    #[serde(default, rename = "matchNames")]
    pub match_names: Vec<TestDefReference>,
    /// Find test definitions by label selector expressions,
    /// e.g. "component=core,env in (dev, staging)".
    #[serde(default, rename = "matchLabelExpressions")]
    pub match_label_expressions: Vec<String>,
}

impl TestsSelector {
    pub fn is_empty(&self) -> bool {
        self.match_names.is_empty() && self.match_label_expressions.is_empty()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TestDefReference {
    pub name: String,
    pub namespace: String,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "testing.octopus.dev",
    version = "v1alpha1",
    kind = "ClusterTestSuite",
    plural = "clustertestsuites",
    shortname = "cts",
    derive = "PartialEq",
    status = "TestSuiteStatus"
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.startTime\", \"name\": \"STARTED\", \"type\": \"date\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.completionTime\", \"name\": \"COMPLETED\", \"type\": \"date\" }"
)]
pub struct TestSuiteSpec {
    /// How many tests may run at the same time. 0 means unset; treated as 1.
    #[serde(default)]
    pub concurrency: i64,
    /// Which test definitions to execute. Empty selectors execute all of them.
    #[serde(default)]
    pub selectors: TestsSelector,
    /// Running the whole suite must not take longer than this.
    /// Duration string, default "1h". Enforcement is an extension point.
    #[serde(default, rename = "suiteTimeout")]
    pub suite_timeout: Option<String>,
    /// How many times every test is executed. 0 means unset; treated as 1.
    /// Cannot be combined with maxRetries.
    #[serde(default)]
    pub count: i64,
    /// How many times a failed test is retried until one attempt succeeds.
    /// Default 0 - no retries. Cannot be combined with count > 1.
    #[serde(default, rename = "maxRetries")]
    pub max_retries: i64,
}

impl TestSuiteSpec {
    /// Returns the spec with zero concurrency/count replaced by their
    /// defaults. Defaulting happens here rather than in a webhook.
    pub fn normalized(&self) -> TestSuiteSpec {
        let mut out = self.clone();
        if out.concurrency == 0 {
            out.concurrency = 1;
        }
        if out.count == 0 {
            out.count = 1;
        }
        out
    }
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "testing.octopus.dev",
    version = "v1alpha1",
    kind = "TestDefinition",
    plural = "testdefinitions",
    shortname = "td",
    derive = "PartialEq",
    namespaced
)]
#[kube(derive = "Default")]
pub struct TestDefinitionSpec {
    /// Pod template the testing pods are created from.
    pub template: PodTemplateSpec,
    /// Skip this test; on the suite level it is reported as Skipped.
    #[serde(default)]
    pub skip: bool,
    /// The test works on data another test may modify and must run alone.
    #[serde(default, rename = "disableConcurrency")]
    pub disable_concurrency: bool,
    /// The test is interrupted after this duration. No default.
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum TestSuiteConditionType {
    /// The suite has not yet determined the tests to run.
    #[default]
    Uninitialized,
    /// Tests are running.
    Running,
    /// The suite finished because of a configuration problem.
    Error,
    /// The suite finished with failing tests.
    Failed,
    /// All tests passed.
    Succeeded,
}

impl fmt::Display for TestSuiteConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestSuiteConditionType::Uninitialized => "Uninitialized",
            TestSuiteConditionType::Running => "Running",
            TestSuiteConditionType::Error => "Error",
            TestSuiteConditionType::Failed => "Failed",
            TestSuiteConditionType::Succeeded => "Succeeded",
        };
        write!(f, "{}", s)
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum TestStatus {
    #[default]
    NotYetScheduled,
    Scheduled,
    Running,
    Unknown,
    Failed,
    Succeeded,
    Skipped,
}

/// Last observed phase of a testing pod.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }

    pub fn in_progress(&self) -> bool {
        matches!(self, PodPhase::Pending | PodPhase::Running)
    }
}

impl FromStr for PodPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(PodPhase::Pending),
            "Running" => Ok(PodPhase::Running),
            "Succeeded" => Ok(PodPhase::Succeeded),
            "Failed" => Ok(PodPhase::Failed),
            "Unknown" => Ok(PodPhase::Unknown),
            _ => Err(()),
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TestSuiteCondition {
    #[serde(rename = "type")]
    pub type_: TestSuiteConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

/// One attempt of a test, backed by one testing pod.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TestExecution {
    /// ID equals the name of the testing pod.
    pub id: String,
    #[serde(default, rename = "podPhase")]
    pub pod_phase: Option<PodPhase>,
    #[serde(default, rename = "startTime")]
    pub start_time: Option<Time>,
    #[serde(default, rename = "completionTime")]
    pub completion_time: Option<Time>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl TestExecution {
    pub fn in_progress(&self) -> bool {
        self.pod_phase.is_some_and(|p| p.in_progress())
    }
}

/// All executions of a single test definition within a suite.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TestResult {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub status: TestStatus,
    #[serde(default)]
    pub executions: Vec<TestExecution>,
    /// Copied from the definition at initialization; such a test runs only
    /// when nothing else is in flight.
    #[serde(default, rename = "disabledConcurrency")]
    pub disabled_concurrency: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct TestSuiteStatus {
    #[serde(default, rename = "startTime")]
    pub start_time: Option<Time>,
    #[serde(default, rename = "completionTime")]
    pub completion_time: Option<Time>,
    #[serde(default)]
    pub conditions: Vec<TestSuiteCondition>,
    #[serde(default)]
    pub results: Vec<TestResult>,
}

impl TestSuiteStatus {
    /// Sets the given condition to True and every other pre-existing
    /// condition to False with cleared reason and message. At most one
    /// condition is True at any time.
    pub fn set_condition(&mut self, tp: TestSuiteConditionType, reason: &str, message: &str) {
        let mut set = false;
        for cond in self.conditions.iter_mut() {
            if cond.type_ == tp {
                cond.status = ConditionStatus::True;
                cond.reason = reason.to_string();
                cond.message = message.to_string();
                set = true;
            } else {
                cond.status = ConditionStatus::False;
                cond.reason = String::new();
                cond.message = String::new();
            }
        }
        if set {
            return;
        }
        self.conditions.push(TestSuiteCondition {
            type_: tp,
            status: ConditionStatus::True,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }

    pub fn is_condition_set(&self, tp: TestSuiteConditionType) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == tp && c.status == ConditionStatus::True)
    }

    /// The effective state of the suite: the single True condition, or
    /// Uninitialized when no condition is True.
    pub fn current_condition(&self) -> TestSuiteConditionType {
        self.conditions
            .iter()
            .find(|c| c.status == ConditionStatus::True)
            .map(|c| c.type_)
            .unwrap_or(TestSuiteConditionType::Uninitialized)
    }

    /// Appends an execution for the matching result and marks the result as
    /// Scheduled. Returns false when no result matches (name, namespace).
    pub fn mark_as_scheduled(
        &mut self,
        test_name: &str,
        test_ns: &str,
        pod_name: &str,
        now: Time,
    ) -> bool {
        for tr in self.results.iter_mut() {
            if tr.name == test_name && tr.namespace == test_ns {
                tr.status = TestStatus::Scheduled;
                tr.executions.push(TestExecution {
                    id: pod_name.to_string(),
                    start_time: Some(now),
                    ..Default::default()
                });
                return true;
            }
        }
        false
    }
}

impl ClusterTestSuite {
    /// Every execution whose pod is Pending or Running.
    pub fn executions_in_progress(&self) -> Vec<TestExecution> {
        let Some(status) = self.status.as_ref() else {
            return Vec::new();
        };
        status
            .results
            .iter()
            .flat_map(|tr| tr.executions.iter())
            .filter(|ex| ex.in_progress())
            .cloned()
            .collect()
    }

    pub fn is_finished(&self) -> bool {
        let Some(status) = self.status.as_ref() else {
            return false;
        };
        status.is_condition_set(TestSuiteConditionType::Error)
            || status.is_condition_set(TestSuiteConditionType::Failed)
            || status.is_condition_set(TestSuiteConditionType::Succeeded)
    }

    pub fn is_uninitialized(&self) -> bool {
        let Some(status) = self.status.as_ref() else {
            return true;
        };
        if status.conditions.is_empty() {
            return true;
        }
        if status.is_condition_set(TestSuiteConditionType::Uninitialized) {
            return true;
        }
        // An error during initialization keeps the suite uninitialized so a
        // corrected spec or definition can be picked up later.
        status.conditions.iter().any(|cond| {
            cond.type_ == TestSuiteConditionType::Error
                && cond.status == ConditionStatus::True
                && cond.reason == REASON_INITIALIZATION_FAILURE
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::jiff::Timestamp;

    fn time(secs: i64) -> Time {
        Time(Timestamp::from_second(secs).unwrap())
    }

    fn suite_with_status(status: TestSuiteStatus) -> ClusterTestSuite {
        let mut suite = ClusterTestSuite::default();
        suite.status = Some(status);
        suite
    }

    #[test]
    fn set_condition_appends_when_absent() {
        let mut status = TestSuiteStatus::default();
        status.set_condition(TestSuiteConditionType::Running, "", "");
        assert_eq!(status.conditions.len(), 1);
        assert!(status.is_condition_set(TestSuiteConditionType::Running));
    }

    #[test]
    fn set_condition_keeps_at_most_one_true() {
        let mut status = TestSuiteStatus::default();
        status.set_condition(TestSuiteConditionType::Running, "", "");
        status.set_condition(TestSuiteConditionType::Failed, "oops", "test A failed");
        let trues: Vec<_> = status
            .conditions
            .iter()
            .filter(|c| c.status == ConditionStatus::True)
            .collect();
        assert_eq!(trues.len(), 1);
        assert_eq!(trues[0].type_, TestSuiteConditionType::Failed);
        assert_eq!(trues[0].reason, "oops");
        let running = status
            .conditions
            .iter()
            .find(|c| c.type_ == TestSuiteConditionType::Running)
            .unwrap();
        assert_eq!(running.status, ConditionStatus::False);
        assert_eq!(running.reason, "");
        assert_eq!(running.message, "");
    }

    #[test]
    fn set_condition_clears_stale_reason_on_reuse() {
        let mut status = TestSuiteStatus::default();
        status.set_condition(TestSuiteConditionType::Error, "someReason", "boom");
        status.set_condition(TestSuiteConditionType::Running, "", "");
        status.set_condition(TestSuiteConditionType::Error, "", "");
        let err = status
            .conditions
            .iter()
            .find(|c| c.type_ == TestSuiteConditionType::Error)
            .unwrap();
        assert_eq!(err.status, ConditionStatus::True);
        assert_eq!(err.reason, "");
    }

    #[test]
    fn current_condition_defaults_to_uninitialized() {
        let status = TestSuiteStatus::default();
        assert_eq!(
            status.current_condition(),
            TestSuiteConditionType::Uninitialized
        );
    }

    #[test]
    fn uninitialized_when_no_status_or_conditions() {
        assert!(ClusterTestSuite::default().is_uninitialized());
        assert!(suite_with_status(TestSuiteStatus::default()).is_uninitialized());
    }

    #[test]
    fn uninitialized_when_error_on_initialization() {
        let mut status = TestSuiteStatus::default();
        status.set_condition(
            TestSuiteConditionType::Error,
            REASON_INITIALIZATION_FAILURE,
            "Test Definition [name: missing, namespace: default] does not exist",
        );
        let suite = suite_with_status(status);
        assert!(suite.is_uninitialized());
        // An initialization error is also terminal until the user fixes it.
        assert!(suite.is_finished());
    }

    #[test]
    fn initialized_when_running() {
        let mut status = TestSuiteStatus::default();
        status.set_condition(TestSuiteConditionType::Running, "", "");
        let suite = suite_with_status(status);
        assert!(!suite.is_uninitialized());
        assert!(!suite.is_finished());
    }

    #[test]
    fn finished_for_terminal_conditions() {
        for tp in [
            TestSuiteConditionType::Succeeded,
            TestSuiteConditionType::Failed,
            TestSuiteConditionType::Error,
        ] {
            let mut status = TestSuiteStatus::default();
            status.set_condition(tp, "", "");
            assert!(suite_with_status(status).is_finished(), "{:?}", tp);
        }
    }

    #[test]
    fn executions_in_progress_filters_by_phase() {
        let status = TestSuiteStatus {
            results: vec![TestResult {
                name: "test-a".into(),
                namespace: "default".into(),
                executions: vec![
                    TestExecution {
                        id: "pod-0".into(),
                        pod_phase: Some(PodPhase::Succeeded),
                        ..Default::default()
                    },
                    TestExecution {
                        id: "pod-1".into(),
                        pod_phase: Some(PodPhase::Running),
                        ..Default::default()
                    },
                    TestExecution {
                        id: "pod-2".into(),
                        pod_phase: Some(PodPhase::Pending),
                        ..Default::default()
                    },
                    TestExecution {
                        id: "pod-3".into(),
                        pod_phase: None,
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        let in_progress = suite_with_status(status).executions_in_progress();
        let ids: Vec<_> = in_progress.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["pod-1", "pod-2"]);
    }

    #[test]
    fn mark_as_scheduled_appends_one_execution() {
        let mut status = TestSuiteStatus {
            results: vec![TestResult {
                name: "test-a".into(),
                namespace: "default".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let ok = status.mark_as_scheduled("test-a", "default", "oct-tp-s-test-a-0", time(100));
        assert!(ok);
        let tr = &status.results[0];
        assert_eq!(tr.status, TestStatus::Scheduled);
        assert_eq!(tr.executions.len(), 1);
        assert_eq!(tr.executions[0].id, "oct-tp-s-test-a-0");
        assert_eq!(tr.executions[0].start_time, Some(time(100)));
        assert_eq!(tr.executions[0].pod_phase, None);
    }

    #[test]
    fn mark_as_scheduled_requires_matching_result() {
        let mut status = TestSuiteStatus::default();
        assert!(!status.mark_as_scheduled("test-a", "default", "pod", time(0)));
    }

    #[test]
    fn normalized_defaults_concurrency_and_count() {
        let spec = TestSuiteSpec::default().normalized();
        assert_eq!(spec.concurrency, 1);
        assert_eq!(spec.count, 1);

        let spec = TestSuiteSpec {
            concurrency: 5,
            count: 3,
            ..Default::default()
        }
        .normalized();
        assert_eq!(spec.concurrency, 5);
        assert_eq!(spec.count, 3);
    }

    #[test]
    fn pod_phase_parses_known_values_only() {
        assert_eq!("Running".parse(), Ok(PodPhase::Running));
        assert_eq!("Succeeded".parse(), Ok(PodPhase::Succeeded));
        assert!("Evicted".parse::<PodPhase>().is_err());
    }

    #[test]
    fn status_serializes_with_wire_field_names() {
        let mut status = TestSuiteStatus::default();
        status.start_time = Some(time(7));
        status.results.push(TestResult {
            name: "test-a".into(),
            namespace: "default".into(),
            disabled_concurrency: true,
            ..Default::default()
        });
        let value = serde_json::to_value(&status).unwrap();
        assert!(value.get("startTime").is_some());
        assert_eq!(value["results"][0]["disabledConcurrency"], true);
        assert_eq!(value["results"][0]["status"], "NotYetScheduled");
    }
}
