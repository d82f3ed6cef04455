use comfy_table::Table;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::jiff::Timestamp;
use kube::ResourceExt;
use octopus_types::{ClusterTestSuite, TestStatus, TestSuiteStatus};
use std::time::Duration;

pub fn now() -> Time {
    Time(Timestamp::now())
}

/// Flattened view of a suite's status, one row per line of the table.
pub struct SuiteSummary {
    pub name: String,
    pub concurrency: i64,
    pub count: i64,
    pub max_retries: i64,
    pub duration: Option<Duration>,
    pub condition: String,
    pub tests: usize,
    pub in_progress: usize,
    pub successful: usize,
    pub failed: usize,
    pub executions: usize,
    pub failed_test_names: String,
}

impl SuiteSummary {
    pub fn new(suite: &ClusterTestSuite, now: Time) -> SuiteSummary {
        let spec = suite.spec.normalized();
        let empty = TestSuiteStatus::default();
        let status = suite.status.as_ref().unwrap_or(&empty);

        // Wall time of a running suite, total time of a finished one.
        let duration = status.start_time.as_ref().map(|start| {
            let end = status
                .completion_time
                .as_ref()
                .map(|t| t.0)
                .unwrap_or(now.0);
            end.duration_since(start.0).try_into().unwrap_or_default()
        });

        let mut in_progress = 0;
        let mut successful = 0;
        let mut failed = 0;
        let mut failed_names = Vec::new();
        let mut executions = 0;
        for tr in &status.results {
            executions += tr.executions.len();
            match tr.status {
                TestStatus::NotYetScheduled
                | TestStatus::Scheduled
                | TestStatus::Running
                | TestStatus::Unknown => in_progress += 1,
                TestStatus::Failed => {
                    failed += 1;
                    failed_names.push(tr.name.clone());
                }
                TestStatus::Succeeded | TestStatus::Skipped => successful += 1,
            }
        }
        let failed_test_names = if failed_names.is_empty() {
            "-".to_string()
        } else {
            failed_names.join(",")
        };

        SuiteSummary {
            name: suite.name_any(),
            concurrency: spec.concurrency,
            count: spec.count,
            max_retries: spec.max_retries,
            duration,
            condition: status.current_condition().to_string(),
            tests: status.results.len(),
            in_progress,
            successful,
            failed,
            executions,
            failed_test_names,
        }
    }

    /// Table rows in display order. `Count` is only meaningful without
    /// retries; with retries configured the row shows `Max Retries` instead.
    pub fn rows(&self) -> Vec<(String, String)> {
        let mut rows = vec![
            ("Name".to_string(), self.name.clone()),
            ("Concurrency".to_string(), self.concurrency.to_string()),
        ];
        if self.max_retries > 0 {
            rows.push(("Max Retries".to_string(), self.max_retries.to_string()));
        } else {
            rows.push(("Count".to_string(), self.count.to_string()));
        }
        rows.push((
            "Duration".to_string(),
            self.duration
                .map(|d| format!("{:?}", d))
                .unwrap_or_else(|| "-".to_string()),
        ));
        rows.push(("Condition".to_string(), self.condition.clone()));
        rows.push(("Tests".to_string(), self.tests.to_string()));
        rows.push(("In Progress".to_string(), self.in_progress.to_string()));
        rows.push(("Success".to_string(), self.successful.to_string()));
        rows.push(("Failures".to_string(), self.failed.to_string()));
        rows.push(("Executions".to_string(), self.executions.to_string()));
        rows.push(("Failed tests".to_string(), self.failed_test_names.clone()));
        rows
    }

    pub fn render(&self) -> Table {
        let mut table = Table::new();
        table.set_header(vec!["Name", "Value"]);
        for (key, value) in self.rows() {
            table.add_row(vec![key, value]);
        }
        table
    }
}
