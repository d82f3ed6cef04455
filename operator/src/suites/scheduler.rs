use k8s_openapi::api::core::v1::Pod;
use kube::{
    Api, Client, ResourceExt,
    api::{ObjectMeta, PostParams, Resource},
};
use octopus_common::labels;
use octopus_types::{ClusterTestSuite, TestDefinition, TestSuiteStatus};
use owo_colors::OwoColorize;

use super::{podname, status::StatusService, strategy::Strategy};
use crate::util::{
    Error,
    colors::{FG1, FG2},
};

/// Attempts to launch the next test of the suite. Returns the created pod
/// and the status recording it, or `None` when the concurrency budget is
/// spent or no test is eligible.
///
/// A test with disabled concurrency is only started while nothing else is in
/// flight, and while such a test runs nothing else is started.
pub async fn try_schedule(
    client: Client,
    suite: &ClusterTestSuite,
    status_service: &StatusService,
) -> Result<Option<(Pod, TestSuiteStatus)>, Error> {
    let spec = suite.spec.normalized();
    let running = suite.executions_in_progress();
    if running.len() as i64 >= spec.concurrency {
        return Ok(None);
    }
    if !running.is_empty() && sequential_in_flight(suite) {
        return Ok(None);
    }

    let strategy = Strategy::for_suite(suite);
    let candidate = match strategy.next_concurrent(suite) {
        Some(tr) => Some(tr),
        None if running.is_empty() => strategy.next_sequential(suite),
        None => None,
    };
    let Some(candidate) = candidate else {
        return Ok(None);
    };

    let api: Api<TestDefinition> = Api::namespaced(client.clone(), &candidate.namespace);
    let def = api
        .get_opt(&candidate.name)
        .await?
        .ok_or_else(|| Error::MissingDefinition {
            name: candidate.name.clone(),
            namespace: candidate.namespace.clone(),
        })?;

    let pod = testing_pod(suite, &def)?;
    let pods: Api<Pod> = Api::namespaced(client, &candidate.namespace);
    let created = pods.create(&PostParams::default(), &pod).await?;

    let current = suite.status.clone().unwrap_or_default();
    let new_status = status_service.mark_as_scheduled(
        &current,
        &candidate.name,
        &candidate.namespace,
        &created.name_any(),
    )?;
    println!(
        "🚀 {}{}{}{}{}",
        suite.name_any().color(FG2),
        " SCHEDULED: ".color(FG1),
        candidate.namespace.color(FG2),
        "/".color(FG1),
        created.name_any().color(FG2),
    );
    Ok(Some((created, new_status)))
}

fn sequential_in_flight(suite: &ClusterTestSuite) -> bool {
    let Some(status) = suite.status.as_ref() else {
        return false;
    };
    status
        .results
        .iter()
        .any(|tr| tr.disabled_concurrency && tr.executions.iter().any(|ex| ex.in_progress()))
}

/// Builds the worker pod for one execution of the definition: the template's
/// spec, labels and annotations, a deterministic name, the identifying
/// labels and a controller reference so suite deletion cascades.
fn testing_pod(suite: &ClusterTestSuite, def: &TestDefinition) -> Result<Pod, Error> {
    let name = podname::generate(suite, def)?;
    let template = &def.spec.template;

    let mut pod_labels = template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();
    pod_labels.insert(labels::CREATED_BY_OCTOPUS.to_string(), "true".to_string());
    pod_labels.insert(labels::SUITE_NAME.to_string(), suite.name_any());
    pod_labels.insert(labels::DEF_NAME.to_string(), def.name_any());

    let mut pod_spec = template.spec.clone().unwrap_or_default();
    pod_spec.restart_policy = Some("Never".to_string());

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: def.namespace(),
            labels: Some(pod_labels),
            annotations: template.metadata.as_ref().and_then(|m| m.annotations.clone()),
            owner_references: suite.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(pod_spec),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
    use octopus_types::{
        PodPhase, TestDefinitionSpec, TestExecution, TestResult, TestSuiteSpec,
    };
    use std::collections::BTreeMap;

    fn suite_with(spec: TestSuiteSpec, results: Vec<TestResult>) -> ClusterTestSuite {
        let mut suite = ClusterTestSuite::default();
        suite.metadata = ObjectMeta {
            name: Some("test-all".to_string()),
            uid: Some("suite-uid".to_string()),
            ..Default::default()
        };
        suite.spec = spec;
        suite.status = Some(TestSuiteStatus {
            results,
            ..Default::default()
        });
        suite
    }

    fn definition(name: &str) -> TestDefinition {
        let mut def = TestDefinition::default();
        def.metadata = ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        };
        def.spec = TestDefinitionSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(BTreeMap::from([(
                        "app".to_string(),
                        "integration".to_string(),
                    )])),
                    annotations: Some(BTreeMap::from([(
                        "sidecar.example.com/inject".to_string(),
                        "false".to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "test".to_string(),
                        image: Some("integration-tests:latest".to_string()),
                        ..Default::default()
                    }],
                    restart_policy: Some("Always".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        };
        def
    }

    fn in_flight_result(name: &str, disabled_concurrency: bool) -> TestResult {
        TestResult {
            name: name.into(),
            namespace: "default".into(),
            disabled_concurrency,
            executions: vec![TestExecution {
                id: format!("{}-0", name),
                pod_phase: Some(PodPhase::Running),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn testing_pod_carries_identifying_labels_and_template() {
        let suite = suite_with(
            Default::default(),
            vec![TestResult {
                name: "test-a".into(),
                namespace: "default".into(),
                ..Default::default()
            }],
        );
        let pod = testing_pod(&suite, &definition("test-a")).unwrap();

        assert_eq!(pod.metadata.name.as_deref(), Some("oct-tp-test-all-test-a-0"));
        assert_eq!(pod.metadata.namespace.as_deref(), Some("default"));
        let pod_labels = pod.metadata.labels.as_ref().unwrap();
        assert_eq!(pod_labels.get(labels::CREATED_BY_OCTOPUS).unwrap(), "true");
        assert_eq!(pod_labels.get(labels::SUITE_NAME).unwrap(), "test-all");
        assert_eq!(pod_labels.get(labels::DEF_NAME).unwrap(), "test-a");
        // Template labels and annotations survive.
        assert_eq!(pod_labels.get("app").unwrap(), "integration");
        assert_eq!(
            pod.metadata
                .annotations
                .as_ref()
                .unwrap()
                .get("sidecar.example.com/inject")
                .unwrap(),
            "false"
        );
        // The template's restart policy is overridden.
        let spec = pod.spec.as_ref().unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.containers[0].image.as_deref(), Some("integration-tests:latest"));
    }

    #[test]
    fn testing_pod_is_owned_by_the_suite() {
        let suite = suite_with(
            Default::default(),
            vec![TestResult {
                name: "test-a".into(),
                namespace: "default".into(),
                ..Default::default()
            }],
        );
        let pod = testing_pod(&suite, &definition("test-a")).unwrap();
        let owners = pod.metadata.owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "ClusterTestSuite");
        assert_eq!(owners[0].name, "test-all");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn sequential_in_flight_detects_exclusive_tests() {
        let suite = suite_with(
            Default::default(),
            vec![
                in_flight_result("test-a", true),
                TestResult {
                    name: "test-b".into(),
                    namespace: "default".into(),
                    ..Default::default()
                },
            ],
        );
        assert!(sequential_in_flight(&suite));

        let suite = suite_with(Default::default(), vec![in_flight_result("test-a", false)]);
        assert!(!sequential_in_flight(&suite));
    }
}
