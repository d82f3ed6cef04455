use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Api, ResourceExt,
    client::Client,
    runtime::{Controller, controller::Action},
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use octopus_types::{
    ClusterTestSuite, PodPhase, REASON_INITIALIZATION_FAILURE, TestDefinition,
    TestSuiteConditionType,
};
use owo_colors::OwoColorize;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{fetcher, scheduler, status};
use crate::args::ControllerArgs;
use crate::util::{
    Error, POLL_INTERVAL,
    colors::{FG1, FG2},
    patch::patch_suite_status,
};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

/// Entrypoint for the `ClusterTestSuite` controller.
pub async fn run(client: Client, args: ControllerArgs) -> Result<(), Error> {
    println!("{}", "⚙️ Starting ClusterTestSuite controller...".green());

    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone()));

    #[cfg(feature = "metrics")]
    if let Some(port) = args.metrics_port {
        tokio::spawn(crate::util::metrics::run_metrics_server(port));
    }

    // Namespace where the leader election lease lives. This lets us keep the
    // lease RBAC namespaced even though the controller itself is
    // cluster-scoped.
    let lease_namespace = args.lease_namespace.clone();
    // Unique identity per replica (Downward API POD_NAME is ideal).
    // Fallback to hostname if not present.
    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("octopus-suite-controller-{}", uuid::Uuid::new_v4()));
    // The shared lock name across all replicas
    let lease_name = "octopus-suite-controller-lock".to_string();
    // TTL: how long leadership is considered valid without renewal.
    // Renew should happen well before TTL expires.
    let lease_ttl = Duration::from_secs(15);
    let renew_every = Duration::from_secs(5);
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name,
            lease_ttl,
        },
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        octopus_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });
    octopus_common::signal_ready();

    // We run indefinitely; only the leader runs the controller.
    // On leadership loss, we abort the controller and go back to standby.
    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(renew_every);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break Ok(())
            },
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                // If we can't talk to the apiserver / update Lease, assume we are not safe to lead.
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                    eprintln!("aborted controller due to leader election error");
                }
                continue;
            }
        };
        if matches!(lease, LeaseLockResult::Acquired(_)) {
            // We are leader; ensure controller is running
            if controller_task.is_none() {
                println!("{}", "👑 Acquired leadership; starting controller".green());
                let client_for_controller = client.clone();
                let context_for_controller = context.clone();
                let suites: Api<ClusterTestSuite> = Api::all(client_for_controller.clone());
                controller_task = Some(tokio::spawn(async move {
                    println!("{}", "🚀 ClusterTestSuite controller started.".green());
                    Controller::new(suites, Default::default())
                        .owns(Api::<Pod>::all(client_for_controller), Default::default())
                        .run(reconcile, on_error, context_for_controller)
                        .for_each(|_res| async move {})
                        .await;
                }));
            }
        } else if let Some(task) = controller_task.take() {
            // We are NOT leader; ensure controller is stopped
            eprintln!("lost leadership; stopping controller");
            task.abort();
        }
    }
}

/// Context injected with each `reconcile` and `on_error` method invocation.
struct ContextData {
    /// Kubernetes client to make Kubernetes API requests with.
    client: Client,

    /// Status derivations with the wall clock injected.
    status_service: status::StatusService,

    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

impl ContextData {
    pub fn new(client: Client) -> Self {
        #[cfg(feature = "metrics")]
        {
            ContextData {
                client,
                status_service: status::StatusService::new(status::system_now),
                metrics: ControllerMetrics::new("suites"),
            }
        }
        #[cfg(not(feature = "metrics"))]
        {
            ContextData {
                client,
                status_service: status::StatusService::new(status::system_now),
            }
        }
    }
}

/// One reconciliation pass for a suite: initialize it when fresh, otherwise
/// fold the observed pods into the status, try to launch the next test and
/// persist the status once at the end.
async fn reconcile(
    suite: Arc<ClusterTestSuite>,
    context: Arc<ContextData>,
) -> Result<Action, Error> {
    let client: Client = context.client.clone();
    let name = suite.name_any();

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name])
        .inc();

    // Nothing to tear down explicitly; testing pods are owned by the suite
    // and garbage collected with it.
    if suite.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    if suite.is_uninitialized() {
        return initialize(client, &context, &suite).await;
    }

    // A terminal suite is left alone, with one exception: executions whose
    // pod phase is Unknown may still recover, so aggregation keeps running
    // for them (without scheduling anything new).
    if suite.is_finished() && !has_unknown_executions(&suite) {
        #[cfg(feature = "metrics")]
        context
            .metrics
            .outcome_counter
            .with_label_values(&[&name, "finished"])
            .inc();
        return Ok(Action::await_change());
    }

    #[cfg(feature = "metrics")]
    let read_timer = context
        .metrics
        .read_histogram
        .with_label_values(&[&name])
        .start_timer();

    let pods = fetcher::pods_for_suite(client.clone(), &suite).await?;
    let mut new_status = context.status_service.ensure_status_up_to_date(&suite, &pods);

    #[cfg(feature = "metrics")]
    read_timer.observe_duration();

    #[cfg(feature = "metrics")]
    let write_timer = context
        .metrics
        .write_histogram
        .with_label_values(&[&name])
        .start_timer();

    // No further executions once the suite left Running.
    let mut created_pod = false;
    if new_status.current_condition() == TestSuiteConditionType::Running {
        let mut current = (*suite).clone();
        current.status = Some(new_status.clone());
        if let Some((_pod, scheduled_status)) =
            scheduler::try_schedule(client.clone(), &current, &context.status_service).await?
        {
            new_status = scheduled_status;
            created_pod = true;
        }
    }

    let changed = suite.status.as_ref() != Some(&new_status);
    if changed {
        let prev_cond = suite
            .status
            .as_ref()
            .map(|s| s.current_condition())
            .unwrap_or_default();
        let new_cond = new_status.current_condition();
        if prev_cond != new_cond {
            println!(
                "🔧 {}{}{}{}{}",
                name.color(FG2),
                " CONDITION: ".color(FG1),
                prev_cond.color(FG2),
                " → ".color(FG1),
                new_cond.color(FG2),
            );
        }
        patch_suite_status(client, &suite, &new_status).await?;
    }

    #[cfg(feature = "metrics")]
    write_timer.observe_duration();

    #[cfg(feature = "metrics")]
    context
        .metrics
        .outcome_counter
        .with_label_values(&[&name, if created_pod { "scheduled" } else { "polled" }])
        .inc();

    // Requeue immediately while we make progress; otherwise poll for pod
    // phase changes that were not delivered as events.
    if created_pod || changed {
        Ok(Action::requeue(Duration::ZERO))
    } else {
        Ok(Action::requeue(POLL_INTERVAL))
    }
}

/// Resolves the matching definitions and seeds the suite status. User
/// errors (missing definition, bad selector, invalid spec) are recorded on
/// the Error condition with the initialization-failure reason, which keeps
/// the suite uninitialized; a corrected spec or definition plus a status
/// poke converges it later.
async fn initialize(
    client: Client,
    context: &ContextData,
    suite: &ClusterTestSuite,
) -> Result<Action, Error> {
    let name = suite.name_any();
    match resolve_definitions(client.clone(), suite).await {
        Ok(defs) => {
            let new_status = context.status_service.initialize(suite, &defs);
            println!(
                "🔧 {}{}{}",
                name.color(FG2),
                " INITIALIZED: ".color(FG1),
                format!("{} tests", defs.len()).color(FG2),
            );
            patch_suite_status(client, suite, &new_status).await?;
            #[cfg(feature = "metrics")]
            context
                .metrics
                .outcome_counter
                .with_label_values(&[&name, "initialized"])
                .inc();
            Ok(Action::requeue(Duration::ZERO))
        }
        Err(e) if e.is_user_facing() => {
            eprintln!(
                "{}",
                format!("Initialization of suite '{}' failed: {}", name, e).red()
            );
            let mut new_status = suite.status.clone().unwrap_or_default();
            new_status.set_condition(
                TestSuiteConditionType::Error,
                REASON_INITIALIZATION_FAILURE,
                &e.to_string(),
            );
            patch_suite_status(client, suite, &new_status).await?;
            #[cfg(feature = "metrics")]
            context
                .metrics
                .outcome_counter
                .with_label_values(&[&name, "initialization_failed"])
                .inc();
            Ok(Action::await_change())
        }
        Err(e) => Err(e),
    }
}

async fn resolve_definitions(
    client: Client,
    suite: &ClusterTestSuite,
) -> Result<Vec<TestDefinition>, Error> {
    status::validate_spec(&suite.spec)?;
    fetcher::find_matching(client, suite).await
}

fn has_unknown_executions(suite: &ClusterTestSuite) -> bool {
    let Some(status) = suite.status.as_ref() else {
        return false;
    };
    status
        .results
        .iter()
        .flat_map(|tr| tr.executions.iter())
        .any(|ex| ex.pod_phase == Some(PodPhase::Unknown))
}

/// Called whenever reconciliation fails. Logs the error and requeues with a
/// delay; the controller runtime adds its own backoff on repeated failures.
fn on_error(suite: Arc<ClusterTestSuite>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!(
            "Reconciliation error for suite '{}': {:?}",
            suite.name_any(),
            error
        )
        .red()
    );
    Action::requeue(Duration::from_secs(5))
}
