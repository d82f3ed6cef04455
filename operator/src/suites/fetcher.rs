use std::collections::HashSet;

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, Resource, ResourceExt, api::ListParams, core::Selector};
use octopus_common::labels;
use octopus_types::{ClusterTestSuite, TestDefinition};

use crate::util::Error;

/// Resolves the suite's selectors to the set of test definitions to run.
///
/// Empty selectors match every definition in every namespace. Otherwise the
/// result is the union of the by-name references and the label expression
/// matches, deduplicated by object uid. A missing named definition and a
/// malformed expression are user-facing errors; they end up in the suite's
/// initialization condition instead of the retry queue.
pub async fn find_matching(
    client: Client,
    suite: &ClusterTestSuite,
) -> Result<Vec<TestDefinition>, Error> {
    let selectors = &suite.spec.selectors;
    if selectors.is_empty() {
        let api: Api<TestDefinition> = Api::all(client);
        return Ok(api.list(&ListParams::default()).await?.items);
    }

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for reference in &selectors.match_names {
        let api: Api<TestDefinition> = Api::namespaced(client.clone(), &reference.namespace);
        match api.get_opt(&reference.name).await? {
            Some(def) => push_unique(&mut out, &mut seen, def),
            None => {
                return Err(Error::MissingDefinition {
                    name: reference.name.clone(),
                    namespace: reference.namespace.clone(),
                });
            }
        }
    }
    for expr in &selectors.match_label_expressions {
        let selector: Selector = expr.parse().map_err(|e| Error::BadSelector {
            selector: expr.clone(),
            reason: format!("{}", e),
        })?;
        let api: Api<TestDefinition> = Api::all(client.clone());
        let list = api
            .list(&ListParams::default().labels_from(&selector))
            .await?;
        for def in list.items {
            push_unique(&mut out, &mut seen, def);
        }
    }
    Ok(out)
}

fn push_unique(out: &mut Vec<TestDefinition>, seen: &mut HashSet<String>, def: TestDefinition) {
    // Fall back to (namespace, name) when the fake apiserver in tests does
    // not assign uids.
    let key = def
        .meta()
        .uid
        .clone()
        .unwrap_or_else(|| format!("{}/{}", def.namespace().unwrap_or_default(), def.name_any()));
    if seen.insert(key) {
        out.push(def);
    }
}

/// Returns the testing pods belonging to the suite, identified solely by the
/// created-by and suite-name labels. Result order is unspecified.
pub async fn pods_for_suite(client: Client, suite: &ClusterTestSuite) -> Result<Vec<Pod>, Error> {
    let api: Api<Pod> = Api::all(client);
    let lp = ListParams::default().labels(&format!(
        "{}=true,{}={}",
        labels::CREATED_BY_OCTOPUS,
        labels::SUITE_NAME,
        suite.name_any()
    ));
    Ok(api.list(&lp).await?.items)
}
