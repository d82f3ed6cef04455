use kube::ResourceExt;
use octopus_common::TESTING_POD_PREFIX;
use octopus_types::{ClusterTestSuite, TestDefinition};

use crate::util::Error;

// Upper bound on kubernetes object names.
const MAX_NAME_LEN: usize = 253;

/// Deterministic testing pod name: `oct-tp-<suite>-<def>-<execution index>`,
/// where the index is the number of executions already recorded for the
/// matching result. Truncation is not permitted; an overlong name is a fatal
/// per-attempt error.
pub fn generate(suite: &ClusterTestSuite, def: &TestDefinition) -> Result<String, Error> {
    let def_name = def.name_any();
    let def_ns = def.namespace().unwrap_or_default();
    let idx = suite.status.as_ref().and_then(|status| {
        status
            .results
            .iter()
            .find(|tr| tr.name == def_name && tr.namespace == def_ns)
            .map(|tr| tr.executions.len())
    });
    let Some(idx) = idx else {
        return Err(Error::UninitializedResult {
            suite: suite.name_any(),
            name: def_name,
            namespace: def_ns,
        });
    };
    let name = format!(
        "{}-{}-{}-{}",
        TESTING_POD_PREFIX,
        suite.name_any(),
        def_name,
        idx
    );
    if name.len() > MAX_NAME_LEN {
        return Err(Error::PodNameTooLong(name));
    }
    Ok(name)
}
