use super::MANAGER_NAME;
use kube::{
    Api, Client, ResourceExt,
    api::{Patch, PatchParams},
};
use octopus_types::{ClusterTestSuite, TestSuiteStatus};

use crate::util::Error;

/// Persist a new status for the suite, computed as a JSON-Patch diff against
/// the last observed object. The resource version travels with the patch, so
/// a concurrent writer surfaces as a conflict; the caller treats that as a
/// benign retry (the next reconciliation re-reads and reconverges).
pub async fn patch_suite_status(
    client: Client,
    suite: &ClusterTestSuite,
    new_status: &TestSuiteStatus,
) -> Result<ClusterTestSuite, Error> {
    let patch = Patch::Json::<ClusterTestSuite>({
        let mut modified = suite.clone();
        modified.status = Some(new_status.clone());
        json_patch::diff(
            &serde_json::to_value(suite)?,
            &serde_json::to_value(&modified)?,
        )
    });
    let api: Api<ClusterTestSuite> = Api::all(client);
    Ok(api
        .patch_status(&suite.name_any(), &PatchParams::apply(MANAGER_NAME), &patch)
        .await?)
}
