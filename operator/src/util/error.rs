#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Test Definition [name: {name}, namespace: {namespace}] does not exist")]
    MissingDefinition { name: String, namespace: String },

    #[error("Invalid label selector [{selector}]: {reason}")]
    BadSelector { selector: String, reason: String },

    #[error("Invalid suite spec: {0}")]
    InvalidSpec(String),

    #[error(
        "cannot mark test as scheduled [testName: {name}, testNs: {namespace}, podName: {pod_name}]"
    )]
    UnknownResult {
        name: String,
        namespace: String,
        pod_name: String,
    },

    #[error("the suite [{suite}] has no initialized result for test definition [name: {name}, namespace: {namespace}]")]
    UninitializedResult {
        suite: String,
        name: String,
        namespace: String,
    },

    #[error("generated pod name is too long: [{0}]")]
    PodNameTooLong(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Errors a user can fix by correcting the suite or its definitions.
    /// These are surfaced on the suite condition instead of being retried
    /// with backoff.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::MissingDefinition { .. } | Error::BadSelector { .. } | Error::InvalidSpec(_)
        )
    }
}
