pub mod shutdown;

/// Writes the readiness file probed by the container runtime.
pub fn signal_ready() {
    std::fs::write("/etc/ready", "ready").expect("Failed to write readiness file");
}

/// Labels identifying pods created by the operator. Together they partition
/// the pod namespace per suite and per test; user pod templates must not set
/// these keys.
pub mod labels {
    use const_format::concatcp;

    const GROUP: &str = "testing.octopus.dev";

    pub const CREATED_BY_OCTOPUS: &str = concatcp!(GROUP, "/created-by-octopus");
    pub const SUITE_NAME: &str = concatcp!(GROUP, "/suite-name");
    pub const DEF_NAME: &str = concatcp!(GROUP, "/def-name");
}

/// Prefix of every testing pod name.
pub const TESTING_POD_PREFIX: &str = "oct-tp";

pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}
