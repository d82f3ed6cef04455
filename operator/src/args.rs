use clap::{Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the suite controller.
    Controller(ControllerArgs),
    /// Print the CustomResourceDefinition manifests to stdout.
    Crds,
}

#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Namespace holding the leader election lease.
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub lease_namespace: String,

    /// Port serving /metrics, /healthz and /readyz. Disabled when unset.
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,
}
