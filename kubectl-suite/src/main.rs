use anyhow::{Context, Result};
use clap::Parser;
use kube::{Api, Client};
use octopus_types::ClusterTestSuite;

mod report;

/// Prints the status of a ClusterTestSuite as a table.
///
/// Cluster access is configured the usual way: KUBECONFIG, ~/.kube/config or
/// the in-cluster service account.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Name of the ClusterTestSuite.
    suite: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let client = Client::try_default()
        .await
        .context("Failed to configure Kubernetes client")?;
    let api: Api<ClusterTestSuite> = Api::all(client);
    let suite = api
        .get(&cli.suite)
        .await
        .with_context(|| format!("Failed to get ClusterTestSuite '{}'", cli.suite))?;

    let summary = report::SuiteSummary::new(&suite, report::now());
    println!("{}", summary.render());
    Ok(())
}
