use anyhow::Result;
use clap::Parser;
use kube::{Client, CustomResourceExt};
use octopus_types::{ClusterTestSuite, TestDefinition};

mod args;
mod suites;
mod util;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    octopus_common::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Controller(args) => {
            let client = Client::try_default().await?;
            suites::reconcile::run(client, args).await?;
            Ok(())
        }
        Commands::Crds => {
            print!("{}", serde_yaml::to_string(&ClusterTestSuite::crd())?);
            println!("---");
            print!("{}", serde_yaml::to_string(&TestDefinition::crd())?);
            Ok(())
        }
    }
}
