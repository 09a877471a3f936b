//! dbt-quicksight-lineage
//!
//! Command line tool that keeps dbt model metadata and Amazon QuickSight
//! datasets in sync. `update-data-set` pushes declared `meta.quicksight`
//! blocks into a dataset's transform pipelines; `init` pulls a dataset's
//! current structure back into the models' schema.yml files.

mod app;
mod client;
mod dataset;
mod error;
mod manifest;

use crate::app::App;
use crate::client::AwsCliClient;
use crate::manifest::{Manifest, ManifestLoader};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "dbt-quicksight-lineage",
    version,
    about = "Sync dbt model metadata with Amazon QuickSight datasets"
)]
struct Cli {
    /// Log filter, e.g. `info` or `dbt_quicksight_lineage=debug`
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ManifestArgs {
    /// Compiled dbt manifest; defaults to <project-dir>/target/manifest.json
    #[arg(short, long)]
    manifest_path: Option<PathBuf>,

    /// dbt project directory
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,
}

#[derive(Args)]
struct TargetArgs {
    /// The QuickSight dataset to reconcile
    #[arg(long)]
    data_set_id: String,

    /// AWS account id; resolved via STS when omitted
    #[arg(long)]
    aws_account_id: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Pull dataset metadata into the matching models' schema.yml files
    Init {
        #[command(flatten)]
        manifest: ManifestArgs,

        #[command(flatten)]
        target: TargetArgs,

        /// Only consider physical tables reading from this data source
        #[arg(long)]
        data_source_arn: Option<String>,
    },
    /// Push declared model metadata into the dataset
    UpdateDataSet {
        #[command(flatten)]
        manifest: ManifestArgs,

        #[command(flatten)]
        target: TargetArgs,

        /// Print the computed update payload instead of calling the API
        #[arg(long)]
        dry_run: bool,
    },
}

fn load_manifest(args: &ManifestArgs) -> Result<Manifest> {
    let loader = ManifestLoader {
        manifest_path: args.manifest_path.clone(),
        project_dir: Some(args.project_dir.clone()),
    };
    Ok(loader.load()?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let client = AwsCliClient::default();
    match cli.command {
        Command::Init {
            manifest,
            target,
            data_source_arn,
        } => {
            let loaded = load_manifest(&manifest)?;
            let app = App::new(&loaded, &client, target.aws_account_id)?;
            app.init(
                &target.data_set_id,
                data_source_arn.as_deref(),
                Some(&manifest.project_dir),
            )?;
        }
        Command::UpdateDataSet {
            manifest,
            target,
            dry_run,
        } => {
            let loaded = load_manifest(&manifest)?;
            let app = App::new(&loaded, &client, target.aws_account_id)?;
            let (_, input) = app.update_data_set(&target.data_set_id, dry_run)?;
            if dry_run {
                println!("{}", serde_json::to_string_pretty(&input)?);
            }
        }
    }
    Ok(())
}
