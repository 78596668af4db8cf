//! kubeweave - Kubernetes cluster assembly with kubeadm

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

use kubeweave::config::ClusterConfig;
use kubeweave::executor::OpenSshExecutor;
use kubeweave::images::{resolve, ManifestInputs};
use kubeweave::pipeline::{Pipeline, RunOptions};

/// kubeweave - assemble Kubernetes clusters with kubeadm over SSH
#[derive(Parser, Debug)]
#[command(name = "kubeweave", version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a cluster, or add the missing hosts to an existing one
    ///
    /// The first master initializes the control plane if none exists. Hosts
    /// that are already cluster members are left untouched.
    Create(CreateArgs),

    /// Print the images the cluster needs
    Images(ImagesArgs),
}

/// Create mode arguments
#[derive(Parser, Debug)]
struct CreateArgs {
    /// Path to the cluster YAML file
    #[arg(short = 'f', long = "filename")]
    config_file: PathBuf,

    /// Directory for the local kubeconfig and an optional kubeadm-config.yaml
    #[arg(long, env = "KUBEWEAVE_WORK_DIR", default_value = "kubeweave")]
    work_dir: PathBuf,

    /// Directory holding `<version>/<arch>/` kube binaries
    #[arg(long, env = "KUBEWEAVE_BINARIES_DIR", default_value = "kubeweave/binaries")]
    binaries_dir: PathBuf,

    /// Do not pre-pull images on hosts
    #[arg(long)]
    skip_pull_images: bool,

    /// DNS manifest applied right after the control plane comes up
    #[arg(long)]
    dns_manifest: Option<PathBuf>,
}

/// Images mode arguments
#[derive(Parser, Debug)]
struct ImagesArgs {
    /// Path to the cluster YAML file
    #[arg(short = 'f', long = "filename")]
    config_file: PathBuf,

    /// Also list images that are disabled for this cluster
    #[arg(long)]
    all: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let fmt_layer = if cli.json {
        fmt::layer().json().boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match cli.command {
        Commands::Create(args) => run_create(args).await,
        Commands::Images(args) => run_images(args),
    }
}

async fn run_create(args: CreateArgs) -> anyhow::Result<()> {
    let config = ClusterConfig::load(&args.config_file)
        .map_err(|e| anyhow::anyhow!("Failed to load {:?}: {}", args.config_file, e))?;

    let options = RunOptions {
        work_dir: args.work_dir,
        binaries_dir: args.binaries_dir,
        skip_pull_images: args.skip_pull_images,
        dns_manifest: args.dns_manifest,
    };
    let pipeline = Pipeline::new(config, Arc::new(OpenSshExecutor::default()), options);
    let report = pipeline.run().await?;

    if report.created {
        println!("Cluster created.");
    } else {
        println!("Cluster already existed; {} host(s) joined.", report.joined.len());
    }
    println!("Kubeconfig: {}", report.kubeconfig.display());
    Ok(())
}

fn run_images(args: ImagesArgs) -> anyhow::Result<()> {
    let config = ClusterConfig::load(&args.config_file)
        .map_err(|e| anyhow::anyhow!("Failed to load {:?}: {}", args.config_file, e))?;

    for image in resolve(&ManifestInputs::from_config(&config))? {
        if image.enabled {
            println!("{}", image.image_name());
        } else if args.all {
            println!("{} (disabled)", image.image_name());
        }
    }
    Ok(())
}
