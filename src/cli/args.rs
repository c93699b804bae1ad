// file: src/cli/args.rs
// version: 2.0.0
// guid: f6g7h8i9-j0k1-2345-6789-012345fghijk

//! Command line argument definitions
//!
//! Commands take no positional arguments; their settings come from the
//! environment, optionally seeded from `--env-file`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tmos-image-sync")]
#[command(about = "Patch TMOS disk images and keep cloud image catalogs in sync")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "YAML map of environment variables; real environment wins"
    )]
    pub env_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Patch TMOS disk images found in TMOS_IMAGE_DIR
    Patch,

    /// Reconcile COS buckets with the local image tree
    CosSync,

    /// Reconcile VPC custom images with the images uploaded to COS
    VpcSync,

    /// Import the images listed in a published image catalog into VPC
    VpcImport,

    /// Patch, stage through a transient COS instance and import into VPC
    VpcImager,

    /// Reconcile OpenStack Glance images with the local image tree
    GlanceSync,

    /// Publish the COS image inventory
    Inventory,

    /// Build a NoCloud cidata ISO from declarations or defaults
    Cidata,

    /// Run patch and glance-sync every INTERVAL seconds
    Monitor,

    /// List local disk images
    ListImages {
        #[arg(short, long)]
        json: bool,
    },

    /// Check system prerequisites
    CheckPrereqs,
}

impl Commands {
    /// Name used for the command's log span
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Patch => "patch",
            Commands::CosSync => "cos-sync",
            Commands::VpcSync => "vpc-sync",
            Commands::VpcImport => "vpc-import",
            Commands::VpcImager => "vpc-imager",
            Commands::GlanceSync => "glance-sync",
            Commands::Inventory => "inventory",
            Commands::Cidata => "cidata",
            Commands::Monitor => "monitor",
            Commands::ListImages { .. } => "list-images",
            Commands::CheckPrereqs => "check-prereqs",
        }
    }
}
