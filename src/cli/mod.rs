pub mod auth;
pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vmcapture")]
#[command(about = "Provision, capture and recreate Azure virtual machines")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full walkthrough: create, capture, recreate, clean up
    Run(RunArgs),
    /// Delete a leftover resource group
    Destroy(DestroyArgs),
}

#[derive(clap::Args)]
pub struct RunArgs {
    /// Azure region to deploy into
    #[arg(long, env = "VMCAPTURE_REGION", default_value = "westus")]
    pub region: String,

    /// Keep the resource group instead of deleting it at the end
    #[arg(long)]
    pub keep: bool,
}

#[derive(clap::Args)]
pub struct DestroyArgs {
    /// Resource group to delete
    pub resource_group: String,

    /// Skip confirmation prompt
    #[arg(long)]
    pub force: bool,
}
