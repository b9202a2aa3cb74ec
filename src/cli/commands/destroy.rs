use anyhow::Result;
use std::io::{self, Write};

use crate::azure::ArmClient;
use crate::cli::auth;
use crate::cli::DestroyArgs;

pub async fn execute_destroy(args: DestroyArgs) -> Result<()> {
    eprintln!("==> Destroying resource group: {}", args.resource_group);

    // Confirmation prompt
    if !args.force {
        eprint!("\nThis will delete every resource in the group. Continue? [y/N] ");
        io::stderr().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Aborted.");
            return Ok(());
        }
    }

    eprintln!("\n==> Resolving credentials...");
    let creds = auth::resolve_credentials()?;
    let client = ArmClient::new(&creds).await?;
    eprintln!("    Subscription: {}", client.subscription_id());

    if !client.resource_group_exists(&args.resource_group).await? {
        eprintln!("\n==> Resource group not found, nothing to do");
        return Ok(());
    }

    eprintln!(
        "\n==> Deleting resource group: {} (this may take several minutes)",
        args.resource_group
    );
    client.delete_resource_group(&args.resource_group).await?;
    eprintln!("    Deleted");

    eprintln!("\n==> Done");

    Ok(())
}
