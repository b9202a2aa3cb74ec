use anyhow::{Context, Result};

use super::naming;
use crate::azure::compute::{
    ubuntu_server_16_04, AdminCredentials, ExtensionSpec, OsDiskSource, VirtualMachine, VmSpec,
};
use crate::azure::storage::vhd_uri;
use crate::azure::ArmClient;
use crate::cli::auth;
use crate::cli::RunArgs;

const APACHE_INSTALL_SCRIPT_URI: &str =
    "https://raw.githubusercontent.com/Azure/azure-libraries-for-net/master/Samples/Asset/install_apache.sh";
const APACHE_INSTALL_COMMAND: &str = "bash install_apache.sh";
const DEPROVISION_COMMAND: &str = "sudo waagent -deprovision+user -force";

const VM_SIZE: &str = "Standard_D2a_v4";
const ADDRESS_SPACE: &str = "10.0.0.0/28";
const VHD_CONTAINER: &str = "vhds";
const CAPTURE_CONTAINER: &str = "capturedvhds";
const CAPTURE_VHD_PREFIX: &str = "img";

/// Generated names for one walkthrough
struct RunContext {
    region: String,
    resource_group: String,
    storage_account: String,
    dns_label: String,
    vm1: String,
    vm2: String,
    vm3: String,
    admin_username: String,
    admin_password: String,
}

impl RunContext {
    fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            resource_group: naming::resource_group_name(),
            storage_account: naming::storage_account_name(),
            dns_label: naming::dns_label(),
            vm1: naming::vm_name(1),
            vm2: naming::vm_name(2),
            vm3: naming::vm_name(3),
            admin_username: naming::admin_username(),
            admin_password: naming::admin_password(),
        }
    }
}

pub async fn execute_run(args: RunArgs) -> Result<()> {
    eprintln!("==> Resolving credentials...");
    let creds = auth::resolve_credentials()?;
    let client = ArmClient::new(&creds).await?;
    eprintln!("    Subscription: {}", client.subscription_id());

    let ctx = RunContext::new(&args.region);
    eprintln!("    Region:         {}", ctx.region);
    eprintln!("    Resource group: {}", ctx.resource_group);
    eprintln!("    Storage:        {}", ctx.storage_account);
    eprintln!("    VMs:            {}, {}, {}", ctx.vm1, ctx.vm2, ctx.vm3);

    eprintln!("\n==> Creating resource group: {}", ctx.resource_group);
    client
        .create_resource_group(&ctx.resource_group, &ctx.region)
        .await?;
    eprintln!("    Created");

    let result = walkthrough(&client, &ctx).await;

    // The group goes away in all paths; a failed deletion is reported but
    // never overrides the walkthrough result.
    if args.keep {
        eprintln!("\n==> Keeping resource group: {}", ctx.resource_group);
        eprintln!("    Clean up later with: vmcapture destroy {}", ctx.resource_group);
    } else {
        eprintln!(
            "\n==> Deleting resource group: {} (this may take several minutes)",
            ctx.resource_group
        );
        match client.delete_resource_group(&ctx.resource_group).await {
            Ok(()) => eprintln!("    Deleted"),
            Err(e) => eprintln!("    Failed: {} (manual cleanup may be required)", e),
        }
    }

    result
}

async fn walkthrough(client: &ArmClient, ctx: &RunContext) -> Result<()> {
    // Storage account holding the unmanaged VHDs
    eprintln!("\n==> Creating storage account: {}", ctx.storage_account);
    let storage = client
        .create_storage_account(&ctx.resource_group, &ctx.storage_account, &ctx.region)
        .await?;
    eprintln!("    Created: {}", storage.id);

    //=============================================================
    // Create a Linux VM from a platform image

    eprintln!("\n==> Creating network for {} (with public IP)", ctx.vm1);
    let nic1 = create_network(client, ctx, 1, Some(&ctx.dns_label)).await?;

    eprintln!("\n==> Creating a Linux VM: {}", ctx.vm1);
    let os_disk1 = format!("{}-os", ctx.vm1);
    let os_vhd1 = vhd_uri(&ctx.storage_account, VHD_CONTAINER, &os_disk1);
    let vm1 = client
        .create_vm(
            &ctx.resource_group,
            &ctx.vm1,
            &ctx.region,
            &VmSpec {
                size: VM_SIZE,
                os_disk_name: &os_disk1,
                source: OsDiskSource::PlatformImage {
                    image: ubuntu_server_16_04(),
                    vhd_uri: &os_vhd1,
                },
                admin: Some(AdminCredentials {
                    username: &ctx.admin_username,
                    password: &ctx.admin_password,
                }),
                nic_id: &nic1,
            },
        )
        .await?;
    print_vm(&vm1);

    eprintln!("\n==> Installing Apache via CustomScriptForLinux...");
    client
        .install_extension(
            &ctx.resource_group,
            &ctx.vm1,
            "CustomScriptForLinux",
            &ctx.region,
            &ExtensionSpec {
                publisher: "Microsoft.OSTCExtensions",
                extension_type: "CustomScriptForLinux",
                type_handler_version: "1.4",
                file_uris: &[APACHE_INSTALL_SCRIPT_URI],
                command_to_execute: APACHE_INSTALL_COMMAND,
            },
        )
        .await?;
    eprintln!("    Installed");

    //=============================================================
    // Deprovision the guest agent so the image can be generalized

    eprintln!("\n==> Deprovisioning the guest agent in {}", ctx.vm1);
    let output = client
        .run_command(&ctx.resource_group, &ctx.vm1, &[DEPROVISION_COMMAND])
        .await?;
    let output = output.trim();
    if !output.is_empty() {
        eprintln!("    {}", output);
    }

    //=============================================================
    // Deallocate the virtual machine

    eprintln!("\n==> Deallocating VM: {}", vm1.id);
    client.deallocate_vm(&ctx.resource_group, &ctx.vm1).await?;
    let state = client
        .vm_power_state(&ctx.resource_group, &ctx.vm1)
        .await?;
    eprintln!("    Deallocated; state = {}", state.as_deref().unwrap_or("unknown"));

    //=============================================================
    // Generalize the virtual machine

    eprintln!("\n==> Generalizing VM: {}", vm1.id);
    client.generalize_vm(&ctx.resource_group, &ctx.vm1).await?;
    eprintln!("    Generalized");

    //=============================================================
    // Capture the virtual machine into a generalized image with Apache

    eprintln!("\n==> Capturing VM: {}", vm1.id);
    let image_uri = client
        .capture_vm(
            &ctx.resource_group,
            &ctx.vm1,
            CAPTURE_CONTAINER,
            CAPTURE_VHD_PREFIX,
            true,
        )
        .await?;
    eprintln!("    Captured image: {}", image_uri);

    //=============================================================
    // Create a second Linux VM from the captured generalized image

    eprintln!("\n==> Creating network for {} (no public IP)", ctx.vm2);
    let nic2 = create_network(client, ctx, 2, None).await?;

    eprintln!("\n==> Creating a Linux VM from the captured image: {}", ctx.vm2);
    let os_disk2 = format!("{}-os", ctx.vm2);
    let os_vhd2 = vhd_uri(&ctx.storage_account, VHD_CONTAINER, &os_disk2);
    let vm2 = client
        .create_vm(
            &ctx.resource_group,
            &ctx.vm2,
            &ctx.region,
            &VmSpec {
                size: VM_SIZE,
                os_disk_name: &os_disk2,
                source: OsDiskSource::StoredImage {
                    image_uri: &image_uri,
                    vhd_uri: &os_vhd2,
                },
                admin: Some(AdminCredentials {
                    username: &ctx.admin_username,
                    password: &ctx.admin_password,
                }),
                nic_id: &nic2,
            },
        )
        .await?;
    print_vm(&vm2);

    let specialized_vhd = vm2
        .os_disk_vhd_uri()
        .context("second VM has no unmanaged OS disk VHD")?
        .to_string();

    //=============================================================
    // Delete the second VM. Deallocate is not sufficient: the OS disk only
    // becomes attachable once the VM is gone.

    eprintln!("\n==> Deleting VM: {}", vm2.id);
    client.delete_vm(&ctx.resource_group, &ctx.vm2).await?;
    eprintln!("    Deleted");

    //=============================================================
    // Create a third VM by attaching the specialized disk of the deleted VM.
    // No credentials can be supplied when attaching a specialized disk.

    eprintln!("\n==> Creating network for {} (no public IP)", ctx.vm3);
    let nic3 = create_network(client, ctx, 3, None).await?;

    eprintln!(
        "\n==> Creating a Linux VM by attaching the specialized disk: {}",
        specialized_vhd
    );
    let os_disk3 = format!("{}-os", ctx.vm3);
    let vm3 = client
        .create_vm(
            &ctx.resource_group,
            &ctx.vm3,
            &ctx.region,
            &VmSpec {
                size: VM_SIZE,
                os_disk_name: &os_disk3,
                source: OsDiskSource::SpecializedVhd {
                    vhd_uri: &specialized_vhd,
                },
                admin: None,
                nic_id: &nic3,
            },
        )
        .await?;
    print_vm(&vm3);

    eprintln!("\n==========================================");
    eprintln!("WALKTHROUGH COMPLETE");
    eprintln!("==========================================");

    Ok(())
}

/// Create a virtual network, an optional public IP and a network interface;
/// returns the NIC resource id
async fn create_network(
    client: &ArmClient,
    ctx: &RunContext,
    index: u32,
    dns_label: Option<&str>,
) -> Result<String> {
    let vnet = client
        .create_virtual_network(
            &ctx.resource_group,
            &format!("vnet-{}", index),
            &ctx.region,
            ADDRESS_SPACE,
        )
        .await?;
    eprintln!("    Virtual network: {} ({})", vnet.name, ADDRESS_SPACE);
    let subnet_id = vnet.subnet_id()?.to_string();

    let public_ip_id = match dns_label {
        Some(label) => {
            let pip = client
                .create_public_ip(
                    &ctx.resource_group,
                    &format!("pip-{}", index),
                    &ctx.region,
                    label,
                )
                .await?;
            eprintln!(
                "    Public IP: {} (fqdn: {})",
                pip.name,
                pip.fqdn().unwrap_or("pending")
            );
            Some(pip.id)
        }
        None => None,
    };

    let nic = client
        .create_network_interface(
            &ctx.resource_group,
            &format!("nic-{}", index),
            &ctx.region,
            &subnet_id,
            public_ip_id.as_deref(),
        )
        .await?;
    eprintln!("    Network interface: {}", nic.name);

    Ok(nic.id)
}

fn print_vm(vm: &VirtualMachine) {
    eprintln!("    Created: {}", vm.id);
    eprintln!("      name:  {}", vm.name);
    if let Some(state) = vm.properties.provisioning_state.as_deref() {
        eprintln!("      state: {}", state);
    }
    if let Some(size) = vm
        .properties
        .hardware_profile
        .as_ref()
        .and_then(|h| h.vm_size.as_deref())
    {
        eprintln!("      size:  {}", size);
    }
    if let Some(vhd) = vm.os_disk_vhd_uri() {
        eprintln!("      disk:  {}", vhd);
    }
}
