use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ArmClient;

const API_VERSION: &str = "2023-07-01";

// ============ VM creation ============

/// Platform image coordinates
pub struct ImageReference<'a> {
    pub publisher: &'a str,
    pub offer: &'a str,
    pub sku: &'a str,
    pub version: &'a str,
}

/// Ubuntu Server 16.04 LTS from the platform image repository
pub fn ubuntu_server_16_04() -> ImageReference<'static> {
    ImageReference {
        publisher: "Canonical",
        offer: "UbuntuServer",
        sku: "16.04-LTS",
        version: "latest",
    }
}

/// Where the OS disk of a new VM comes from
pub enum OsDiskSource<'a> {
    /// Provision from a platform image onto a new unmanaged VHD
    PlatformImage {
        image: ImageReference<'a>,
        vhd_uri: &'a str,
    },
    /// Provision from a captured generalized image VHD onto a new unmanaged VHD
    StoredImage {
        image_uri: &'a str,
        vhd_uri: &'a str,
    },
    /// Attach an existing specialized VHD as-is (no re-provisioning, so no
    /// credentials can be supplied)
    SpecializedVhd { vhd_uri: &'a str },
}

pub struct AdminCredentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

pub struct VmSpec<'a> {
    pub size: &'a str,
    pub os_disk_name: &'a str,
    pub source: OsDiskSource<'a>,
    /// Required for image-based creates, forbidden for a specialized attach
    pub admin: Option<AdminCredentials<'a>>,
    pub nic_id: &'a str,
}

#[derive(Serialize)]
struct CreateVmRequest<'a> {
    location: &'a str,
    properties: VmPropertiesRequest<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VmPropertiesRequest<'a> {
    hardware_profile: HardwareProfile<'a>,
    storage_profile: StorageProfileRequest<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    os_profile: Option<OsProfileRequest<'a>>,
    network_profile: NetworkProfileRequest<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HardwareProfile<'a> {
    vm_size: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StorageProfileRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    image_reference: Option<ImageReferenceRequest<'a>>,
    os_disk: OsDiskRequest<'a>,
}

#[derive(Serialize)]
struct ImageReferenceRequest<'a> {
    publisher: &'a str,
    offer: &'a str,
    sku: &'a str,
    version: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OsDiskRequest<'a> {
    name: &'a str,
    create_option: &'static str,
    caching: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    os_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<VhdReference<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vhd: Option<VhdReference<'a>>,
}

#[derive(Serialize)]
struct VhdReference<'a> {
    uri: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OsProfileRequest<'a> {
    computer_name: &'a str,
    admin_username: &'a str,
    admin_password: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NetworkProfileRequest<'a> {
    network_interfaces: Vec<NicReference<'a>>,
}

#[derive(Serialize)]
struct NicReference<'a> {
    id: &'a str,
}

fn vm_request_body(name: &str, location: &str, spec: &VmSpec<'_>) -> Result<Value> {
    let (image_reference, os_disk) = match &spec.source {
        OsDiskSource::PlatformImage { image, vhd_uri } => (
            Some(ImageReferenceRequest {
                publisher: image.publisher,
                offer: image.offer,
                sku: image.sku,
                version: image.version,
            }),
            OsDiskRequest {
                name: spec.os_disk_name,
                create_option: "FromImage",
                caching: "ReadWrite",
                os_type: None,
                image: None,
                vhd: Some(VhdReference { uri: *vhd_uri }),
            },
        ),
        OsDiskSource::StoredImage { image_uri, vhd_uri } => (
            None,
            OsDiskRequest {
                name: spec.os_disk_name,
                create_option: "FromImage",
                caching: "ReadWrite",
                os_type: Some("Linux"),
                image: Some(VhdReference { uri: *image_uri }),
                vhd: Some(VhdReference { uri: *vhd_uri }),
            },
        ),
        OsDiskSource::SpecializedVhd { vhd_uri } => (
            None,
            OsDiskRequest {
                name: spec.os_disk_name,
                create_option: "Attach",
                caching: "ReadWrite",
                os_type: Some("Linux"),
                image: None,
                vhd: Some(VhdReference { uri: *vhd_uri }),
            },
        ),
    };

    if matches!(spec.source, OsDiskSource::SpecializedVhd { .. }) && spec.admin.is_some() {
        bail!("credentials cannot be specified when attaching a specialized disk");
    }

    let body = CreateVmRequest {
        location,
        properties: VmPropertiesRequest {
            hardware_profile: HardwareProfile { vm_size: spec.size },
            storage_profile: StorageProfileRequest {
                image_reference,
                os_disk,
            },
            os_profile: spec.admin.as_ref().map(|admin| OsProfileRequest {
                computer_name: name,
                admin_username: admin.username,
                admin_password: admin.password,
            }),
            network_profile: NetworkProfileRequest {
                network_interfaces: vec![NicReference { id: spec.nic_id }],
            },
        },
    };
    Ok(serde_json::to_value(body)?)
}

// ============ VM reads ============

#[derive(Deserialize)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    pub properties: VirtualMachineProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineProperties {
    pub provisioning_state: Option<String>,
    pub hardware_profile: Option<HardwareProfileRead>,
    pub storage_profile: Option<StorageProfileRead>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfileRead {
    pub vm_size: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfileRead {
    pub os_disk: Option<OsDiskRead>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsDiskRead {
    pub name: Option<String>,
    pub vhd: Option<VhdRead>,
}

#[derive(Deserialize)]
pub struct VhdRead {
    pub uri: String,
}

impl VirtualMachine {
    /// URI of the unmanaged OS disk VHD, when one is attached
    pub fn os_disk_vhd_uri(&self) -> Option<&str> {
        self.properties
            .storage_profile
            .as_ref()?
            .os_disk
            .as_ref()?
            .vhd
            .as_ref()
            .map(|v| v.uri.as_str())
    }
}

// ============ Extensions ============

pub struct ExtensionSpec<'a> {
    pub publisher: &'a str,
    pub extension_type: &'a str,
    pub type_handler_version: &'a str,
    pub file_uris: &'a [&'a str],
    pub command_to_execute: &'a str,
}

#[derive(Serialize)]
struct CreateExtensionRequest<'a> {
    location: &'a str,
    properties: ExtensionProperties<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtensionProperties<'a> {
    publisher: &'a str,
    #[serde(rename = "type")]
    extension_type: &'a str,
    type_handler_version: &'a str,
    auto_upgrade_minor_version: bool,
    settings: ExtensionSettings<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtensionSettings<'a> {
    file_uris: &'a [&'a str],
    command_to_execute: &'a str,
}

// ============ Actions ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CaptureRequest<'a> {
    vhd_prefix: &'a str,
    destination_container_name: &'a str,
    overwrite_vhds: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunCommandRequest<'a> {
    command_id: &'static str,
    script: &'a [&'a str],
}

/// Extract the generalized image URI from a capture result document
/// (`resources[*].properties.storageProfile.osDisk.image.uri`)
pub fn image_uri_from_capture(result: &Value) -> Result<String> {
    // Azure-AsyncOperation wraps the template under properties.output
    let doc = result.pointer("/properties/output").unwrap_or(result);

    let uri = doc
        .get("resources")
        .and_then(Value::as_array)
        .and_then(|resources| {
            resources.iter().find_map(|r| {
                r.pointer("/properties/storageProfile/osDisk/image/uri")
                    .and_then(Value::as_str)
            })
        });

    match uri {
        Some(uri) => Ok(uri.to_string()),
        None => bail!(
            "could not locate the image uri under the expected section in the capture result: {}",
            doc
        ),
    }
}

/// Collect stdout/stderr messages from a runCommand result document
fn run_command_output(result: &Value) -> String {
    result
        .pointer("/properties/output/value")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.get("message").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

/// Pick the `PowerState/...` status code out of an instance view
fn power_state_from_instance_view(view: &Value) -> Option<String> {
    view.get("statuses")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|s| s.get("code").and_then(Value::as_str))
        .find(|code| code.starts_with("PowerState/"))
        .map(str::to_string)
}

impl ArmClient {
    fn vm_path(&self, rg: &str, name: &str, suffix: &str) -> String {
        self.resource_group_path(
            rg,
            &format!(
                "/providers/Microsoft.Compute/virtualMachines/{}{}",
                name, suffix
            ),
        )
    }

    // ============ VM methods ============

    /// Create a VM and read it back once provisioning completes
    pub async fn create_vm(
        &self,
        rg: &str,
        name: &str,
        location: &str,
        spec: &VmSpec<'_>,
    ) -> Result<VirtualMachine> {
        let path = self.vm_path(rg, name, "");
        let body = vm_request_body(name, location, spec)?;
        self.put_and_wait(&path, API_VERSION, body).await?;
        self.get_vm(rg, name).await
    }

    pub async fn get_vm(&self, rg: &str, name: &str) -> Result<VirtualMachine> {
        let resp = self.get_json(&self.vm_path(rg, name, ""), API_VERSION).await?;
        Ok(serde_json::from_value(resp)?)
    }

    pub async fn delete_vm(&self, rg: &str, name: &str) -> Result<()> {
        self.delete_and_wait(&self.vm_path(rg, name, ""), API_VERSION)
            .await
    }

    // ============ Extension methods ============

    /// Install a VM extension (auto-upgrading minor versions)
    pub async fn install_extension(
        &self,
        rg: &str,
        vm: &str,
        name: &str,
        location: &str,
        spec: &ExtensionSpec<'_>,
    ) -> Result<()> {
        let path = self.vm_path(rg, vm, &format!("/extensions/{}", name));
        let body = serde_json::to_value(CreateExtensionRequest {
            location,
            properties: ExtensionProperties {
                publisher: spec.publisher,
                extension_type: spec.extension_type,
                type_handler_version: spec.type_handler_version,
                auto_upgrade_minor_version: true,
                settings: ExtensionSettings {
                    file_uris: spec.file_uris,
                    command_to_execute: spec.command_to_execute,
                },
            },
        })?;
        self.put_and_wait(&path, API_VERSION, body).await?;
        Ok(())
    }

    // ============ Action methods ============

    /// Run a shell script inside the VM through the guest agent
    pub async fn run_command(&self, rg: &str, vm: &str, script: &[&str]) -> Result<String> {
        let path = self.vm_path(rg, vm, "/runCommand");
        let body = serde_json::to_value(RunCommandRequest {
            command_id: "RunShellScript",
            script,
        })?;
        let result = self.post_and_wait(&path, API_VERSION, Some(body)).await?;
        Ok(run_command_output(&result))
    }

    /// Deallocate the VM (stops billing, releases the compute)
    pub async fn deallocate_vm(&self, rg: &str, vm: &str) -> Result<()> {
        let path = self.vm_path(rg, vm, "/deallocate");
        self.post_and_wait(&path, API_VERSION, None).await?;
        Ok(())
    }

    /// Mark the VM as generalized. Synchronous on the provider side.
    pub async fn generalize_vm(&self, rg: &str, vm: &str) -> Result<()> {
        let path = self.vm_path(rg, vm, "/generalize");
        self.post_no_content(&path, API_VERSION).await
    }

    /// Capture the generalized VM into reusable image VHDs and return the
    /// image URI from the capture result
    pub async fn capture_vm(
        &self,
        rg: &str,
        vm: &str,
        container: &str,
        vhd_prefix: &str,
        overwrite: bool,
    ) -> Result<String> {
        let path = self.vm_path(rg, vm, "/capture");
        let body = serde_json::to_value(CaptureRequest {
            vhd_prefix,
            destination_container_name: container,
            overwrite_vhds: overwrite,
        })?;
        let result = self.post_and_wait(&path, API_VERSION, Some(body)).await?;
        image_uri_from_capture(&result)
    }

    /// Current `PowerState/...` code from the instance view, if reported
    pub async fn vm_power_state(&self, rg: &str, vm: &str) -> Result<Option<String>> {
        let view = self
            .get_json(&self.vm_path(rg, vm, "/instanceView"), API_VERSION)
            .await?;
        Ok(power_state_from_instance_view(&view))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn platform_spec<'a>(nic_id: &'a str, vhd_uri: &'a str) -> VmSpec<'a> {
        VmSpec {
            size: "Standard_D2a_v4",
            os_disk_name: "vm1-os",
            source: OsDiskSource::PlatformImage {
                image: ubuntu_server_16_04(),
                vhd_uri,
            },
            admin: Some(AdminCredentials {
                username: "vmadmin",
                password: "secret",
            }),
            nic_id,
        }
    }

    #[test]
    fn platform_image_vm_body() {
        let spec = platform_spec("/sub/rg/nic1", "https://sa.blob.core.windows.net/vhds/vm1-os.vhd");
        let body = vm_request_body("vm1", "westus", &spec).unwrap();
        assert_eq!(
            body,
            json!({
                "location": "westus",
                "properties": {
                    "hardwareProfile": { "vmSize": "Standard_D2a_v4" },
                    "storageProfile": {
                        "imageReference": {
                            "publisher": "Canonical",
                            "offer": "UbuntuServer",
                            "sku": "16.04-LTS",
                            "version": "latest"
                        },
                        "osDisk": {
                            "name": "vm1-os",
                            "createOption": "FromImage",
                            "caching": "ReadWrite",
                            "vhd": { "uri": "https://sa.blob.core.windows.net/vhds/vm1-os.vhd" }
                        }
                    },
                    "osProfile": {
                        "computerName": "vm1",
                        "adminUsername": "vmadmin",
                        "adminPassword": "secret"
                    },
                    "networkProfile": {
                        "networkInterfaces": [ { "id": "/sub/rg/nic1" } ]
                    }
                }
            })
        );
    }

    #[test]
    fn stored_image_vm_body_sets_os_type_and_image_uri() {
        let spec = VmSpec {
            size: "Standard_D2a_v4",
            os_disk_name: "vm2-os",
            source: OsDiskSource::StoredImage {
                image_uri: "https://sa.blob.core.windows.net/capturedvhds/img-os.vhd",
                vhd_uri: "https://sa.blob.core.windows.net/vhds/vm2-os.vhd",
            },
            admin: Some(AdminCredentials {
                username: "vmadmin",
                password: "secret",
            }),
            nic_id: "/sub/rg/nic2",
        };
        let body = vm_request_body("vm2", "westus", &spec).unwrap();
        let storage = &body["properties"]["storageProfile"];
        assert!(storage.get("imageReference").is_none());
        assert_eq!(storage["osDisk"]["createOption"], "FromImage");
        assert_eq!(storage["osDisk"]["osType"], "Linux");
        assert_eq!(
            storage["osDisk"]["image"]["uri"],
            "https://sa.blob.core.windows.net/capturedvhds/img-os.vhd"
        );
        assert_eq!(
            storage["osDisk"]["vhd"]["uri"],
            "https://sa.blob.core.windows.net/vhds/vm2-os.vhd"
        );
    }

    #[test]
    fn specialized_attach_has_no_os_profile() {
        let spec = VmSpec {
            size: "Standard_D2a_v4",
            os_disk_name: "vm3-os",
            source: OsDiskSource::SpecializedVhd {
                vhd_uri: "https://sa.blob.core.windows.net/vhds/vm2-os.vhd",
            },
            admin: None,
            nic_id: "/sub/rg/nic3",
        };
        let body = vm_request_body("vm3", "westus", &spec).unwrap();
        assert!(body["properties"].get("osProfile").is_none());
        assert_eq!(
            body["properties"]["storageProfile"]["osDisk"]["createOption"],
            "Attach"
        );
        assert_eq!(
            body["properties"]["storageProfile"]["osDisk"]["osType"],
            "Linux"
        );
    }

    #[test]
    fn specialized_attach_rejects_credentials() {
        let spec = VmSpec {
            size: "Standard_D2a_v4",
            os_disk_name: "vm3-os",
            source: OsDiskSource::SpecializedVhd {
                vhd_uri: "https://sa.blob.core.windows.net/vhds/vm2-os.vhd",
            },
            admin: Some(AdminCredentials {
                username: "vmadmin",
                password: "secret",
            }),
            nic_id: "/sub/rg/nic3",
        };
        assert!(vm_request_body("vm3", "westus", &spec).is_err());
    }

    #[test]
    fn extension_body_shape() {
        let body = serde_json::to_value(CreateExtensionRequest {
            location: "westus",
            properties: ExtensionProperties {
                publisher: "Microsoft.OSTCExtensions",
                extension_type: "CustomScriptForLinux",
                type_handler_version: "1.4",
                auto_upgrade_minor_version: true,
                settings: ExtensionSettings {
                    file_uris: &["https://example.com/install_apache.sh"],
                    command_to_execute: "bash install_apache.sh",
                },
            },
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "location": "westus",
                "properties": {
                    "publisher": "Microsoft.OSTCExtensions",
                    "type": "CustomScriptForLinux",
                    "typeHandlerVersion": "1.4",
                    "autoUpgradeMinorVersion": true,
                    "settings": {
                        "fileUris": ["https://example.com/install_apache.sh"],
                        "commandToExecute": "bash install_apache.sh"
                    }
                }
            })
        );
    }

    #[test]
    fn capture_body_shape() {
        let body = serde_json::to_value(CaptureRequest {
            vhd_prefix: "img",
            destination_container_name: "capturedvhds",
            overwrite_vhds: true,
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "vhdPrefix": "img",
                "destinationContainerName": "capturedvhds",
                "overwriteVhds": true
            })
        );
    }

    #[test]
    fn capture_result_image_uri() {
        let result = json!({
            "status": "Succeeded",
            "properties": {
                "output": {
                    "$schema": "https://schema.management.azure.com/...",
                    "resources": [
                        { "type": "Microsoft.Compute/virtualMachines",
                          "properties": { "storageProfile": { "osDisk": {
                              "image": { "uri": "https://sa.blob.core.windows.net/system/Microsoft.Compute/Images/capturedvhds/img-osDisk.vhd" }
                          } } } }
                    ]
                }
            }
        });
        assert_eq!(
            image_uri_from_capture(&result).unwrap(),
            "https://sa.blob.core.windows.net/system/Microsoft.Compute/Images/capturedvhds/img-osDisk.vhd"
        );
    }

    #[test]
    fn capture_result_missing_uri_is_an_error() {
        let result = json!({
            "status": "Succeeded",
            "properties": { "output": { "resources": [ { "properties": {} } ] } }
        });
        let err = image_uri_from_capture(&result).unwrap_err();
        assert!(err.to_string().contains("capture result"));
    }

    #[test]
    fn run_command_output_joins_messages() {
        let result = json!({
            "status": "Succeeded",
            "properties": { "output": { "value": [
                { "code": "ProvisioningState/succeeded", "message": "stdout line" },
                { "code": "ComponentStatus/StdErr", "message": "stderr line" }
            ] } }
        });
        assert_eq!(run_command_output(&result), "stdout line\nstderr line");
    }

    #[test]
    fn power_state_from_statuses() {
        let view = json!({
            "statuses": [
                { "code": "ProvisioningState/succeeded" },
                { "code": "PowerState/deallocated", "displayStatus": "VM deallocated" }
            ]
        });
        assert_eq!(
            power_state_from_instance_view(&view).as_deref(),
            Some("PowerState/deallocated")
        );
    }

    #[test]
    fn power_state_absent() {
        let view = json!({ "statuses": [ { "code": "ProvisioningState/updating" } ] });
        assert_eq!(power_state_from_instance_view(&view), None);
    }
}
