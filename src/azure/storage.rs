use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::ArmClient;

const API_VERSION: &str = "2023-01-01";

#[derive(Serialize)]
struct CreateStorageAccountRequest<'a> {
    location: &'a str,
    sku: Sku,
    kind: &'static str,
}

#[derive(Serialize)]
struct Sku {
    name: &'static str,
}

#[derive(Deserialize)]
pub struct StorageAccount {
    pub id: String,
    pub name: String,
}

/// Blob URI for an unmanaged VHD in the given account
pub fn vhd_uri(account: &str, container: &str, blob: &str) -> String {
    format!(
        "https://{}.blob.core.windows.net/{}/{}.vhd",
        account, container, blob
    )
}

impl ArmClient {
    /// Create a Standard_LRS storage account for unmanaged disks.
    /// The terminal poll body differs between async-operation and location
    /// style responses, so read the account back explicitly.
    pub async fn create_storage_account(
        &self,
        rg: &str,
        name: &str,
        location: &str,
    ) -> Result<StorageAccount> {
        let path = self.resource_group_path(
            rg,
            &format!("/providers/Microsoft.Storage/storageAccounts/{}", name),
        );
        let body = serde_json::to_value(CreateStorageAccountRequest {
            location,
            sku: Sku {
                name: "Standard_LRS",
            },
            kind: "StorageV2",
        })?;
        self.put_and_wait(&path, API_VERSION, body).await?;

        let resp = self.get_json(&path, API_VERSION).await?;
        Ok(serde_json::from_value(resp)?)
    }
}
