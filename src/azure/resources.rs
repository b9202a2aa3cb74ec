use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::ArmClient;

const API_VERSION: &str = "2022-09-01";

#[derive(Serialize)]
struct CreateResourceGroupRequest<'a> {
    location: &'a str,
}

#[derive(Deserialize)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    pub location: String,
}

impl ArmClient {
    /// Create (or update) a resource group
    pub async fn create_resource_group(
        &self,
        name: &str,
        location: &str,
    ) -> Result<ResourceGroup> {
        let path = self.subscription_path(&format!("/resourceGroups/{}", name));
        let body = serde_json::to_value(CreateResourceGroupRequest { location })?;
        let resp = self.put_and_wait(&path, API_VERSION, body).await?;
        Ok(serde_json::from_value(resp)?)
    }

    /// Check if a resource group exists
    pub async fn resource_group_exists(&self, name: &str) -> Result<bool> {
        let path = self.subscription_path(&format!("/resourceGroups/{}", name));
        Ok(self.get_optional_json(&path, API_VERSION).await?.is_some())
    }

    /// Delete a resource group and everything in it
    pub async fn delete_resource_group(&self, name: &str) -> Result<()> {
        let path = self.subscription_path(&format!("/resourceGroups/{}", name));
        self.delete_and_wait(&path, API_VERSION).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_request_body_shape() {
        let body = serde_json::to_value(CreateResourceGroupRequest { location: "westus" }).unwrap();
        assert_eq!(body, json!({ "location": "westus" }));
    }
}
