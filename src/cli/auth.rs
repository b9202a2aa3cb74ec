use anyhow::{Context, Result};
use std::env;

/// Resolved service-principal credentials
#[derive(Clone)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub subscription_id: String,
}

/// Resolve service-principal credentials from the environment
pub fn resolve_credentials() -> Result<Credentials> {
    Ok(Credentials {
        tenant_id: require_env("AZURE_TENANT_ID")?,
        client_id: require_env("AZURE_CLIENT_ID")?,
        client_secret: require_env("AZURE_CLIENT_SECRET")?,
        subscription_id: require_env("AZURE_SUBSCRIPTION_ID")?,
    })
}

fn require_env(name: &str) -> Result<String> {
    env::var(name).with_context(|| {
        format!(
            "{} is not set. Export AZURE_TENANT_ID, AZURE_CLIENT_ID, \
             AZURE_CLIENT_SECRET and AZURE_SUBSCRIPTION_ID for a service principal",
            name
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variable_names_the_culprit() {
        let err = require_env("VMCAPTURE_TEST_UNSET_VARIABLE").unwrap_err();
        assert!(err
            .to_string()
            .contains("VMCAPTURE_TEST_UNSET_VARIABLE is not set"));
    }
}
