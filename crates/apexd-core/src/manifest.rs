use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApexManifest {
    pub name: String,
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub version_name: String,
    #[serde(default)]
    pub no_code: bool,
    #[serde(default)]
    pub provide_shared_apex_libs: bool,
    #[serde(default)]
    pub require_native_libs: Vec<String>,
}

impl ApexManifest {
    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self =
            serde_json::from_str(input).context("failed to parse apex manifest")?;
        validate_package_name(&manifest.name)?;
        if manifest.version < 0 {
            return Err(anyhow!(
                "manifest '{}' has negative version {}",
                manifest.name,
                manifest.version
            ));
        }
        Ok(manifest)
    }
}

fn validate_package_name(name: &str) -> anyhow::Result<()> {
    if name.trim().is_empty() {
        return Err(anyhow!("apex package name must not be empty"));
    }
    if name == "." || name == ".." {
        return Err(anyhow!("invalid apex package name: '{name}'"));
    }
    if name
        .chars()
        .any(|ch| !(ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-'))
    {
        return Err(anyhow!(
            "apex package name contains invalid character(s): '{name}'"
        ));
    }
    Ok(())
}
