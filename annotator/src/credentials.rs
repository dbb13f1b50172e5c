use crate::config::{ConfigurationError, VendorConfig};
use crate::types::Region;
use std::fmt;

pub const ENV_API_KEY: &str = "AMPLITUDE_API_KEY";
pub const ENV_SECRET_KEY: &str = "AMPLITUDE_SECRET_KEY";
pub const ENV_PROJECT_ID: &str = "AMPLITUDE_PROJECT_ID";
pub const ENV_REGION: &str = "AMPLITUDE_REGION";

/// Resolved vendor credentials for one session.
///
/// Immutable once built. `Debug` never prints the keys.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    api_key: String,
    secret_key: String,
    project_id: u64,
    region: Region,
}

impl CredentialBundle {
    pub fn new(
        api_key: &str,
        secret_key: &str,
        project_id: u64,
        region: Region,
    ) -> Result<Self, ConfigurationError> {
        let api_key = required(Some(api_key), ENV_API_KEY)?;
        let secret_key = required(Some(secret_key), ENV_SECRET_KEY)?;
        if project_id == 0 {
            return Err(ConfigurationError::InvalidProjectId(project_id.to_string()));
        }

        Ok(CredentialBundle {
            api_key,
            secret_key,
            project_id,
            region,
        })
    }

    /// Builds the bundle from the process environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the bundle from any key/value source using the `AMPLITUDE_*`
    /// variable names. A missing region defaults to US.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = required(lookup(ENV_API_KEY).as_deref(), ENV_API_KEY)?;
        let secret_key = required(lookup(ENV_SECRET_KEY).as_deref(), ENV_SECRET_KEY)?;
        let project_id = parse_project_id(&required(
            lookup(ENV_PROJECT_ID).as_deref(),
            ENV_PROJECT_ID,
        )?)?;
        let region = match lookup(ENV_REGION) {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => Region::default(),
        };

        Self::new(&api_key, &secret_key, project_id, region)
    }

    /// Like `from_lookup`, but project id and region fall back to the config
    /// file when the lookup has no value for them.
    pub fn resolve<F>(lookup: F, vendor: &VendorConfig) -> Result<Self, ConfigurationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_lookup(|name| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .or_else(|| match name {
                    ENV_PROJECT_ID => vendor.project_id.map(|id| id.to_string()),
                    ENV_REGION => vendor.region.map(|region| region.as_str().to_string()),
                    _ => None,
                })
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn project_id(&self) -> u64 {
        self.project_id
    }

    pub fn region(&self) -> Region {
        self.region
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("api_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("region", &self.region)
            .finish()
    }
}

fn required(value: Option<&str>, name: &'static str) -> Result<String, ConfigurationError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigurationError::MissingField(name)),
    }
}

/// Parses a project id; only plain positive decimal numbers are accepted.
pub fn parse_project_id(raw: &str) -> Result<u64, ConfigurationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigurationError::InvalidProjectId(raw.to_string()));
    }
    match trimmed.parse::<u64>() {
        Ok(0) | Err(_) => Err(ConfigurationError::InvalidProjectId(raw.to_string())),
        Ok(id) => Ok(id),
    }
}
