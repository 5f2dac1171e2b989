//! Connection-descriptor resolution.
//!
//! The store itself holds no process-wide configuration: whoever constructs
//! a backend injects a [`ConnectionResolver`] that turns a named external
//! resource into an endpoint, an instance identifier, and credentials.

use std::collections::HashMap;

use secrecy::SecretString;

use crate::error::StoreError;

/// Environment variables for the ambient credential source.
pub const ENV_ACCESS_KEY_ID: &str = "PARLEY_ACCESS_KEY_ID";
pub const ENV_ACCESS_KEY_SECRET: &str = "PARLEY_ACCESS_KEY_SECRET";
pub const ENV_SECURITY_TOKEN: &str = "PARLEY_SECURITY_TOKEN";

/// Access-key credentials. Secret parts are held in `SecretString` and
/// redacted from `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub access_key_secret: SecretString,
    /// Short-lived STS token, when the credentials are temporary.
    pub security_token: Option<SecretString>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"[REDACTED]")
            .field("security_token", &self.security_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            access_key_secret: SecretString::from(access_key_secret.into()),
            security_token: None,
        }
    }

    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        self.security_token = Some(SecretString::from(token.into()));
        self
    }

    /// Read credentials from the environment. An empty or missing key id or
    /// secret is an error; the security token is optional.
    pub fn from_env() -> Result<Self, StoreError> {
        let access_key_id = std::env::var(ENV_ACCESS_KEY_ID).unwrap_or_default();
        let access_key_secret = std::env::var(ENV_ACCESS_KEY_SECRET).unwrap_or_default();
        if access_key_id.is_empty() || access_key_secret.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "{ENV_ACCESS_KEY_ID}/{ENV_ACCESS_KEY_SECRET} must be set and non-empty"
            )));
        }
        let mut credentials = Self::new(access_key_id, access_key_secret);
        if let Ok(token) = std::env::var(ENV_SECURITY_TOKEN) {
            if !token.is_empty() {
                credentials = credentials.with_security_token(token);
            }
        }
        Ok(credentials)
    }
}

/// Everything a backend constructor needs to reach a store instance.
#[derive(Clone, Debug)]
pub struct ConnectionDescriptor {
    pub endpoint: String,
    pub instance: String,
    pub credentials: Credentials,
}

impl ConnectionDescriptor {
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.endpoint.is_empty() {
            return Err(StoreError::InvalidArgument(
                "connection descriptor has an empty endpoint".into(),
            ));
        }
        if self.instance.is_empty() {
            return Err(StoreError::InvalidArgument(
                "connection descriptor has an empty instance identifier".into(),
            ));
        }
        if self.credentials.access_key_id.is_empty() {
            return Err(StoreError::InvalidArgument(
                "connection descriptor has empty credentials".into(),
            ));
        }
        Ok(())
    }

    /// Validate and rewrite a private VPC endpoint to its public form.
    pub fn normalized(mut self) -> Result<Self, StoreError> {
        self.validate()?;
        self.endpoint = convert_vpc_endpoint_to_public(&self.endpoint);
        Ok(self)
    }
}

/// Resolves a named external resource to a connection descriptor. Pure from
/// the store's point of view: no process-wide mutable state.
pub trait ConnectionResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<ConnectionDescriptor, StoreError>;
}

/// Fixed name-to-descriptor mapping, for tests and static deployments.
#[derive(Clone, Debug, Default)]
pub struct StaticResolver {
    descriptors: HashMap<String, ConnectionDescriptor>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, descriptor: ConnectionDescriptor) -> Self {
        self.descriptors.insert(name.into(), descriptor);
        self
    }
}

impl ConnectionResolver for StaticResolver {
    fn resolve(&self, name: &str) -> Result<ConnectionDescriptor, StoreError> {
        self.descriptors
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("connection {name}")))
            .and_then(ConnectionDescriptor::normalized)
    }
}

/// Rewrite a VPC-internal endpoint to its public counterpart. Endpoints that
/// are not VPC-internal pass through unchanged.
pub fn convert_vpc_endpoint_to_public(endpoint: &str) -> String {
    if endpoint.contains(".vpc.tablestore.aliyuncs.com") {
        endpoint.replace(".vpc.tablestore.aliyuncs.com", ".ots.aliyuncs.com")
    } else {
        endpoint.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(endpoint: &str) -> ConnectionDescriptor {
        ConnectionDescriptor {
            endpoint: endpoint.into(),
            instance: "inst".into(),
            credentials: Credentials::new("ak_id", "ak_secret"),
        }
    }

    #[test]
    fn vpc_endpoint_rewritten() {
        assert_eq!(
            convert_vpc_endpoint_to_public("https://inst.cn-hangzhou.vpc.tablestore.aliyuncs.com"),
            "https://inst.cn-hangzhou.ots.aliyuncs.com"
        );
    }

    #[test]
    fn public_endpoint_unchanged() {
        let endpoint = "https://inst.cn-hangzhou.ots.aliyuncs.com";
        assert_eq!(convert_vpc_endpoint_to_public(endpoint), endpoint);
    }

    #[test]
    fn validate_rejects_empty_fields() {
        assert!(matches!(
            descriptor("").validate(),
            Err(StoreError::InvalidArgument(_))
        ));

        let mut no_instance = descriptor("https://example");
        no_instance.instance.clear();
        assert!(no_instance.validate().is_err());

        let mut no_credentials = descriptor("https://example");
        no_credentials.credentials.access_key_id.clear();
        assert!(no_credentials.validate().is_err());
    }

    #[test]
    fn normalized_applies_rewrite() {
        let normalized = descriptor("https://inst.cn-hangzhou.vpc.tablestore.aliyuncs.com")
            .normalized()
            .unwrap();
        assert_eq!(normalized.endpoint, "https://inst.cn-hangzhou.ots.aliyuncs.com");
    }

    #[test]
    fn static_resolver_resolves_and_normalizes() {
        let resolver = StaticResolver::new().with(
            "prod",
            descriptor("https://inst.cn-hangzhou.vpc.tablestore.aliyuncs.com"),
        );
        let resolved = resolver.resolve("prod").unwrap();
        assert_eq!(resolved.endpoint, "https://inst.cn-hangzhou.ots.aliyuncs.com");

        assert!(matches!(
            resolver.resolve("missing"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn debug_redacts_secrets() {
        let credentials = Credentials::new("ak_id", "super-secret").with_security_token("sts");
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("ak_id"));
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("sts"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
