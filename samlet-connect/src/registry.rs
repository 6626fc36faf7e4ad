use std::collections::HashMap;

use samlet_core::{errors, Result};

use crate::config::ProviderConfig;
use crate::request::RequestDescriptor;

/// Request parameter naming the provider a request belongs to.
pub const PROVIDER_PARAM: &str = "provider";

/// The configured providers in declaration order, with a name index
/// built once at load time so per-request resolution never rescans the
/// list.
#[derive(Debug)]
pub struct ProviderRegistry {
    providers: Vec<ProviderConfig>,
    index: HashMap<String, usize>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<ProviderConfig>) -> Result<Self> {
        let mut index = HashMap::with_capacity(providers.len());
        for (i, provider) in providers.iter().enumerate() {
            if index.insert(provider.name.clone(), i).is_some() {
                return Err(errors::configuration(&format!(
                    "duplicate provider name {}",
                    provider.name
                )));
            }
        }
        Ok(Self { providers, index })
    }

    /// Resolve the provider an inbound request addresses.
    ///
    /// Without a `provider` parameter the first configured entry wins and
    /// its name is written back into the request parameters, so every
    /// downstream consumer sees a resolved provider.
    pub fn resolve(
        &self,
        req: &mut RequestDescriptor,
    ) -> Result<(String, usize)> {
        let name = match req.get_data.get(PROVIDER_PARAM) {
            Some(name) => name.clone(),
            None => {
                let first = self.providers.first().ok_or_else(|| {
                    errors::configuration("no SAML providers are configured")
                })?;
                req.get_data
                    .insert(PROVIDER_PARAM.to_string(), first.name.clone());
                first.name.clone()
            }
        };
        match self.index.get(&name) {
            Some(&idx) => Ok((name, idx)),
            None => Err(errors::unknown_provider(&name)),
        }
    }

    pub fn get(&self, idx: usize) -> Option<&ProviderConfig> {
        self.providers.get(idx)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use samlet_core::errors::Code;

    fn provider(name: &str) -> ProviderConfig {
        toml::from_str(&format!(
            r#"
            name = "{name}"

            [sp]
            entity_id = "https://sp.example.com/metadata"
            acs_url = "https://sp.example.com/sso/saml?acs"

            [idp]
            entity_id = "https://idp.example.com"
            sso_url = "https://idp.example.com/sso"
            certificate = "MIIC...."
            "#
        ))
        .unwrap()
    }

    #[test]
    fn test_resolve_explicit_provider() {
        let registry =
            ProviderRegistry::new(vec![provider("Okta"), provider("AzureAd")])
                .unwrap();
        let mut req = RequestDescriptor::default();
        req.get_data
            .insert(PROVIDER_PARAM.to_string(), "AzureAd".to_string());

        let (name, idx) = registry.resolve(&mut req).unwrap();
        assert_eq!(name, "AzureAd");
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_resolve_defaults_to_first_and_writes_back() {
        let registry =
            ProviderRegistry::new(vec![provider("Okta"), provider("AzureAd")])
                .unwrap();
        let mut req = RequestDescriptor::default();

        let (name, idx) = registry.resolve(&mut req).unwrap();
        assert_eq!(name, "Okta");
        assert_eq!(idx, 0);
        assert_eq!(req.query_param(PROVIDER_PARAM), Some("Okta"));
    }

    #[test]
    fn test_resolve_unknown_provider() {
        let registry = ProviderRegistry::new(vec![provider("Okta")]).unwrap();
        let mut req = RequestDescriptor::default();
        req.get_data
            .insert(PROVIDER_PARAM.to_string(), "Missing".to_string());

        let err = registry.resolve(&mut req).unwrap_err();
        assert!(matches!(err.source(), Code::UnknownProvider(name) if name == "Missing"));
    }

    #[test]
    fn test_resolve_without_any_providers() {
        let registry = ProviderRegistry::new(vec![]).unwrap();
        let mut req = RequestDescriptor::default();

        let err = registry.resolve(&mut req).unwrap_err();
        assert!(matches!(err.source(), Code::Configuration(_)));
    }

    #[test]
    fn test_duplicate_provider_names_rejected() {
        let err =
            ProviderRegistry::new(vec![provider("Okta"), provider("Okta")])
                .unwrap_err();
        assert!(matches!(err.source(), Code::Configuration(_)));
    }
}
