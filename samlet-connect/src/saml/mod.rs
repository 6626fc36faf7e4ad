mod authn;
mod binding;
mod logout;
mod metadata;
mod response;

use async_trait::async_trait;
use chrono::Utc;
use mockall::automock;
use openssl::x509::X509;
use samael::metadata::{
    Endpoint, EntityDescriptor, IdpSsoDescriptor, HTTP_POST_BINDING,
    HTTP_REDIRECT_BINDING,
};
use samael::service_provider::{ServiceProvider, ServiceProviderBuilder};

use samlet_core::{errors, Result};

use crate::config::{IdpConfig, ProviderConfig};
use crate::request::RequestDescriptor;

pub use logout::SloOutcome;
pub use response::{ResponseOutcome, ValidatedAssertion, ValidationFailure};

/// Redirect into an IdP login, with the AuthnRequest ID the response
/// must later correlate against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect {
    pub url: String,
    pub request_id: String,
}

/// Connector drives the SAML 2.0 exchanges with one configured identity
/// provider.
///
/// RelayState round-tripping is handled by the server; the connector only
/// encodes it into outbound messages.
#[automock]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Build the IdP redirect URL for an SP-initiated login. The return
    /// target travels as RelayState; without one the receiving endpoint's
    /// own URL is used.
    async fn login_url(
        &self,
        req: &RequestDescriptor,
        return_to: Option<String>,
    ) -> Result<LoginRedirect>;

    /// Decode, verify and extract the assertion delivered to the ACS
    /// endpoint. `expected_request_id` is the pending AuthnRequest ID
    /// when the login was SP-initiated; a response that does not
    /// correlate with it is rejected.
    async fn consume_response(
        &self,
        saml_response: &str,
        expected_request_id: Option<String>,
    ) -> Result<ResponseOutcome>;

    /// Build the IdP redirect URL for an SP-initiated logout.
    async fn logout_url(
        &self,
        name_id: Option<String>,
        session_index: Option<String>,
    ) -> Result<String>;

    /// Consume an IdP-initiated logout message delivered to the SLS
    /// endpoint and work out where the agent goes next.
    async fn process_slo(&self, req: &RequestDescriptor)
        -> Result<SloOutcome>;

    /// Build the SP metadata document, or the list of configuration
    /// violations preventing it.
    fn metadata(&self) -> std::result::Result<String, Vec<String>>;
}

/// The samael/openssl-backed [`Connector`] for a single provider.
/// Certificates are parsed once at construction.
pub struct SamlEngine {
    config: ProviderConfig,
    service_provider: ServiceProvider,
}

impl SamlEngine {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let idp_cert = parse_certificate(&config.idp.certificate)?;
        let service_provider = ServiceProviderBuilder::default()
            .entity_id(config.sp.entity_id.clone())
            .idp_metadata(EntityDescriptor {
                entity_id: Some(config.idp.entity_id.clone()),
                idp_sso_descriptors: Some(vec![sso_descriptor(&config.idp)]),
                ..Default::default()
            })
            .acs_url(config.sp.acs_url.clone())
            .allow_idp_initiated(config.policy.allow_idp_initiated)
            .certificate(idp_cert)
            .build()
            .map_err(errors::any)?;
        Ok(Self {
            config,
            service_provider,
        })
    }

    pub fn provider_name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub(crate) fn service_provider(&self) -> &ServiceProvider {
        &self.service_provider
    }
}

#[async_trait]
impl Connector for SamlEngine {
    async fn login_url(
        &self,
        req: &RequestDescriptor,
        return_to: Option<String>,
    ) -> Result<LoginRedirect> {
        let relay_state = return_to.unwrap_or_else(|| req.self_url());
        authn::build_redirect(&self.config, &relay_state)
    }

    async fn consume_response(
        &self,
        saml_response: &str,
        expected_request_id: Option<String>,
    ) -> Result<ResponseOutcome> {
        Ok(self.validate_response(
            saml_response,
            expected_request_id.as_deref(),
            Utc::now(),
        ))
    }

    async fn logout_url(
        &self,
        name_id: Option<String>,
        session_index: Option<String>,
    ) -> Result<String> {
        logout::build_logout_redirect(
            &self.config,
            name_id.as_deref(),
            session_index.as_deref(),
        )
    }

    async fn process_slo(
        &self,
        req: &RequestDescriptor,
    ) -> Result<SloOutcome> {
        logout::process_slo(&self.config, req)
    }

    fn metadata(&self) -> std::result::Result<String, Vec<String>> {
        metadata::metadata(&self.config.sp)
    }
}

/// Parse a PEM certificate, tolerating a bare base64 body without the
/// PEM armor.
pub(crate) fn parse_certificate(pem: &str) -> Result<X509> {
    let pem_data = if pem.contains("-----BEGIN CERTIFICATE-----") {
        pem.to_string()
    } else {
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----",
            pem.trim()
        )
    };
    X509::from_pem(pem_data.as_bytes()).map_err(|err| {
        errors::configuration(&format!("invalid certificate: {err}"))
    })
}

fn sso_descriptor(idp: &IdpConfig) -> IdpSsoDescriptor {
    IdpSsoDescriptor {
        single_sign_on_services: vec![
            Endpoint {
                binding: HTTP_REDIRECT_BINDING.to_string(),
                location: idp.sso_url.clone(),
                response_location: None,
            },
            Endpoint {
                binding: HTTP_POST_BINDING.to_string(),
                location: idp.sso_url.clone(),
                response_location: None,
            },
        ],
        id: None,
        valid_until: None,
        cache_duration: None,
        protocol_support_enumeration: None,
        error_url: None,
        signature: None,
        key_descriptors: vec![],
        organization: None,
        contact_people: vec![],
        artifact_resolution_service: vec![],
        single_logout_services: vec![],
        manage_name_id_services: vec![],
        name_id_formats: vec![],
        want_authn_requests_signed: None,
        name_id_mapping_services: vec![],
        assertion_id_request_services: vec![],
        attribute_profiles: vec![],
        attributes: vec![],
    }
}
