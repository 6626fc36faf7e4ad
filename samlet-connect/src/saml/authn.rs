use chrono::Utc;
use uuid::Uuid;

use samlet_core::Result;

use crate::config::ProviderConfig;

use super::binding;
use super::LoginRedirect;

/// Build the redirect-binding AuthnRequest URL for an SP-initiated
/// login. The request ID is returned so the caller can hold it for
/// response correlation.
pub(super) fn build_redirect(
    config: &ProviderConfig,
    relay_state: &str,
) -> Result<LoginRedirect> {
    let request_id = format!("_{}", Uuid::new_v4().simple());
    let issue_instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let authn_request = format!(
        r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
    ID="{id}"
    Version="2.0"
    IssueInstant="{issue_instant}"
    Destination="{destination}"
    AssertionConsumerServiceURL="{acs_url}"
    ProtocolBinding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST">
    <saml:Issuer>{issuer}</saml:Issuer>
    <samlp:NameIDPolicy Format="{name_id_format}" AllowCreate="true"/>
</samlp:AuthnRequest>"#,
        id = request_id,
        issue_instant = issue_instant,
        destination = config.idp.sso_url,
        acs_url = config.sp.acs_url,
        issuer = config.sp.entity_id,
        name_id_format = config.sp.name_id_format,
    );

    let encoded = binding::deflate_and_encode(&authn_request)?;
    let url = binding::redirect_url(
        &config.idp.sso_url,
        "SAMLRequest",
        &encoded,
        Some(relay_state),
    );

    tracing::debug!(provider = %config.name, url = %url, "built AuthnRequest redirect");
    Ok(LoginRedirect { url, request_id })
}
