use crate::config::SpConfig;

use super::parse_certificate;

const HTTP_POST_BINDING: &str =
    "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";
const HTTP_REDIRECT_BINDING: &str =
    "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";

/// Validate the SP settings and build the metadata document. Every
/// violation is returned, not just the first one found.
pub(super) fn metadata(
    sp: &SpConfig,
) -> std::result::Result<String, Vec<String>> {
    let errors = validate(sp);
    if errors.is_empty() {
        Ok(build(sp))
    } else {
        Err(errors)
    }
}

fn validate(sp: &SpConfig) -> Vec<String> {
    let mut errors = Vec::new();
    if sp.entity_id.trim().is_empty() {
        errors.push("sp.entity_id must not be empty".to_string());
    }
    if sp.acs_url.trim().is_empty() {
        errors.push("sp.acs_url must not be empty".to_string());
    } else if !has_http_scheme(&sp.acs_url) {
        errors.push(format!(
            "sp.acs_url {} is not an absolute http(s) URL",
            sp.acs_url
        ));
    }
    if let Some(slo_url) = sp.slo_url.as_deref() {
        if !has_http_scheme(slo_url) {
            errors.push(format!(
                "sp.slo_url {slo_url} is not an absolute http(s) URL"
            ));
        }
    }
    if sp.name_id_format.trim().is_empty() {
        errors.push("sp.name_id_format must not be empty".to_string());
    }
    if let Some(certificate) = sp.certificate.as_deref() {
        if let Err(err) = parse_certificate(certificate) {
            errors.push(format!("sp.certificate does not parse: {err}"));
        }
    }
    errors
}

fn has_http_scheme(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn build(sp: &SpConfig) -> String {
    let mut metadata = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata"
    entityID="{entity_id}">
    <md:SPSSODescriptor AuthnRequestsSigned="false"
        WantAssertionsSigned="true"
        protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">"#,
        entity_id = sp.entity_id,
    );

    if let Some(certificate) = sp.certificate.as_deref() {
        let body = certificate
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect::<Vec<_>>()
            .join("");
        metadata.push_str(&format!(
            r#"
        <md:KeyDescriptor use="signing">
            <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
                <ds:X509Data>
                    <ds:X509Certificate>{body}</ds:X509Certificate>
                </ds:X509Data>
            </ds:KeyInfo>
        </md:KeyDescriptor>"#
        ));
    }

    if let Some(slo_url) = sp.slo_url.as_deref() {
        metadata.push_str(&format!(
            r#"
        <md:SingleLogoutService Binding="{HTTP_REDIRECT_BINDING}"
            Location="{slo_url}"/>"#
        ));
    }

    metadata.push_str(&format!(
        r#"
        <md:NameIDFormat>{name_id_format}</md:NameIDFormat>
        <md:AssertionConsumerService Binding="{HTTP_POST_BINDING}"
            Location="{acs_url}" index="0" isDefault="true"/>
    </md:SPSSODescriptor>
</md:EntityDescriptor>"#,
        name_id_format = sp.name_id_format,
        acs_url = sp.acs_url,
    ));

    metadata
}

#[cfg(test)]
mod tests {
    use super::super::testutil::{test_provider, TEST_CERT_PEM};
    use super::*;

    #[test]
    fn test_metadata_contains_sp_endpoints() {
        let mut sp = test_provider().sp;
        sp.certificate = Some(TEST_CERT_PEM.to_string());
        let xml = metadata(&sp).unwrap();

        assert!(xml
            .contains("entityID=\"https://sp.example.com/metadata\""));
        assert!(xml.contains("https://sp.example.com/sso/saml?acs"));
        assert!(xml.contains("SingleLogoutService"));
        assert!(xml.contains("X509Certificate"));
        assert!(!xml.contains("-----BEGIN"));
    }

    #[test]
    fn test_missing_required_fields_are_listed() {
        let mut sp = test_provider().sp;
        sp.entity_id = String::new();
        sp.acs_url = "not-a-url".to_string();

        let errors = metadata(&sp).unwrap_err();
        assert!(errors.len() >= 2);
        assert!(errors.iter().any(|e| e.contains("entity_id")));
        assert!(errors.iter().any(|e| e.contains("acs_url")));
    }

    #[test]
    fn test_invalid_certificate_is_listed() {
        let mut sp = test_provider().sp;
        sp.certificate = Some("garbage".to_string());

        let errors = metadata(&sp).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("certificate")));
    }
}
