use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use uuid::Uuid;

use samlet_core::{errors, Result};

use crate::config::ProviderConfig;
use crate::request::RequestDescriptor;

use super::binding;
use super::response::ValidationFailure;

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// What the SLS endpoint should do after consuming an IdP logout
/// message: follow `redirect_url` when the IdP expects an answer, or
/// fall back to the caller's own target when it does not.
#[derive(Debug, Default)]
pub struct SloOutcome {
    pub redirect_url: Option<String>,
    pub errors: Vec<ValidationFailure>,
    pub last_reason: Option<String>,
}

impl SloOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_strings(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    fn fail(mut self, failure: ValidationFailure) -> Self {
        self.last_reason = Some(failure.to_string());
        self.errors.push(failure);
        self
    }
}

/// Inbound LogoutRequest fields the SP acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct ParsedLogoutRequest {
    pub(super) id: String,
    pub(super) issuer: String,
    pub(super) name_id: String,
    pub(super) session_index: Option<String>,
}

/// Inbound LogoutResponse fields the SP acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct ParsedLogoutResponse {
    pub(super) id: Option<String>,
    pub(super) in_response_to: Option<String>,
    pub(super) issuer: Option<String>,
    pub(super) status_code: Option<String>,
}

/// Build the redirect-binding LogoutRequest URL for an SP-initiated
/// logout. NameID and SessionIndex travel along when the session still
/// knows them.
pub(super) fn build_logout_redirect(
    config: &ProviderConfig,
    name_id: Option<&str>,
    session_index: Option<&str>,
) -> Result<String> {
    let slo_url = config.idp.slo_url.as_deref().ok_or_else(|| {
        errors::configuration(&format!(
            "provider {} has no IdP SLO endpoint configured",
            config.name
        ))
    })?;

    let request_id = format!("_{}", Uuid::new_v4().simple());
    let issue_instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let mut xml = format!(
        r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
    ID="{request_id}"
    Version="2.0"
    IssueInstant="{issue_instant}"
    Destination="{destination}">
    <saml:Issuer>{issuer}</saml:Issuer>"#,
        destination = xml_escape(slo_url),
        issuer = xml_escape(&config.sp.entity_id),
    );
    if let Some(name_id) = name_id {
        xml.push_str(&format!(
            "\n    <saml:NameID Format=\"{}\">{}</saml:NameID>",
            xml_escape(&config.sp.name_id_format),
            xml_escape(name_id)
        ));
    }
    if let Some(session_index) = session_index {
        xml.push_str(&format!(
            "\n    <samlp:SessionIndex>{}</samlp:SessionIndex>",
            xml_escape(session_index)
        ));
    }
    xml.push_str("\n</samlp:LogoutRequest>");

    let encoded = binding::deflate_and_encode(&xml)?;
    Ok(binding::redirect_url(slo_url, "SAMLRequest", &encoded, None))
}

/// Consume the message delivered to the SLS endpoint. An IdP-initiated
/// LogoutRequest is answered with a LogoutResponse redirect back to the
/// IdP; a LogoutResponse to our own LogoutRequest only needs its status
/// checked. The caller has already cleared local session state.
pub(super) fn process_slo(
    config: &ProviderConfig,
    req: &RequestDescriptor,
) -> Result<SloOutcome> {
    let relay_state = req
        .query_param("RelayState")
        .or_else(|| req.form_param("RelayState"));

    if let Some(encoded) = req
        .query_param("SAMLRequest")
        .or_else(|| req.form_param("SAMLRequest"))
    {
        let xml = match binding::decode_message(encoded) {
            Ok(xml) => xml,
            Err(err) => {
                return Ok(SloOutcome::default().fail(
                    ValidationFailure::Malformed(err.to_string()),
                ));
            }
        };
        let parsed = match parse_logout_request(&xml) {
            Ok(parsed) => parsed,
            Err(failure) => return Ok(SloOutcome::default().fail(failure)),
        };

        let mut outcome = SloOutcome::default();
        if parsed.issuer != config.idp.entity_id {
            outcome = outcome.fail(ValidationFailure::IssuerMismatch(
                parsed.issuer.clone(),
                config.idp.entity_id.clone(),
            ));
        }

        let slo_url = config.idp.slo_url.as_deref().ok_or_else(|| {
            errors::configuration(&format!(
                "provider {} has no IdP SLO endpoint configured",
                config.name
            ))
        })?;
        let response =
            build_logout_response(config, &parsed.id, slo_url, outcome.is_valid());
        let encoded_response = binding::deflate_and_encode(&response)?;
        outcome.redirect_url = Some(binding::redirect_url(
            slo_url,
            "SAMLResponse",
            &encoded_response,
            relay_state,
        ));

        tracing::info!(
            provider = %config.name,
            name_id = %parsed.name_id,
            session_index = ?parsed.session_index,
            "consumed IdP-initiated logout request"
        );
        return Ok(outcome);
    }

    if let Some(encoded) = req
        .query_param("SAMLResponse")
        .or_else(|| req.form_param("SAMLResponse"))
    {
        let xml = match binding::decode_message(encoded) {
            Ok(xml) => xml,
            Err(err) => {
                return Ok(SloOutcome::default().fail(
                    ValidationFailure::Malformed(err.to_string()),
                ));
            }
        };
        let parsed = parse_logout_response(&xml);

        let mut outcome = SloOutcome::default();
        if let Some(issuer) = parsed.issuer.as_ref() {
            if *issuer != config.idp.entity_id {
                outcome = outcome.fail(ValidationFailure::IssuerMismatch(
                    issuer.clone(),
                    config.idp.entity_id.clone(),
                ));
            }
        }
        match parsed.status_code.as_deref() {
            Some(STATUS_SUCCESS) => {}
            Some(other) => {
                outcome = outcome.fail(ValidationFailure::LogoutNotSuccess(
                    other.to_string(),
                ));
            }
            None => {
                outcome = outcome.fail(ValidationFailure::Malformed(
                    "logout response carries no status".to_string(),
                ));
            }
        }
        return Ok(outcome);
    }

    Ok(SloOutcome::default().fail(ValidationFailure::Malformed(
        "SLS request carries neither SAMLRequest nor SAMLResponse".to_string(),
    )))
}

fn build_logout_response(
    config: &ProviderConfig,
    in_response_to: &str,
    destination: &str,
    success: bool,
) -> String {
    let response_id = format!("_{}", Uuid::new_v4().simple());
    let issue_instant = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let status = if success {
        STATUS_SUCCESS
    } else {
        "urn:oasis:names:tc:SAML:2.0:status:Requester"
    };

    format!(
        r#"<samlp:LogoutResponse xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
    ID="{response_id}"
    Version="2.0"
    IssueInstant="{issue_instant}"
    Destination="{destination}"
    InResponseTo="{in_response_to}">
    <saml:Issuer>{issuer}</saml:Issuer>
    <samlp:Status>
        <samlp:StatusCode Value="{status}"/>
    </samlp:Status>
</samlp:LogoutResponse>"#,
        destination = xml_escape(destination),
        in_response_to = xml_escape(in_response_to),
        issuer = xml_escape(&config.sp.entity_id),
    )
}

fn parse_logout_request(
    xml: &str,
) -> std::result::Result<ParsedLogoutRequest, ValidationFailure> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut id = None;
    let mut issuer = None;
    let mut name_id = None;
    let mut session_index = None;
    let mut current_element = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local =
                    String::from_utf8_lossy(e.local_name().into_inner())
                        .to_string();
                if local == "LogoutRequest" {
                    for attr in e.attributes().flatten() {
                        if attr.key.local_name().into_inner() == b"ID".as_slice()
                        {
                            id = Some(
                                String::from_utf8_lossy(&attr.value)
                                    .to_string(),
                            );
                        }
                    }
                }
                current_element = local;
            }
            Ok(Event::Text(ref e)) => {
                let text = e.unescape().unwrap_or_default().to_string();
                match current_element.as_str() {
                    "Issuer" => issuer = Some(text),
                    "NameID" => name_id = Some(text),
                    "SessionIndex" => session_index = Some(text),
                    _ => {}
                }
            }
            Ok(Event::End(_)) => current_element.clear(),
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(ValidationFailure::Malformed(format!(
                    "XML parse error: {err}"
                )));
            }
            _ => {}
        }
    }

    let id = id.ok_or_else(|| {
        ValidationFailure::Malformed("logout request has no ID".to_string())
    })?;
    let issuer = issuer.ok_or_else(|| {
        ValidationFailure::Malformed(
            "logout request has no Issuer".to_string(),
        )
    })?;
    let name_id = name_id.ok_or_else(|| {
        ValidationFailure::Malformed(
            "logout request has no NameID".to_string(),
        )
    })?;

    Ok(ParsedLogoutRequest {
        id,
        issuer,
        name_id,
        session_index,
    })
}

fn parse_logout_response(xml: &str) -> ParsedLogoutResponse {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = ParsedLogoutResponse::default();
    let mut current_element = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                let local =
                    String::from_utf8_lossy(e.local_name().into_inner())
                        .to_string();
                match local.as_str() {
                    "LogoutResponse" => {
                        for attr in e.attributes().flatten() {
                            let key = attr.key.local_name().into_inner();
                            let value = String::from_utf8_lossy(&attr.value)
                                .to_string();
                            if key == b"ID".as_slice() {
                                parsed.id = Some(value);
                            } else if key == b"InResponseTo".as_slice() {
                                parsed.in_response_to = Some(value);
                            }
                        }
                    }
                    "StatusCode" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.local_name().into_inner()
                                == b"Value".as_slice()
                            {
                                parsed.status_code = Some(
                                    String::from_utf8_lossy(&attr.value)
                                        .to_string(),
                                );
                            }
                        }
                    }
                    _ => {}
                }
                current_element = local;
            }
            Ok(Event::Text(ref e)) => {
                if current_element == "Issuer" {
                    parsed.issuer =
                        Some(e.unescape().unwrap_or_default().to_string());
                }
            }
            Ok(Event::End(_)) => current_element.clear(),
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
    parsed
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::super::testutil::test_provider;
    use super::*;

    fn logout_request_xml() -> String {
        r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
    ID="_lr1" Version="2.0" IssueInstant="2026-03-01T12:00:00Z"
    Destination="https://sp.example.com/sso/saml?sls">
    <saml:Issuer>https://idp.example.com</saml:Issuer>
    <saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">alice@example.com</saml:NameID>
    <samlp:SessionIndex>sid-123</samlp:SessionIndex>
</samlp:LogoutRequest>"#
            .to_string()
    }

    fn sls_request(payload: &str, parameter: &str) -> RequestDescriptor {
        RequestDescriptor {
            https: true,
            http_host: "sp.example.com".to_string(),
            script_name: "/sso/saml".to_string(),
            get_data: HashMap::from([
                ("sls".to_string(), String::new()),
                (parameter.to_string(), payload.to_string()),
            ]),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_logout_request_fields() {
        let parsed = parse_logout_request(&logout_request_xml()).unwrap();
        assert_eq!(parsed.id, "_lr1");
        assert_eq!(parsed.issuer, "https://idp.example.com");
        assert_eq!(parsed.name_id, "alice@example.com");
        assert_eq!(parsed.session_index.as_deref(), Some("sid-123"));
    }

    #[test]
    fn test_parse_logout_request_requires_issuer() {
        let xml = r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" ID="_lr2" Version="2.0">
            <saml:NameID xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">x</saml:NameID>
        </samlp:LogoutRequest>"#;
        assert!(parse_logout_request(xml).is_err());
    }

    #[test]
    fn test_sp_initiated_logout_redirect() {
        let config = test_provider();
        let url = build_logout_redirect(
            &config,
            Some("alice@example.com"),
            Some("sid-123"),
        )
        .unwrap();
        assert!(url.starts_with("https://idp.example.com/slo?SAMLRequest="));
    }

    #[test]
    fn test_sp_initiated_logout_requires_slo_endpoint() {
        let mut config = test_provider();
        config.idp.slo_url = None;
        assert!(build_logout_redirect(&config, None, None).is_err());
    }

    #[test]
    fn test_idp_initiated_logout_produces_response_redirect() {
        let config = test_provider();
        let encoded =
            binding::deflate_and_encode(&logout_request_xml()).unwrap();
        let outcome =
            process_slo(&config, &sls_request(&encoded, "SAMLRequest"))
                .unwrap();

        assert!(outcome.is_valid(), "{:?}", outcome.errors);
        let url = outcome.redirect_url.unwrap();
        assert!(url.starts_with("https://idp.example.com/slo?SAMLResponse="));

        let payload = url.split("SAMLResponse=").nth(1).unwrap();
        let payload = payload.split('&').next().unwrap();
        let decoded = urlencoding::decode(payload).unwrap();
        let response = binding::decode_message(&decoded).unwrap();
        assert!(response.contains("InResponseTo=\"_lr1\""));
        assert!(response.contains(STATUS_SUCCESS));
    }

    #[test]
    fn test_foreign_issuer_is_reported() {
        let mut config = test_provider();
        config.idp.entity_id = "https://other-idp.example.com".to_string();
        let encoded =
            binding::deflate_and_encode(&logout_request_xml()).unwrap();
        let outcome =
            process_slo(&config, &sls_request(&encoded, "SAMLRequest"))
                .unwrap();
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, ValidationFailure::IssuerMismatch(..))));
    }

    #[test]
    fn test_logout_response_success_status() {
        let config = test_provider();
        // Responses travelling in this direction are issued by the IdP.
        let response =
            build_logout_response(&config, "_lr9", "https://idp.example.com/slo", true)
                .replace(&config.sp.entity_id, &config.idp.entity_id);
        let encoded = binding::deflate_and_encode(&response).unwrap();
        let outcome =
            process_slo(&config, &sls_request(&encoded, "SAMLResponse"))
                .unwrap();
        assert!(outcome.is_valid(), "{:?}", outcome.errors);
        assert!(outcome.redirect_url.is_none());
    }

    #[test]
    fn test_logout_response_failure_status_is_reported() {
        let config = test_provider();
        let mut response =
            build_logout_response(&config, "_lr9", "https://idp.example.com/slo", false);
        // The failed response is issued by the IdP in this direction.
        response = response.replace(
            &config.sp.entity_id,
            &config.idp.entity_id,
        );
        let encoded = binding::deflate_and_encode(&response).unwrap();
        let outcome =
            process_slo(&config, &sls_request(&encoded, "SAMLResponse"))
                .unwrap();
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, ValidationFailure::LogoutNotSuccess(_))));
    }

    #[test]
    fn test_sls_without_payload_is_malformed() {
        let config = test_provider();
        let req = RequestDescriptor {
            get_data: HashMap::from([("sls".to_string(), String::new())]),
            ..Default::default()
        };
        let outcome = process_slo(&config, &req).unwrap();
        assert!(!outcome.is_valid());
    }
}
