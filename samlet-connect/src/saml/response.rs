use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::RawAttributes;

use super::SamlEngine;

const STATUS_SUCCESS: &str = "urn:oasis:names:tc:SAML:2.0:status:Success";

/// One protocol violation found while consuming an ACS response. The
/// whole list is reported to the caller, not just the first hit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    #[error("malformed SAML response: {0}")]
    Malformed(String),
    #[error("IdP reported status {0}")]
    StatusNotSuccess(String),
    #[error("response failed verification: {0}")]
    Verification(String),
    #[error("assertion is not yet valid, NotBefore is {0}")]
    NotYetValid(String),
    #[error("assertion has expired, NotOnOrAfter was {0}")]
    Expired(String),
    #[error("audience {0} does not match the SP entity id {1}")]
    AudienceMismatch(String, String),
    #[error("destination {0} does not match the ACS URL {1}")]
    DestinationMismatch(String, String),
    #[error("InResponseTo {got} does not correlate with the pending request {expected}")]
    RequestIdMismatch { expected: String, got: String },
    #[error("a login was pending but the response carries no InResponseTo")]
    UnsolicitedResponse,
    #[error("response carries InResponseTo {0} but no login was pending")]
    UnexpectedInResponseTo(String),
    #[error("unsolicited responses are not allowed for this provider")]
    IdpInitiatedForbidden,
    #[error("response carries no assertion")]
    MissingAssertion,
    #[error("assertion subject carries no NameID")]
    MissingNameId,
    #[error("issuer {0} does not match the configured IdP {1}")]
    IssuerMismatch(String, String),
    #[error("logout response reported status {0}")]
    LogoutNotSuccess(String),
}

/// The assertion contents the flow controller hands on to session state
/// and the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAssertion {
    pub name_id: String,
    pub name_id_format: Option<String>,
    pub session_index: Option<String>,
    pub attributes: RawAttributes,
    pub in_response_to: Option<String>,
}

/// Everything the ACS handler needs to decide the request's fate:
/// whether the IdP authenticated the subject at all, the extracted
/// assertion, and every validation failure found along the way.
#[derive(Debug, Default)]
pub struct ResponseOutcome {
    pub authenticated: bool,
    pub assertion: Option<ValidatedAssertion>,
    pub errors: Vec<ValidationFailure>,
    pub last_reason: Option<String>,
}

impl ResponseOutcome {
    pub fn is_valid(&self) -> bool {
        self.authenticated && self.errors.is_empty()
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

impl SamlEngine {
    /// Run the full ACS validation pipeline. Violations are collected,
    /// not raised one by one, so every problem with a response can be
    /// reported together.
    pub(super) fn validate_response(
        &self,
        saml_response: &str,
        expected_request_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> ResponseOutcome {
        let mut outcome = ResponseOutcome::default();

        let decoded = match STANDARD.decode(saml_response.trim()) {
            Ok(bytes) => bytes,
            Err(err) => {
                return outcome.fail(ValidationFailure::Malformed(format!(
                    "base64 decode failed: {err}"
                )));
            }
        };
        let xml = match String::from_utf8(decoded) {
            Ok(xml) => xml,
            Err(err) => {
                return outcome.fail(ValidationFailure::Malformed(format!(
                    "response is not valid UTF-8: {err}"
                )));
            }
        };

        // Signature and schema verification belong to the library; its
        // verdict lands in the error list like any other check.
        if self.config().policy.require_signed_response {
            let ids = expected_request_id.map(|id| vec![id]);
            if let Err(err) = self
                .service_provider()
                .parse_xml_response(&xml, ids.as_deref())
            {
                outcome = outcome
                    .fail(ValidationFailure::Verification(err.to_string()));
            }
        }

        let response: samael::schema::Response = match xml.parse() {
            Ok(response) => response,
            Err(err) => {
                return outcome.fail(ValidationFailure::Malformed(format!(
                    "XML parse failed: {err}"
                )));
            }
        };

        let status_value = response
            .status
            .as_ref()
            .and_then(|status| status.status_code.value.clone());
        let status_ok = status_value.as_deref() == Some(STATUS_SUCCESS);
        if !status_ok {
            outcome = outcome.fail(ValidationFailure::StatusNotSuccess(
                status_value.unwrap_or_else(|| "unknown".to_string()),
            ));
        }

        if let Some(issuer) = response.issuer.as_ref().and_then(|i| i.value.clone()) {
            if issuer != self.config().idp.entity_id {
                outcome = outcome.fail(ValidationFailure::IssuerMismatch(
                    issuer,
                    self.config().idp.entity_id.clone(),
                ));
            }
        }

        if let Some(destination) = response.destination.clone() {
            if destination != self.config().sp.acs_url {
                outcome = outcome.fail(ValidationFailure::DestinationMismatch(
                    destination,
                    self.config().sp.acs_url.clone(),
                ));
            }
        }

        // InResponseTo correlation: a pending SP-initiated login must be
        // answered by the matching response, anything else is a replay or
        // forgery attempt.
        match (expected_request_id, response.in_response_to.clone()) {
            (Some(expected), Some(got)) if expected != got => {
                outcome = outcome.fail(ValidationFailure::RequestIdMismatch {
                    expected: expected.to_string(),
                    got,
                });
            }
            (Some(_), None) => {
                outcome =
                    outcome.fail(ValidationFailure::UnsolicitedResponse);
            }
            (None, Some(got)) => {
                outcome = outcome
                    .fail(ValidationFailure::UnexpectedInResponseTo(got));
            }
            (None, None) => {
                if !self.config().policy.allow_idp_initiated {
                    outcome = outcome
                        .fail(ValidationFailure::IdpInitiatedForbidden);
                }
            }
            _ => {}
        }

        let assertion = match response.assertion.as_ref() {
            Some(assertion) => assertion,
            None => {
                return outcome.fail(ValidationFailure::MissingAssertion);
            }
        };

        let skew = Duration::seconds(self.config().policy.clock_skew_secs);
        if let Some(conditions) = assertion.conditions.as_ref() {
            if let Some(not_before) = conditions.not_before {
                if now < not_before - skew {
                    outcome = outcome.fail(ValidationFailure::NotYetValid(
                        not_before.to_rfc3339(),
                    ));
                }
            }
            if let Some(not_on_or_after) = conditions.not_on_or_after {
                if now >= not_on_or_after + skew {
                    outcome = outcome.fail(ValidationFailure::Expired(
                        not_on_or_after.to_rfc3339(),
                    ));
                }
            }
            if let Some(restrictions) = conditions.audience_restrictions.as_ref()
            {
                let audiences: Vec<String> = restrictions
                    .iter()
                    .flat_map(|restriction| &restriction.audience)
                    .map(|audience| audience.clone())
                    .collect();
                if !audiences.is_empty()
                    && !audiences
                        .iter()
                        .any(|audience| *audience == self.config().sp.entity_id)
                {
                    outcome = outcome.fail(ValidationFailure::AudienceMismatch(
                        audiences.join(", "),
                        self.config().sp.entity_id.clone(),
                    ));
                }
            }
        }

        let name_id = assertion
            .subject
            .as_ref()
            .and_then(|subject| subject.name_id.as_ref());
        let Some(name_id) = name_id else {
            return outcome.fail(ValidationFailure::MissingNameId);
        };

        // The IdP asserted success for an identified subject. Validation
        // failures above still block the login, but as a 400 with the
        // itemized list rather than a 401.
        outcome.authenticated = status_ok;

        let session_index = assertion
            .authn_statements
            .as_ref()
            .and_then(|statements| statements.first())
            .and_then(|statement| statement.session_index.clone());

        let mut attributes = RawAttributes::new();
        if let Some(statements) = assertion.attribute_statements.as_ref() {
            for statement in statements {
                for attribute in &statement.attributes {
                    let Some(name) = attribute.name.clone() else {
                        continue;
                    };
                    let values: Vec<String> = attribute
                        .values
                        .iter()
                        .filter_map(|value| value.value.clone())
                        .collect();
                    if !values.is_empty() {
                        attributes.insert(name, values);
                    }
                }
            }
        }

        tracing::debug!(
            provider = %self.provider_name(),
            name_id = %name_id.value,
            errors = outcome.errors.len(),
            "processed ACS response"
        );

        outcome.assertion = Some(ValidatedAssertion {
            name_id: name_id.value.clone(),
            name_id_format: name_id.format.clone(),
            session_index,
            attributes,
            in_response_to: response.in_response_to.clone(),
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::test_provider;
    use super::super::SamlEngine;
    use super::*;
    use chrono::TimeZone;

    struct ResponseParams<'a> {
        in_response_to: Option<&'a str>,
        destination: &'a str,
        audience: &'a str,
        not_before: &'a str,
        not_on_or_after: &'a str,
        status: &'a str,
    }

    impl Default for ResponseParams<'_> {
        fn default() -> Self {
            Self {
                in_response_to: Some("_req1"),
                destination: "https://sp.example.com/sso/saml?acs",
                audience: "https://sp.example.com/metadata",
                not_before: "2026-03-01T11:00:00Z",
                not_on_or_after: "2026-03-01T13:00:00Z",
                status: STATUS_SUCCESS,
            }
        }
    }

    // Validation time used by every fixture.
    fn test_now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn response_xml(params: &ResponseParams<'_>) -> String {
        let in_response_to = params
            .in_response_to
            .map(|id| format!(" InResponseTo=\"{id}\""))
            .unwrap_or_default();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"
    xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"
    ID="_resp1" Version="2.0" IssueInstant="2026-03-01T12:00:00Z"
    Destination="{destination}"{in_response_to}>
    <saml:Issuer>https://idp.example.com</saml:Issuer>
    <samlp:Status>
        <samlp:StatusCode Value="{status}"/>
    </samlp:Status>
    <saml:Assertion ID="_assert1" Version="2.0" IssueInstant="2026-03-01T12:00:00Z">
        <saml:Issuer>https://idp.example.com</saml:Issuer>
        <saml:Subject>
            <saml:NameID Format="urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress">alice@example.com</saml:NameID>
        </saml:Subject>
        <saml:Conditions NotBefore="{not_before}" NotOnOrAfter="{not_on_or_after}">
            <saml:AudienceRestriction>
                <saml:Audience>{audience}</saml:Audience>
            </saml:AudienceRestriction>
        </saml:Conditions>
        <saml:AuthnStatement AuthnInstant="2026-03-01T12:00:00Z" SessionIndex="sid-123">
            <saml:AuthnContext>
                <saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:Password</saml:AuthnContextClassRef>
            </saml:AuthnContext>
        </saml:AuthnStatement>
        <saml:AttributeStatement>
            <saml:Attribute Name="uid">
                <saml:AttributeValue>alice</saml:AttributeValue>
            </saml:Attribute>
            <saml:Attribute Name="memberOf">
                <saml:AttributeValue>admins</saml:AttributeValue>
                <saml:AttributeValue>users</saml:AttributeValue>
            </saml:Attribute>
        </saml:AttributeStatement>
    </saml:Assertion>
</samlp:Response>"#,
            destination = params.destination,
            in_response_to = in_response_to,
            status = params.status,
            not_before = params.not_before,
            not_on_or_after = params.not_on_or_after,
            audience = params.audience,
        )
    }

    fn encode(xml: &str) -> String {
        STANDARD.encode(xml.as_bytes())
    }

    fn engine() -> SamlEngine {
        SamlEngine::new(test_provider()).unwrap()
    }

    #[test]
    fn test_valid_response_extracts_assertion() {
        let encoded = encode(&response_xml(&ResponseParams::default()));
        let outcome =
            engine().validate_response(&encoded, Some("_req1"), test_now());

        assert!(outcome.is_valid(), "unexpected errors: {:?}", outcome.errors);
        let assertion = outcome.assertion.unwrap();
        assert_eq!(assertion.name_id, "alice@example.com");
        assert_eq!(assertion.session_index.as_deref(), Some("sid-123"));
        assert_eq!(assertion.attributes["uid"], vec!["alice"]);
        assert_eq!(assertion.attributes["memberOf"], vec!["admins", "users"]);
    }

    #[test]
    fn test_expired_assertion_is_reported_not_fatal() {
        let params = ResponseParams {
            not_on_or_after: "2026-03-01T11:30:00Z",
            ..Default::default()
        };
        let outcome = engine().validate_response(
            &encode(&response_xml(&params)),
            Some("_req1"),
            test_now(),
        );

        assert!(outcome.authenticated);
        assert!(!outcome.errors.is_empty());
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, ValidationFailure::Expired(_))));
        assert!(outcome.last_reason.unwrap().contains("expired"));
    }

    #[test]
    fn test_not_yet_valid_assertion_is_reported() {
        let params = ResponseParams {
            not_before: "2026-03-01T12:30:00Z",
            ..Default::default()
        };
        let outcome = engine().validate_response(
            &encode(&response_xml(&params)),
            Some("_req1"),
            test_now(),
        );
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, ValidationFailure::NotYetValid(_))));
    }

    #[test]
    fn test_clock_skew_tolerates_small_drift() {
        // 60s past NotOnOrAfter is inside the configured 90s skew.
        let params = ResponseParams {
            not_on_or_after: "2026-03-01T11:59:00Z",
            ..Default::default()
        };
        let outcome = engine().validate_response(
            &encode(&response_xml(&params)),
            Some("_req1"),
            test_now(),
        );
        assert!(outcome.is_valid(), "{:?}", outcome.errors);
    }

    #[test]
    fn test_audience_mismatch_is_reported() {
        let params = ResponseParams {
            audience: "https://other-sp.example.com",
            ..Default::default()
        };
        let outcome = engine().validate_response(
            &encode(&response_xml(&params)),
            Some("_req1"),
            test_now(),
        );
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, ValidationFailure::AudienceMismatch(..))));
    }

    #[test]
    fn test_destination_mismatch_is_reported() {
        let params = ResponseParams {
            destination: "https://evil.example.com/acs",
            ..Default::default()
        };
        let outcome = engine().validate_response(
            &encode(&response_xml(&params)),
            Some("_req1"),
            test_now(),
        );
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, ValidationFailure::DestinationMismatch(..))));
    }

    #[test]
    fn test_in_response_to_mismatch_is_reported() {
        let outcome = engine().validate_response(
            &encode(&response_xml(&ResponseParams::default())),
            Some("_other"),
            test_now(),
        );
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, ValidationFailure::RequestIdMismatch { .. })));
    }

    #[test]
    fn test_pending_login_rejects_unsolicited_response() {
        let params = ResponseParams {
            in_response_to: None,
            ..Default::default()
        };
        let outcome = engine().validate_response(
            &encode(&response_xml(&params)),
            Some("_req1"),
            test_now(),
        );
        assert!(outcome
            .errors
            .contains(&ValidationFailure::UnsolicitedResponse));
    }

    #[test]
    fn test_idp_initiated_allowed_without_pending_login() {
        let params = ResponseParams {
            in_response_to: None,
            ..Default::default()
        };
        let outcome = engine().validate_response(
            &encode(&response_xml(&params)),
            None,
            test_now(),
        );
        assert!(outcome.is_valid(), "{:?}", outcome.errors);
    }

    #[test]
    fn test_failed_status_is_unauthenticated() {
        let params = ResponseParams {
            status: "urn:oasis:names:tc:SAML:2.0:status:Requester",
            ..Default::default()
        };
        let outcome = engine().validate_response(
            &encode(&response_xml(&params)),
            Some("_req1"),
            test_now(),
        );
        assert!(!outcome.authenticated);
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, ValidationFailure::StatusNotSuccess(_))));
    }

    #[test]
    fn test_unsigned_response_rejected_when_signature_required() {
        let mut config = test_provider();
        config.policy.require_signed_response = true;
        let engine = SamlEngine::new(config).unwrap();

        let outcome = engine.validate_response(
            &encode(&response_xml(&ResponseParams::default())),
            Some("_req1"),
            test_now(),
        );
        assert!(outcome
            .errors
            .iter()
            .any(|e| matches!(e, ValidationFailure::Verification(_))));
    }

    #[test]
    fn test_garbage_payload_is_malformed() {
        let outcome =
            engine().validate_response("not base64!!!", None, test_now());
        assert!(!outcome.authenticated);
        assert!(matches!(
            outcome.errors.first(),
            Some(ValidationFailure::Malformed(_))
        ));
    }
}
