use std::collections::HashMap;

use axum::extract::{FromRequest, FromRequestParts, Request};
use http::{header, request::Parts, HeaderMap, Method};
use uuid::Uuid;

use samlet_connect::request::RequestDescriptor;
use samlet_core::errors::{self, WithBacktrace};

/// Session cookie carrying the scoped session-store key.
pub const SESSION_COOKIE: &str = "samlet_session";

/// Builds the protocol-neutral [`RequestDescriptor`] from the transport
/// request: query and form parameters, host and scheme with proxy
/// forwarding headers applied.
pub struct SamlContext(pub RequestDescriptor);

impl<S> FromRequest<S> for SamlContext
where
    S: Send + Sync,
{
    type Rejection = WithBacktrace;

    async fn from_request(
        req: Request,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let (parts, body) = req.into_parts();

        let get_data: HashMap<String, String> =
            serde_urlencoded::from_str(parts.uri.query().unwrap_or_default())
                .map_err(|err| errors::bad_request(&err))?;

        let https = forwarded_proto(&parts.headers)
            .map(|proto| proto.eq_ignore_ascii_case("https"))
            .unwrap_or_else(|| {
                parts.uri.scheme_str() == Some("https")
            });
        let http_host = host(&parts.headers);
        let script_name = parts.uri.path().to_string();

        let mut post_data = HashMap::new();
        if parts.method == Method::POST && is_form(&parts.headers) {
            let bytes = axum::body::to_bytes(body, 2 * 1024 * 1024)
                .await
                .map_err(|err| errors::bad_request(&err))?;
            post_data = serde_urlencoded::from_bytes(&bytes)
                .map_err(|err| errors::bad_request(&err))?;
        }

        Ok(Self(RequestDescriptor {
            https,
            http_host,
            script_name,
            get_data,
            post_data,
        }))
    }
}

fn forwarded_proto(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("X-Forwarded-Proto")
        .and_then(|value| value.to_str().ok())
}

fn host(headers: &HeaderMap) -> String {
    if let Some(host) = headers.get("X-Forwarded-Host") {
        return host.to_str().unwrap_or_default().to_string();
    }
    headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

/// The session-store key for the calling agent. A fresh id is minted
/// when the cookie is absent; the controller sets it on the response.
pub struct SessionId {
    pub id: String,
    pub is_new: bool,
}

impl<S> FromRequestParts<S> for SessionId
where
    S: Send + Sync,
{
    type Rejection = WithBacktrace;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        for value in parts.headers.get_all(header::COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            for cookie in value.split(';') {
                if let Some((name, id)) = cookie.trim().split_once('=') {
                    if name == SESSION_COOKIE && !id.is_empty() {
                        return Ok(Self {
                            id: id.to_string(),
                            is_new: false,
                        });
                    }
                }
            }
        }
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            is_new: true,
        })
    }
}
