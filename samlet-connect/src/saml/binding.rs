//! HTTP-Redirect binding plumbing: DEFLATE + base64 payload coding and
//! redirect URL assembly.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine};

use samlet_core::{errors, Result};

/// Deflate and base64-encode an XML message for the redirect binding.
pub(super) fn deflate_and_encode(xml: &str) -> Result<String> {
    let mut encoder = flate2::write::DeflateEncoder::new(
        Vec::new(),
        flate2::Compression::default(),
    );
    encoder.write_all(xml.as_bytes()).map_err(errors::any)?;
    let compressed = encoder.finish().map_err(errors::any)?;
    Ok(STANDARD.encode(compressed))
}

/// Decode a redirect-binding payload. The binding deflates the XML, but
/// some IdPs deliver it uncompressed; fall back to the raw bytes.
pub(super) fn decode_message(encoded: &str) -> Result<String> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|err| errors::bad_request(&format!("invalid base64 payload: {err}")))?;
    let mut xml = String::new();
    let mut inflater = flate2::read::DeflateDecoder::new(&raw[..]);
    if inflater.read_to_string(&mut xml).is_ok() && !xml.is_empty() {
        return Ok(xml);
    }
    String::from_utf8(raw)
        .map_err(|err| errors::bad_request(&format!("payload is not valid UTF-8: {err}")))
}

/// Append a SAML message parameter (and optional RelayState) to an
/// endpoint URL, keeping any query string the endpoint already carries.
pub(super) fn redirect_url(
    endpoint: &str,
    parameter: &str,
    payload: &str,
    relay_state: Option<&str>,
) -> String {
    let mut url = String::from(endpoint);
    if endpoint.contains('?') {
        url.push('&');
    } else {
        url.push('?');
    }
    url.push_str(parameter);
    url.push('=');
    url.push_str(&urlencoding::encode(payload));
    if let Some(state) = relay_state {
        url.push_str("&RelayState=");
        url.push_str(&urlencoding::encode(state));
    }
    url
}
