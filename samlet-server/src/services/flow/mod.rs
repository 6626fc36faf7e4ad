mod backend;

pub use backend::{authenticate, PostLoginHook};

use chrono::Utc;

use samlet_connect::config::ProviderConfig;
use samlet_connect::request::RequestDescriptor;
use samlet_connect::saml::Connector;
use samlet_core::errors::Code;
use samlet_core::Result;
use samlet_storage::{IdentityStore, Session, SessionStore};

use crate::SamlSettings;

/// What the multiplexed SSO endpoint answers with. The controller turns
/// this into the transport response and owns the session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowReply {
    Redirect(String),
    /// Itemized validation failures, preformatted for the body.
    BadRequest(String),
    Unauthorized,
    /// Strict-mapping failure, rendered as an error page.
    MappingError(String),
}

/// The login/logout state machine behind the multiplexed endpoint.
/// Dispatch is decided by which request parameter is present, first
/// match wins: `acs`, `slo`, `sls`, then login initiation.
///
/// `explicit_provider` records whether the request named a provider
/// before the registry's write-back; an initiation without one starts a
/// login with no explicit return target.
#[allow(clippy::too_many_arguments)]
pub async fn saml_login<C, S, U>(
    connector: &C,
    session_store: &S,
    user_store: &U,
    settings: &SamlSettings,
    hook: Option<&dyn PostLoginHook>,
    provider: &ProviderConfig,
    req: &RequestDescriptor,
    session_id: &str,
    session_ttl: i64,
    explicit_provider: bool,
) -> Result<FlowReply>
where
    C: Connector,
    S: SessionStore,
    U: IdentityStore,
{
    if req.has_query_param("acs") {
        consume_assertion(
            connector,
            session_store,
            user_store,
            settings,
            hook,
            provider,
            req,
            session_id,
            session_ttl,
        )
        .await
    } else if req.has_query_param("slo") {
        initiate_logout(connector, session_store, session_id).await
    } else if req.has_query_param("sls") {
        consume_logout(connector, session_store, req, session_id).await
    } else {
        initiate_login(
            connector,
            session_store,
            settings,
            provider,
            req,
            session_id,
            session_ttl,
            explicit_provider,
        )
        .await
    }
}

/// ACS: validate the IdP's response, populate session state, reconcile
/// the local identity and redirect.
#[allow(clippy::too_many_arguments)]
async fn consume_assertion<C, S, U>(
    connector: &C,
    session_store: &S,
    user_store: &U,
    settings: &SamlSettings,
    hook: Option<&dyn PostLoginHook>,
    provider: &ProviderConfig,
    req: &RequestDescriptor,
    session_id: &str,
    session_ttl: i64,
) -> Result<FlowReply>
where
    C: Connector,
    S: SessionStore,
    U: IdentityStore,
{
    let Some(saml_response) = req
        .form_param("SAMLResponse")
        .or_else(|| req.query_param("SAMLResponse"))
    else {
        return Ok(FlowReply::BadRequest(
            "ACS request carries no SAMLResponse".to_string(),
        ));
    };

    let pending_request_id = session_store
        .get(session_id)
        .await?
        .and_then(|session| session.pending_request_id);

    let outcome = connector
        .consume_response(saml_response, pending_request_id)
        .await?;

    if !outcome.authenticated {
        return Ok(FlowReply::Unauthorized);
    }
    if !outcome.errors.is_empty() {
        return Ok(FlowReply::BadRequest(format!(
            "errors found in SAML request: [{}], reason: {}",
            outcome.error_strings().join(", "),
            outcome.last_reason.clone().unwrap_or_default(),
        )));
    }
    let assertion = outcome.assertion.ok_or_else(|| {
        samlet_core::errors::bad_request(
            "valid response carries no assertion",
        )
    })?;

    // Correlation is complete, the pending request id dies with it.
    let session = Session {
        id: session_id.to_string(),
        provider: provider.name.clone(),
        name_id: Some(assertion.name_id.clone()),
        name_id_format: assertion.name_id_format.clone(),
        session_index: assertion.session_index.clone(),
        pending_request_id: None,
        attributes: assertion.attributes.clone(),
        expiry: Utc::now().timestamp() + session_ttl,
    };
    session_store.put(&session).await?;

    match authenticate(user_store, settings, provider, &session, hook).await
    {
        Ok(user) => {
            tracing::info!(
                provider = %provider.name,
                user = %user.username,
                "SAML login complete"
            );
        }
        Err(err) => {
            // Strict-mapping failures render a page; everything else is
            // a real fault and aborts the request.
            if let Code::Data(message) = err.source() {
                return Ok(FlowReply::MappingError(message.clone()));
            }
            return Err(err);
        }
    }

    let target = if let Some(redirect) = settings.redirect.as_deref() {
        redirect.to_string()
    } else {
        match req.form_param("RelayState") {
            Some(relay) if relay != req.self_url() => relay.to_string(),
            _ => req.self_url(),
        }
    };
    Ok(FlowReply::Redirect(target))
}

/// SLO: the local session dies immediately, then the agent is sent to
/// the IdP with a LogoutRequest.
async fn initiate_logout<C, S>(
    connector: &C,
    session_store: &S,
    session_id: &str,
) -> Result<FlowReply>
where
    C: Connector,
    S: SessionStore,
{
    let session = session_store.get(session_id).await?;
    session_store.clear(session_id).await?;

    let (name_id, session_index) = session
        .map(|session| (session.name_id, session.session_index))
        .unwrap_or((None, None));
    let url = connector.logout_url(name_id, session_index).await?;
    Ok(FlowReply::Redirect(url))
}

/// SLS: the local session dies, the IdP's logout message is consumed
/// and the agent follows the IdP's instruction.
async fn consume_logout<C, S>(
    connector: &C,
    session_store: &S,
    req: &RequestDescriptor,
    session_id: &str,
) -> Result<FlowReply>
where
    C: Connector,
    S: SessionStore,
{
    session_store.clear(session_id).await?;

    let outcome = connector.process_slo(req).await?;
    if !outcome.is_valid() {
        return Ok(FlowReply::BadRequest(format!(
            "errors found in SAML logout request: [{}], reason: {}",
            outcome.error_strings().join(", "),
            outcome.last_reason.clone().unwrap_or_default(),
        )));
    }
    let target = outcome
        .redirect_url
        .unwrap_or_else(|| req.self_url());
    Ok(FlowReply::Redirect(target))
}

/// SP-initiated login: resolve the return target, redirect into an
/// AuthnRequest and hold its id for response correlation.
#[allow(clippy::too_many_arguments)]
async fn initiate_login<C, S>(
    connector: &C,
    session_store: &S,
    settings: &SamlSettings,
    provider: &ProviderConfig,
    req: &RequestDescriptor,
    session_id: &str,
    session_ttl: i64,
    explicit_provider: bool,
) -> Result<FlowReply>
where
    C: Connector,
    S: SessionStore,
{
    // Target precedence: fixed redirect > explicit next-location >
    // RelayState form value. A request that named no provider starts a
    // login with no explicit target at all.
    let target = if explicit_provider {
        settings
            .redirect
            .clone()
            .or_else(|| {
                req.query_param(&settings.redirect_field)
                    .map(str::to_string)
            })
            .or_else(|| req.form_param("RelayState").map(str::to_string))
    } else {
        settings.redirect.clone()
    };

    let redirect = connector.login_url(req, target).await?;

    let mut session = session_store
        .get(session_id)
        .await?
        .unwrap_or_default();
    session.id = session_id.to_string();
    session.provider = provider.name.clone();
    session.pending_request_id = Some(redirect.request_id.clone());
    session.expiry = Utc::now().timestamp() + session_ttl;
    session_store.put(&session).await?;

    Ok(FlowReply::Redirect(redirect.url))
}
