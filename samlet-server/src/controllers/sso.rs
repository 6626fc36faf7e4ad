use askama::Template;
use axum::{
    body::Body,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use http::{
    header::{CONTENT_TYPE, SET_COOKIE},
    HeaderValue, StatusCode,
};

use samlet_connect::registry::PROVIDER_PARAM;
use samlet_connect::saml::Connector;
use samlet_core::{errors, HtmlTemplate, Result};

use crate::{
    services::flow::{self, FlowReply},
    valid::{SamlContext, SessionId, SESSION_COOKIE},
    AppState,
};

pub fn new_router(state: AppState) -> Router {
    Router::new()
        .route("/sso/saml", get(saml_login).post(saml_login))
        .route("/sso/saml/metadata", get(metadata))
        .with_state(state)
}

/// The multiplexed login/ACS/SLO/SLS endpoint. Dispatch happens in the
/// flow service; this handler resolves the provider, translates the
/// reply and owns the session cookie.
async fn saml_login(
    app: AppState,
    session: SessionId,
    SamlContext(mut ctx): SamlContext,
) -> Result<Response> {
    let explicit_provider = ctx.has_query_param(PROVIDER_PARAM);
    let (name, idx) = app.registry.resolve(&mut ctx)?;
    let provider = app
        .registry
        .get(idx)
        .ok_or_else(|| errors::unknown_provider(&name))?;
    let connector = app
        .engines
        .get(idx)
        .ok_or_else(|| errors::unknown_provider(&name))?;

    let reply = flow::saml_login(
        connector,
        &app.store.session,
        &app.store.user,
        &app.settings,
        app.hook.as_deref(),
        provider,
        &ctx,
        &session.id,
        app.config.expiration,
        explicit_provider,
    )
    .await?;
    Ok(respond(reply, &session))
}

/// Stateless SP metadata endpoint: the document on success, the joined
/// violation listing with a server error otherwise.
async fn metadata(
    app: AppState,
    SamlContext(mut ctx): SamlContext,
) -> Result<Response> {
    let (name, idx) = app.registry.resolve(&mut ctx)?;
    let connector = app
        .engines
        .get(idx)
        .ok_or_else(|| errors::unknown_provider(&name))?;

    let response = match connector.metadata() {
        Ok(xml) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/xml")
            .body(Body::from(xml))
            .map_err(errors::any)?,
        Err(violations) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from(violations.join(", ")))
            .map_err(errors::any)?,
    };
    Ok(response)
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorPage {
    message: String,
}

fn respond(reply: FlowReply, session: &SessionId) -> Response {
    let mut response = match reply {
        FlowReply::Redirect(url) => Redirect::to(&url).into_response(),
        FlowReply::BadRequest(body) => {
            (StatusCode::BAD_REQUEST, body).into_response()
        }
        FlowReply::Unauthorized => {
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
        FlowReply::MappingError(message) => {
            HtmlTemplate(ErrorPage { message }).into_response()
        }
    };
    if session.is_new {
        if let Ok(value) = HeaderValue::from_str(&format!(
            "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
            session.id
        )) {
            response.headers_mut().insert(SET_COOKIE, value);
        }
    }
    response
}
