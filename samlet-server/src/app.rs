use std::{ops::Deref, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use sqlx::MySqlPool;
use tracing::info;

use samlet_connect::registry::ProviderRegistry;
use samlet_connect::saml::SamlEngine;
use samlet_core::errors;

use crate::{config, services::flow::PostLoginHook, AppConfig, SamlSettings};

pub struct App {
    pub config: AppConfig,
    pub settings: SamlSettings,
    pub registry: ProviderRegistry,
    /// One engine per provider, aligned with the registry's index.
    pub engines: Vec<SamlEngine>,
    pub store: Store,
    pub hook: Option<Arc<dyn PostLoginHook>>,
}

impl App {
    pub fn new(pool: MySqlPool, config: AppConfig) -> Result<Self> {
        info!("loading SAML provider settings...");
        let settings = config::load_settings(&config.providers)?;

        let mut engines = Vec::with_capacity(settings.providers.len());
        for provider in &settings.providers {
            engines.push(
                SamlEngine::new(provider.clone())
                    .map_err(|err| anyhow!("{err}"))?,
            );
            info!(provider = %provider.name, "initialized SAML engine");
        }
        let registry = ProviderRegistry::new(settings.providers.clone())
            .map_err(|err| anyhow!("{err}"))?;

        let store = Store::new(pool);
        info!("feature services successfully initialized!");
        Ok(Self {
            config,
            settings,
            registry,
            engines,
            store,
            hook: None,
        })
    }

    /// Install the post-login hook, invoked at most once per successful
    /// reconciliation. Hook failures abort the login.
    pub fn with_hook(mut self, hook: Arc<dyn PostLoginHook>) -> Self {
        self.hook = Some(hook);
        self
    }
}

pub struct Store {
    pub user: samlet_storage::UserImpl,
    pub session: samlet_storage::SessionImpl,
}

impl Store {
    pub fn new(pool: MySqlPool) -> Self {
        let user = samlet_storage::UserImpl::new(pool.clone());
        let session = samlet_storage::SessionImpl::new(pool);
        Self { user, session }
    }
}

#[derive(Clone)]
pub struct AppState(pub Arc<App>);

// deref so you can still access the inner fields easily
impl Deref for AppState {
    type Target = App;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AppState
where
    Self: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = errors::WithBacktrace;
    async fn from_request_parts(
        _: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self::from_ref(state))
    }
}
