use std::{collections::HashMap, fs, ops::RangeInclusive};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Deserialize;
use validator::Validate;

use samlet_connect::config::ProviderConfig;
use samlet_connect::reconcile::{MappingPolicy, UserFieldMap};
use samlet_storage::user::lookup_column;

#[derive(Parser, Debug, Clone, Deserialize)]
#[command(name = "samlet")]
#[command(author, version, about, long_about = None)]
pub struct AppConfig {
    #[clap(long)]
    #[arg(short = 'c')]
    #[serde(default)]
    pub config: Option<String>,
    #[clap(long, env)]
    pub database_url: String,
    #[clap(long, env)]
    #[arg(default_value_t = 50)]
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    #[clap(long, env)]
    #[arg(default_value_t = 30)]
    #[serde(default = "default_min_idle")]
    pub min_idle: u32,
    #[clap(long, env)]
    #[arg(default_value_t = false)]
    #[serde(default)]
    pub run_migrations: bool,
    #[clap(long, env)]
    #[arg(default_value_t = String::from("samlet_server=info"))]
    #[serde(default = "default_rust_log")]
    pub rust_log: String,
    #[clap(long, env)]
    #[arg(value_parser = port_in_range, short = 'p', default_value_t = 30080)]
    #[serde(default = "default_port")]
    pub port: u16,
    #[clap(long, env)]
    pub cors_origin: String,
    #[clap(long, env)]
    #[arg(default_value_t = String::from("0.0.0.0"))]
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Path to the TOML file holding the SAML providers and user maps.
    #[clap(long, env)]
    #[arg(default_value_t = String::from("providers.toml"))]
    #[serde(default = "default_providers")]
    pub providers: String,
    /// Authenticated session lifetime in seconds.
    #[clap(long, env)]
    #[arg(default_value_t = 3600)]
    #[serde(default = "default_expiration")]
    pub expiration: i64,
}

/// The SAML half of the configuration: the ordered provider list, the
/// per-provider user-field maps, and the global mapping/redirect flags.
/// Loaded once at startup and passed explicitly into the components
/// that need it.
#[derive(Debug, Clone, Deserialize)]
pub struct SamlSettings {
    pub providers: Vec<ProviderConfig>,
    /// Provider name to its local-field resolution map.
    pub users_map: HashMap<String, UserFieldMap>,
    #[serde(default = "default_true")]
    pub strict_mapping: bool,
    #[serde(default)]
    pub sync_attributes: bool,
    #[serde(default = "default_lookup_attribute")]
    pub lookup_attribute: String,
    /// Fixed post-login redirect target; wins over RelayState.
    #[serde(default)]
    pub redirect: Option<String>,
    /// Query parameter carrying an explicit next-location on login.
    #[serde(default = "default_redirect_field")]
    pub redirect_field: String,
}

impl SamlSettings {
    pub fn mapping_policy(&self) -> MappingPolicy {
        if self.strict_mapping {
            MappingPolicy::Strict
        } else {
            MappingPolicy::Lenient
        }
    }
}

fn default_rust_log() -> String {
    String::from("samlet_server=info")
}

fn default_endpoint() -> String {
    String::from("0.0.0.0")
}

fn default_providers() -> String {
    String::from("providers.toml")
}

fn default_port() -> u16 {
    30080
}

fn default_max_size() -> u32 {
    50
}

fn default_min_idle() -> u32 {
    30
}

fn default_expiration() -> i64 {
    3600
}

fn default_true() -> bool {
    true
}

fn default_lookup_attribute() -> String {
    String::from("username")
}

fn default_redirect_field() -> String {
    String::from("next")
}

const PORT_RANGE: RangeInclusive<usize> = 1..=65535;

fn port_in_range(s: &str) -> Result<u16, String> {
    let port: usize = s
        .parse()
        .map_err(|_| format!("`{s}` isn't a port number"))?;
    if PORT_RANGE.contains(&port) {
        Ok(port as u16)
    } else {
        Err(format!(
            "port not in range {}-{}",
            PORT_RANGE.start(),
            PORT_RANGE.end()
        ))
    }
}

pub fn load(cfg: &str) -> Result<AppConfig> {
    let content =
        fs::read_to_string(cfg).context("could not read config file")?;
    toml::from_str(&content).context("could not parse config file")
}

pub fn load_settings(path: &str) -> Result<SamlSettings> {
    let content = fs::read_to_string(path)
        .context("could not read the SAML providers file")?;
    let settings: SamlSettings = toml::from_str(&content)
        .context("could not parse the SAML providers file")?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_settings(settings: &SamlSettings) -> Result<()> {
    lookup_column(&settings.lookup_attribute)
        .map_err(|err| anyhow!("{err}"))?;
    for provider in &settings.providers {
        provider.validate().with_context(|| {
            format!("provider {} failed validation", provider.name)
        })?;
        if !settings.users_map.contains_key(&provider.name) {
            return Err(anyhow!(
                "no users_map entry for provider {}",
                provider.name
            ));
        }
    }
    Ok(())
}
