use serde::{Deserialize, Serialize};
use validator::Validate;

/// NameID format requested from the IdP when none is configured.
pub const NAMEID_FORMAT_UNSPECIFIED: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";

/// One configured identity provider together with the SP-side settings
/// used when talking to it. Immutable once loaded.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProviderConfig {
    /// Registry key, matched against the `provider` request parameter.
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(nested)]
    pub sp: SpConfig,
    #[validate(nested)]
    pub idp: IdpConfig,
    #[serde(default)]
    pub policy: SecurityPolicy,
}

/// Service-provider half of a provider entry.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SpConfig {
    #[validate(length(min = 1))]
    pub entity_id: String,
    /// Where the IdP posts authentication responses back to us.
    #[validate(url)]
    pub acs_url: String,
    #[serde(default)]
    #[validate(url)]
    pub slo_url: Option<String>,
    /// SP certificate (PEM), published in metadata when present.
    #[serde(default)]
    pub certificate: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default = "default_name_id_format")]
    pub name_id_format: String,
}

/// Identity-provider half of a provider entry.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IdpConfig {
    #[validate(length(min = 1))]
    pub entity_id: String,
    #[validate(url)]
    pub sso_url: String,
    #[serde(default)]
    #[validate(url)]
    pub slo_url: Option<String>,
    /// IdP signing certificate (PEM), used to verify responses.
    #[validate(length(min = 1))]
    pub certificate: String,
    /// Renames IdP attribute keys before field mapping is applied.
    #[serde(default)]
    pub attribute_map: Option<Vec<AttributePair>>,
}

/// One `(external, internal)` rename applied to IdP attribute keys.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AttributePair {
    pub external: String,
    pub internal: String,
}

/// Per-provider security policy flags.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityPolicy {
    #[serde(default = "default_true")]
    pub require_signed_response: bool,
    /// Tolerated drift when checking NotBefore/NotOnOrAfter.
    #[serde(default = "default_clock_skew")]
    pub clock_skew_secs: i64,
    #[serde(default = "default_true")]
    pub allow_idp_initiated: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            require_signed_response: true,
            clock_skew_secs: default_clock_skew(),
            allow_idp_initiated: true,
        }
    }
}

/// How one local user field is resolved from the attribute statement:
/// either a bare source-attribute name, or a structured spec with an
/// optional value index, default and user-facing error message.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum UserFieldSpec {
    Direct(String),
    Expanded(ExpandedFieldSpec),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExpandedFieldSpec {
    /// Source attribute name in the (already renamed) statement.
    pub key: String,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub error_msg: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_clock_skew() -> i64 {
    90
}

fn default_name_id_format() -> String {
    NAMEID_FORMAT_UNSPECIFIED.to_string()
}
