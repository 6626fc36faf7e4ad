pub mod config;
pub mod mapper;
pub mod reconcile;
pub mod registry;
pub mod request;
pub mod saml;

use std::collections::HashMap;

/// Attribute statement as delivered by the IdP: attribute name to one or
/// more string values. Never mutated after extraction.
pub type RawAttributes = HashMap<String, Vec<String>>;
