use async_trait::async_trait;
use chrono::NaiveDateTime;
use mockall::automock;
use serde::{Deserialize, Serialize};

use samlet_connect::reconcile::FinalUserRecord;
use samlet_core::{errors, Result};

/// A local identity row. `attributes` keeps the full reconciled record
/// as delivered at the last login.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub attributes: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// The key a reconciled login resolves an identity by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub field: String,
    pub value: String,
}

/// Columns a lookup may address. Anything else is a configuration
/// mistake, not user input.
pub fn lookup_column(field: &str) -> Result<&'static str> {
    match field {
        "username" => Ok("username"),
        "email" => Ok("email"),
        _ => Err(errors::configuration(&format!(
            "lookup attribute {field} is not a user column"
        ))),
    }
}

/// The external identity store. The upsert must be atomic per lookup
/// key so concurrent first-logins of the same subject cannot create
/// duplicate identities.
#[automock]
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Fetch the identity for the lookup key, creating it from the
    /// reconciled record when absent. Existing attributes are left
    /// untouched.
    async fn find_or_create(
        &self,
        lookup: &Lookup,
        record: &FinalUserRecord,
    ) -> Result<User>;

    /// Fetch the identity for the lookup key, creating it when absent
    /// and otherwise syncing its fields from the reconciled record.
    async fn find_and_update(
        &self,
        lookup: &Lookup,
        record: &FinalUserRecord,
    ) -> Result<User>;
}
