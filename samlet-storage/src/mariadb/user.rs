use async_trait::async_trait;
use sqlx::{mysql::MySqlRow, MySqlPool, Row};
use uuid::Uuid;

use samlet_connect::reconcile::{FieldValue, FinalUserRecord};
use samlet_core::{errors, Result};

use crate::user::{lookup_column, IdentityStore, Lookup, User};

#[derive(Clone, Debug)]
pub struct UserImpl {
    pool: MySqlPool,
}

impl UserImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn fetch(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            r#"SELECT `id`,`username`,`email`,`display_name`,`attributes`,
            `created_at`,`updated_at`
            FROM `user` WHERE `{column}` = ?;"#
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(errors::any)?;
        row.map(user_from_row).transpose()
    }
}

#[async_trait]
impl IdentityStore for UserImpl {
    #[tracing::instrument(skip(record))]
    async fn find_or_create(
        &self,
        lookup: &Lookup,
        record: &FinalUserRecord,
    ) -> Result<User> {
        let column = lookup_column(&lookup.field)?;
        if let Some(user) = self.fetch(column, &lookup.value).await? {
            return Ok(user);
        }

        let fields = RecordFields::new(lookup, record)?;
        // The no-op update makes concurrent first-logins of the same
        // subject converge on the single row behind the unique index.
        sqlx::query(
            r#"INSERT INTO `user`
            (`id`,`username`,`email`,`display_name`,`attributes`)
            VALUES(?,?,?,?,?)
            ON DUPLICATE KEY UPDATE `id` = `id`;"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&fields.username)
        .bind(&fields.email)
        .bind(&fields.display_name)
        .bind(&fields.attributes)
        .execute(&self.pool)
        .await
        .map_err(errors::any)?;

        self.fetch(column, &lookup.value).await?.ok_or_else(|| {
            errors::not_found(&format!(
                "user with {} {} vanished after upsert",
                lookup.field, lookup.value
            ))
        })
    }

    #[tracing::instrument(skip(record))]
    async fn find_and_update(
        &self,
        lookup: &Lookup,
        record: &FinalUserRecord,
    ) -> Result<User> {
        let column = lookup_column(&lookup.field)?;
        let fields = RecordFields::new(lookup, record)?;
        sqlx::query(
            r#"INSERT INTO `user`
            (`id`,`username`,`email`,`display_name`,`attributes`)
            VALUES(?,?,?,?,?)
            ON DUPLICATE KEY UPDATE
            `email` = VALUES(`email`),
            `display_name` = VALUES(`display_name`),
            `attributes` = VALUES(`attributes`);"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&fields.username)
        .bind(&fields.email)
        .bind(&fields.display_name)
        .bind(&fields.attributes)
        .execute(&self.pool)
        .await
        .map_err(errors::any)?;

        self.fetch(column, &lookup.value).await?.ok_or_else(|| {
            errors::not_found(&format!(
                "user with {} {} vanished after upsert",
                lookup.field, lookup.value
            ))
        })
    }
}

struct RecordFields {
    username: String,
    email: Option<String>,
    display_name: Option<String>,
    attributes: String,
}

impl RecordFields {
    fn new(lookup: &Lookup, record: &FinalUserRecord) -> Result<Self> {
        let username = match field_string(record, "username") {
            Some(username) => username,
            // A lookup by email may legitimately map no username field.
            None if lookup.field == "email" => lookup.value.clone(),
            None => {
                return Err(errors::data(
                    "reconciled record resolves no username",
                ));
            }
        };
        Ok(Self {
            username,
            email: field_string(record, "email"),
            display_name: field_string(record, "display_name"),
            attributes: serde_json::to_string(record)
                .map_err(errors::any)?,
        })
    }
}

fn field_string(record: &FinalUserRecord, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(|value| value.as_ref())
        .and_then(FieldValue::first)
        .map(str::to_string)
}

fn user_from_row(row: MySqlRow) -> Result<User> {
    let attributes: String =
        row.try_get("attributes").map_err(errors::any)?;
    Ok(User {
        id: row.try_get("id").map_err(errors::any)?,
        username: row.try_get("username").map_err(errors::any)?,
        email: row.try_get("email").map_err(errors::any)?,
        display_name: row.try_get("display_name").map_err(errors::any)?,
        attributes: serde_json::from_str(&attributes)
            .map_err(errors::any)?,
        created_at: row.try_get("created_at").map_err(errors::any)?,
        updated_at: row.try_get("updated_at").map_err(errors::any)?,
    })
}
