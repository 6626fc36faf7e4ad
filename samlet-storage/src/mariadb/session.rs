use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row};

use samlet_core::{errors, Result};

use crate::session::{Session, SessionStore};

#[derive(Clone, Debug)]
pub struct SessionImpl {
    pool: MySqlPool,
}

impl SessionImpl {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SessionImpl {
    #[tracing::instrument]
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            r#"SELECT `id`,`provider`,`name_id`,`name_id_format`,
            `session_index`,`pending_request_id`,`attributes`,`expiry`
            FROM `session`
            WHERE `id` = ? AND (`expiry` = 0 OR `expiry` > ?);"#,
        )
        .bind(id)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await
        .map_err(errors::any)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let attributes: String =
            row.try_get("attributes").map_err(errors::any)?;
        Ok(Some(Session {
            id: row.try_get("id").map_err(errors::any)?,
            provider: row.try_get("provider").map_err(errors::any)?,
            name_id: row.try_get("name_id").map_err(errors::any)?,
            name_id_format: row
                .try_get("name_id_format")
                .map_err(errors::any)?,
            session_index: row
                .try_get("session_index")
                .map_err(errors::any)?,
            pending_request_id: row
                .try_get("pending_request_id")
                .map_err(errors::any)?,
            attributes: serde_json::from_str(&attributes)
                .map_err(errors::any)?,
            expiry: row.try_get("expiry").map_err(errors::any)?,
        }))
    }

    #[tracing::instrument(skip(session))]
    async fn put(&self, session: &Session) -> Result<()> {
        let attributes =
            serde_json::to_string(&session.attributes).map_err(errors::any)?;
        sqlx::query(
            r#"REPLACE INTO `session`
            (`id`,`provider`,`name_id`,`name_id_format`,`session_index`,
            `pending_request_id`,`attributes`,`expiry`)
            VALUES(?,?,?,?,?,?,?,?);"#,
        )
        .bind(&session.id)
        .bind(&session.provider)
        .bind(&session.name_id)
        .bind(&session.name_id_format)
        .bind(&session.session_index)
        .bind(&session.pending_request_id)
        .bind(attributes)
        .bind(session.expiry)
        .execute(&self.pool)
        .await
        .map_err(errors::any)?;
        Ok(())
    }

    #[tracing::instrument]
    async fn clear(&self, id: &str) -> Result<()> {
        sqlx::query(r#"DELETE FROM `session` WHERE `id` = ?;"#)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(errors::any)?;
        Ok(())
    }
}
