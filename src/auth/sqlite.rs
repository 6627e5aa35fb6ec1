//! Relational credential backend (sqlite).

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use log::info;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

use crate::auth::{CredentialStore, Credentials};
use crate::error::AuthError;

pub struct SqliteCredentialStore {
    pool: Pool<Sqlite>,
    session_name: String,
}

impl SqliteCredentialStore {
    pub async fn connect(url: &str, session_name: &str) -> Result<Self, AuthError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // A single connection keeps in-memory databases coherent and is
        // plenty for one credential row per session.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                session    TEXT PRIMARY KEY,
                payload    TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(SqliteCredentialStore {
            pool,
            session_name: session_name.to_string(),
        })
    }

    pub async fn load_or_generate(&self) -> Result<Credentials, AuthError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM credentials WHERE session = ?1")
                .bind(&self.session_name)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((payload,)) => Ok(serde_json::from_str(&payload)?),
            None => {
                let creds = Credentials::generate();
                self.persist(&creds).await?;
                Ok(creds)
            }
        }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn persist(&self, creds: &Credentials) -> Result<(), AuthError> {
        let payload = serde_json::to_string(creds)?;
        sqlx::query(
            r#"
            INSERT INTO credentials (session, payload, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(session) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.session_name)
        .bind(&payload)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn erase(&self) -> Result<(), AuthError> {
        let result = sqlx::query("DELETE FROM credentials WHERE session = ?1")
            .bind(&self.session_name)
            .execute(&self.pool)
            .await?;
        info!(
            "[erase]: removed {} credential row(s) for session {}",
            result.rows_affected(),
            self.session_name
        );
        Ok(())
    }
}
