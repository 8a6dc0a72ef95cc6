//! PostgreSQL-backed [`CredentialStore`].

use super::{
    AuthSettings, AuthSettingsUpdate, Authenticator, ClientDraft, CredentialStore, DeviceType,
    MergeSummary, OAuthClient, User, UserInsert,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{Instrument, Span, info_span};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

const USER_COLUMNS: &str = "id, username, password_hash, totp_secret, email, current_challenge, \
     disabled, EXTRACT(EPOCH FROM created_at)::bigint AS created_at_unix";

const AUTHENTICATOR_COLUMNS: &str = "credential_id, user_id, public_key, counter, device_type, \
     backed_up, transports, EXTRACT(EPOCH FROM created_at)::bigint AS created_at_unix";

const CLIENT_COLUMNS: &str = "id, owner_id, name, client_id, client_secret, authorize_url, \
     token_url, end_session_url, jwks_url, redirect_uri, scope, custom_attributes, \
     EXTRACT(EPOCH FROM created_at)::bigint AS created_at_unix";

/// Clears the pending challenge and returns the value it held before the update.
const TAKE_CHALLENGE_SQL: &str = "\
    WITH old AS (SELECT id, current_challenge FROM users WHERE id = $1 FOR UPDATE) \
    UPDATE users SET current_challenge = NULL FROM old \
    WHERE users.id = old.id \
    RETURNING old.current_challenge";

/// Rows are only touched when the counter advances or both values are zero.
const ADVANCE_COUNTER_SQL: &str = "\
    UPDATE authenticators SET counter = $2, public_key = $3 \
    WHERE credential_id = $1 AND (counter < $2 OR (counter = 0 AND $2 = 0))";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply `sql/schema.sql`. Every statement is idempotent.
    ///
    /// # Errors
    /// Returns an error if any statement fails.
    pub async fn migrate(&self) -> Result<()> {
        for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
            sqlx::query(statement)
                .execute(&self.pool)
                .instrument(db_span("DDL", statement))
                .await
                .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
        }
        Ok(())
    }

    async fn fetch_user(&self, query: &str, bind: UserKey<'_>) -> Result<Option<User>> {
        let q = sqlx::query(query);
        let q = match bind {
            UserKey::Id(id) => q.bind(id),
            UserKey::Username(name) => q.bind(name),
        };
        let row = q
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup user")?;
        Ok(row.as_ref().map(user_from_row))
    }
}

enum UserKey<'a> {
    Id(Uuid),
    Username(&'a str),
}

fn db_span(operation: &'static str, statement: &str) -> Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    sql.lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        totp_secret: row.get("totp_secret"),
        email: row.get("email"),
        current_challenge: row.get("current_challenge"),
        disabled: row.get("disabled"),
        created_at: row.get("created_at_unix"),
    }
}

fn authenticator_from_row(row: &PgRow) -> Authenticator {
    let counter: i64 = row.get("counter");
    let device_type: String = row.get("device_type");
    Authenticator {
        credential_id: row.get("credential_id"),
        user_id: row.get("user_id"),
        public_key: row.get("public_key"),
        counter: u32::try_from(counter).unwrap_or(u32::MAX),
        device_type: DeviceType::parse(&device_type),
        backed_up: row.get("backed_up"),
        transports: row.get("transports"),
        created_at: row.get("created_at_unix"),
    }
}

fn client_from_row(row: &PgRow) -> Result<OAuthClient> {
    let attributes: String = row.get("custom_attributes");
    Ok(OAuthClient {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        client_id: row.get("client_id"),
        client_secret: row.get("client_secret"),
        authorize_url: row.get("authorize_url"),
        token_url: row.get("token_url"),
        end_session_url: row.get("end_session_url"),
        jwks_url: row.get("jwks_url"),
        redirect_uri: row.get("redirect_uri"),
        scope: row.get("scope"),
        custom_attributes: decode_attributes(&attributes)?,
        created_at: row.get("created_at_unix"),
    })
}

fn encode_attributes(attributes: &IndexMap<String, String>) -> Result<String> {
    let pairs: Vec<(&String, &String)> = attributes.iter().collect();
    serde_json::to_string(&pairs).context("failed to encode custom attributes")
}

fn decode_attributes(raw: &str) -> Result<IndexMap<String, String>> {
    let pairs: Vec<(String, String)> =
        serde_json::from_str(raw).context("failed to decode custom attributes")?;
    Ok(pairs.into_iter().collect())
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn get_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        self.fetch_user(&query, UserKey::Id(id)).await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        self.fetch_user(&query, UserKey::Username(username)).await
    }

    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        email: Option<&str>,
    ) -> Result<UserInsert> {
        let query = format!(
            "INSERT INTO users (id, username, password_hash, email) VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(username)
            .bind(password_hash)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await;

        match row {
            Ok(row) => Ok(UserInsert::Created(user_from_row(&row))),
            Err(err) if is_unique_violation(&err) => Ok(UserInsert::UsernameTaken),
            Err(err) => Err(err).context("failed to insert user"),
        }
    }

    async fn update_user_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let query = "UPDATE users SET password_hash = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update password")?;
        Ok(())
    }

    async fn update_user_status(&self, id: Uuid, disabled: bool) -> Result<bool> {
        let query = "UPDATE users SET disabled = $2 WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .bind(disabled)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update user status")?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_user_totp_secret(&self, id: Uuid, secret: Option<&str>) -> Result<()> {
        let query = "UPDATE users SET totp_secret = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(secret)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update totp secret")?;
        Ok(())
    }

    async fn update_user_challenge(&self, id: Uuid, challenge: Option<&str>) -> Result<()> {
        let query = "UPDATE users SET current_challenge = $2 WHERE id = $1";
        sqlx::query(query)
            .bind(id)
            .bind(challenge)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update webauthn challenge")?;
        Ok(())
    }

    async fn take_user_challenge(&self, id: Uuid) -> Result<Option<String>> {
        let row = sqlx::query(TAKE_CHALLENGE_SQL)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", TAKE_CHALLENGE_SQL))
            .await
            .context("failed to take webauthn challenge")?;
        row.map(|row| row.try_get::<Option<String>, _>("current_challenge"))
            .transpose()
            .map(Option::flatten)
            .context("failed to decode webauthn challenge")
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at, username");
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list users")?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool> {
        let query = "DELETE FROM users WHERE id = $1";
        let result = sqlx::query(query)
            .bind(id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete user")?;
        Ok(result.rows_affected() > 0)
    }

    async fn merge_users(&self, source: Uuid, target: Uuid) -> Result<Option<MergeSummary>> {
        // Moves and the delete commit together or not at all.
        let mut tx = self.pool.begin().await.context("begin merge transaction")?;

        let query = "SELECT COUNT(*) AS found FROM users WHERE id = $1 OR id = $2";
        let found: i64 = sqlx::query(query)
            .bind(source)
            .bind(target)
            .fetch_one(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to check merge users")?
            .get("found");
        if found != 2 {
            let _ = tx.rollback().await;
            return Ok(None);
        }

        let query = "UPDATE clients SET owner_id = $2 WHERE owner_id = $1";
        let clients = sqlx::query(query)
            .bind(source)
            .bind(target)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to move clients")?;

        let query = "UPDATE authenticators SET user_id = $2 WHERE user_id = $1";
        let authenticators = sqlx::query(query)
            .bind(source)
            .bind(target)
            .execute(&mut *tx)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to move authenticators")?;

        let query = "DELETE FROM users WHERE id = $1";
        sqlx::query(query)
            .bind(source)
            .execute(&mut *tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete merged user")?;

        tx.commit().await.context("commit merge transaction")?;

        Ok(Some(MergeSummary {
            moved_clients: clients.rows_affected(),
            moved_authenticators: authenticators.rows_affected(),
        }))
    }

    async fn get_authenticators_for_user(&self, user_id: Uuid) -> Result<Vec<Authenticator>> {
        let query = format!(
            "SELECT {AUTHENTICATOR_COLUMNS} FROM authenticators WHERE user_id = $1 \
             ORDER BY created_at"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list authenticators")?;
        Ok(rows.iter().map(authenticator_from_row).collect())
    }

    async fn get_authenticator_by_credential_id(
        &self,
        credential_id: &str,
    ) -> Result<Option<Authenticator>> {
        let query =
            format!("SELECT {AUTHENTICATOR_COLUMNS} FROM authenticators WHERE credential_id = $1");
        let row = sqlx::query(&query)
            .bind(credential_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup authenticator")?;
        Ok(row.as_ref().map(authenticator_from_row))
    }

    async fn save_authenticator(&self, authenticator: &Authenticator) -> Result<()> {
        let query = r"
            INSERT INTO authenticators
                (credential_id, user_id, public_key, counter, device_type, backed_up, transports)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
        ";
        sqlx::query(query)
            .bind(&authenticator.credential_id)
            .bind(authenticator.user_id)
            .bind(&authenticator.public_key)
            .bind(i64::from(authenticator.counter))
            .bind(authenticator.device_type.as_str())
            .bind(authenticator.backed_up)
            .bind(&authenticator.transports)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert authenticator")?;
        Ok(())
    }

    async fn update_authenticator_counter(
        &self,
        credential_id: &str,
        counter: u32,
        public_key: &[u8],
    ) -> Result<bool> {
        let result = sqlx::query(ADVANCE_COUNTER_SQL)
            .bind(credential_id)
            .bind(i64::from(counter))
            .bind(public_key)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", ADVANCE_COUNTER_SQL))
            .await
            .context("failed to update authenticator counter")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_authenticator(&self, user_id: Uuid, credential_id: &str) -> Result<bool> {
        let query = "DELETE FROM authenticators WHERE credential_id = $1 AND user_id = $2";
        let result = sqlx::query(query)
            .bind(credential_id)
            .bind(user_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete authenticator")?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_clients(&self, owner_id: Uuid) -> Result<Vec<OAuthClient>> {
        let query = format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE owner_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to list clients")?;
        rows.iter().map(client_from_row).collect()
    }

    async fn get_client(&self, owner_id: Uuid, id: Uuid) -> Result<Option<OAuthClient>> {
        let query = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1 AND owner_id = $2");
        let row = sqlx::query(&query)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup client")?;
        row.as_ref().map(client_from_row).transpose()
    }

    async fn create_client(&self, owner_id: Uuid, draft: &ClientDraft) -> Result<OAuthClient> {
        let query = format!(
            "INSERT INTO clients (id, owner_id, name, client_id, client_secret, authorize_url, \
             token_url, end_session_url, jwks_url, redirect_uri, scope, custom_attributes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {CLIENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(owner_id)
            .bind(&draft.name)
            .bind(&draft.client_id)
            .bind(&draft.client_secret)
            .bind(&draft.authorize_url)
            .bind(&draft.token_url)
            .bind(&draft.end_session_url)
            .bind(&draft.jwks_url)
            .bind(&draft.redirect_uri)
            .bind(&draft.scope)
            .bind(encode_attributes(&draft.custom_attributes)?)
            .fetch_one(&self.pool)
            .instrument(db_span("INSERT", &query))
            .await
            .context("failed to insert client")?;
        client_from_row(&row)
    }

    async fn update_client(
        &self,
        owner_id: Uuid,
        id: Uuid,
        draft: &ClientDraft,
    ) -> Result<Option<OAuthClient>> {
        let query = format!(
            "UPDATE clients SET name = $3, client_id = $4, client_secret = $5, \
             authorize_url = $6, token_url = $7, end_session_url = $8, jwks_url = $9, \
             redirect_uri = $10, scope = $11, custom_attributes = $12 \
             WHERE id = $1 AND owner_id = $2 RETURNING {CLIENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(owner_id)
            .bind(&draft.name)
            .bind(&draft.client_id)
            .bind(&draft.client_secret)
            .bind(&draft.authorize_url)
            .bind(&draft.token_url)
            .bind(&draft.end_session_url)
            .bind(&draft.jwks_url)
            .bind(&draft.redirect_uri)
            .bind(&draft.scope)
            .bind(encode_attributes(&draft.custom_attributes)?)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", &query))
            .await
            .context("failed to update client")?;
        row.as_ref().map(client_from_row).transpose()
    }

    async fn delete_client(&self, owner_id: Uuid, id: Uuid) -> Result<bool> {
        let query = "DELETE FROM clients WHERE id = $1 AND owner_id = $2";
        let result = sqlx::query(query)
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete client")?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_auth_settings(&self) -> Result<AuthSettings> {
        let query = "SELECT key, value FROM system_settings";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load settings")?;
        Ok(AuthSettings::from_pairs(rows.iter().map(|row| {
            let key: String = row.get("key");
            let value: String = row.get("value");
            (key, value)
        })))
    }

    async fn update_auth_settings(&self, update: &AuthSettingsUpdate) -> Result<AuthSettings> {
        let mut settings = self.get_auth_settings().await?;
        update.apply(&mut settings);

        let mut tx = self.pool.begin().await.context("begin settings transaction")?;
        let query = r"
            INSERT INTO system_settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
        ";
        for (key, value) in settings.to_pairs() {
            sqlx::query(query)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .instrument(db_span("UPSERT", query))
                .await
                .with_context(|| format!("failed to store setting {key}"))?;
        }
        tx.commit().await.context("commit settings transaction")?;
        Ok(settings)
    }

    async fn ping(&self) -> Result<()> {
        let query = "SELECT 1";
        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("database ping failed")?;
        Ok(())
    }
}
