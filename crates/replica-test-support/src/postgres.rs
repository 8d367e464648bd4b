//! Scratch databases and seed rows for `PgCopyStore` suites.
//!
//! `REPLICA_TEST_DATABASE_URL` names a server on which each suite gets a
//! database of its own, dropped together with the handle. The seed helpers
//! write owners and source rows into the `replica` schema, so they must run
//! after the store has applied its migrations.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use anyhow::{Context, Result, anyhow};
use postgres::{Client, NoTls};
use sqlx::PgPool;
use url::Url;
use uuid::Uuid;

/// Environment variable naming an externally managed Postgres server.
pub const TEST_DATABASE_URL_ENV: &str = "REPLICA_TEST_DATABASE_URL";

static DATABASE_SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// A database created for one suite; dropping the handle drops the database.
pub struct ScratchDatabase {
    url: String,
    server_url: String,
    name: String,
}

impl ScratchDatabase {
    /// Create an empty database on the server at `server_url`.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is malformed or the server rejects the
    /// connection or the `CREATE DATABASE`.
    pub fn create(server_url: &str) -> Result<Self> {
        let mut url = Url::parse(server_url).context("invalid postgres connection url")?;
        let name = database_name();
        run_on_server(server_url, format!("CREATE DATABASE \"{name}\""))
            .with_context(|| format!("failed to create scratch database {name}"))?;
        url.set_path(&format!("/{name}"));
        Ok(Self {
            url: url.to_string(),
            server_url: server_url.to_string(),
            name,
        })
    }

    /// Connection string of the scratch database.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for ScratchDatabase {
    fn drop(&mut self) {
        let _ = run_on_server(
            &self.server_url,
            format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.name),
        );
    }
}

/// Scratch database on the server named by [`TEST_DATABASE_URL_ENV`].
///
/// Returns `Ok(None)` when the variable is unset so suites can fall back to a
/// container or skip.
///
/// # Errors
///
/// Returns an error when the variable is set but the database cannot be created.
pub fn scratch_database() -> Result<Option<ScratchDatabase>> {
    match std::env::var(TEST_DATABASE_URL_ENV) {
        Ok(server_url) => ScratchDatabase::create(&server_url).map(Some),
        Err(_) => Ok(None),
    }
}

// The blocking client runs on its own thread so callers inside a runtime are safe.
fn run_on_server(server_url: &str, statement: String) -> Result<()> {
    let server_url = server_url.to_string();
    thread::spawn(move || -> Result<()> {
        let mut client = Client::connect(&server_url, NoTls)?;
        client.simple_query(&statement)?;
        Ok(())
    })
    .join()
    .map_err(|_| anyhow!("database admin thread panicked"))?
}

fn database_name() -> String {
    let sequence = DATABASE_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let salt = Uuid::new_v4().simple().to_string();
    format!("replica_copy_{}_{sequence}_{}", std::process::id(), &salt[..8])
}

/// Insert a user that can own or initiate copies.
///
/// # Errors
///
/// Propagates database errors, including a duplicate username.
pub async fn seed_user(pool: &PgPool, username: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO replica.users (id, username) VALUES ($1, $2)")
        .bind(id)
        .bind(username)
        .execute(pool)
        .await
        .with_context(|| format!("failed to seed user {username}"))?;
    Ok(id)
}

/// Insert a group led by `leader`, returning its id.
///
/// # Errors
///
/// Propagates database errors, including a duplicate group name.
pub async fn seed_group(pool: &PgPool, name: &str, leader: Uuid) -> Result<i64> {
    sqlx::query_scalar("INSERT INTO replica.groups (name, leader_id) VALUES ($1, $2) RETURNING id")
        .bind(name)
        .bind(leader)
        .fetch_one(pool)
        .await
        .with_context(|| format!("failed to seed group {name}"))
}

/// Insert a user-owned source dataset whose content lives at `file_key`.
///
/// # Errors
///
/// Propagates database errors.
pub async fn seed_dataset(pool: &PgPool, owner: Uuid, file_key: &str) -> Result<i64> {
    sqlx::query_scalar(
        r"INSERT INTO replica.datasets
            (owner_user_id, original_file_name, file_name, file_key, file_size, content_type)
          VALUES ($1, 'iris.csv', 'iris.csv', $2, 12, 'text/csv')
          RETURNING id",
    )
    .bind(owner)
    .bind(file_key)
    .fetch_one(pool)
    .await
    .context("failed to seed dataset")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_names_are_unique_identifiers() {
        let first = database_name();
        let second = database_name();
        assert_ne!(first, second);
        assert!(first.starts_with("replica_copy_"));
        assert!(
            first
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        );
        assert!(first.len() < 64, "postgres truncates longer identifiers");
    }

    #[test]
    fn malformed_server_url_is_rejected_before_connecting() {
        let err = ScratchDatabase::create("not a url").err().expect("invalid url");
        assert!(format!("{err:#}").contains("invalid postgres connection url"));
    }
}
