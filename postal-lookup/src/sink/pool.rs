//! Connexion PostgreSQL

use std::time::Duration;

use deadpool_postgres::{Config, Object, Pool, PoolConfig, Runtime, Timeouts};
use serde::{Deserialize, Serialize};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::debug;

use crate::error::PipelineError;

/// Mode SSL pour la connexion PostgreSQL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    /// Pas de SSL (défaut)
    #[default]
    Disable,
    /// SSL préféré mais non requis
    Prefer,
    /// SSL requis
    Require,
}

impl std::str::FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disable" | "off" | "false" | "no" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" | "on" | "true" | "yes" => Ok(SslMode::Require),
            _ => Err(format!("Invalid SSL mode: {}. Use: disable, prefer, require", s)),
        }
    }
}

/// Configuration de la base de données
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub ssl_mode: SslMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            dbname: "osm".into(),
            user: "osmuser".into(),
            password: None,
            ssl_mode: SslMode::Disable,
        }
    }
}

/// Première variable définie parmi `names`
fn env_first(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| std::env::var(name).ok())
}

impl DatabaseConfig {
    /// Charge la configuration depuis les variables d'environnement
    ///
    /// `DB_HOST`, `DB_PORT`, `DB_USER`, `DB_PASS`, `DB_NAME` sont prioritaires,
    /// puis les variables libpq (`PGHOST`, `PGPORT`, ...).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_first(&["DB_HOST", "PGHOST"]).unwrap_or(defaults.host),
            port: env_first(&["DB_PORT", "PGPORT"])
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            dbname: env_first(&["DB_NAME", "PGDATABASE"]).unwrap_or(defaults.dbname),
            user: env_first(&["DB_USER", "PGUSER"]).unwrap_or(defaults.user),
            password: env_first(&["DB_PASS", "PGPASSWORD"]),
            ssl_mode: env_first(&["PGSSLMODE"])
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }

    /// Description sans mot de passe, pour les logs
    pub fn describe(&self) -> String {
        format!(
            "postgres://{}@{}:{}/{} (SSL: {:?})",
            self.user, self.host, self.port, self.dbname, self.ssl_mode
        )
    }
}

/// Crée la configuration TLS pour rustls
fn make_tls_connector() -> MakeRustlsConnect {
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    MakeRustlsConnect::new(config)
}

/// Crée un pool d'une seule connexion : le pipeline est séquentiel
pub fn create_pool(config: &DatabaseConfig) -> Result<Pool, PipelineError> {
    let mut cfg = Config::new();
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.dbname.clone());
    cfg.user = Some(config.user.clone());
    cfg.password = config.password.clone();

    cfg.pool = Some(PoolConfig {
        max_size: 1,
        timeouts: Timeouts {
            wait: Some(Duration::from_secs(30)),
            create: Some(Duration::from_secs(10)),
            recycle: Some(Duration::from_secs(30)),
        },
        ..Default::default()
    });

    let pool = match config.ssl_mode {
        SslMode::Disable => cfg.create_pool(Some(Runtime::Tokio1), NoTls),
        SslMode::Prefer | SslMode::Require => {
            cfg.create_pool(Some(Runtime::Tokio1), make_tls_connector())
        }
    };

    pool.map_err(|e| PipelineError::connection("Failed to create database pool", e))
}

/// Acquiert la connexion du pool et vérifie qu'elle répond
pub async fn connect(pool: &Pool, config: &DatabaseConfig) -> Result<Object, PipelineError> {
    let client = pool.get().await.map_err(|e| {
        PipelineError::connection(format!("Failed to connect to {}", config.describe()), e)
    })?;

    client
        .execute("SELECT 1", &[])
        .await
        .map_err(|e| PipelineError::connection("Connection test failed", e))?;

    debug!(target_db = %config.describe(), "Database connection ready");
    Ok(client)
}
