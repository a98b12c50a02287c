use anyhow::{bail, Context};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Which [`UserStore`](crate::users::store::UserStore) backs the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub cors_origin: Option<String>,
    pub protect_user_routes: bool,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source.
    ///
    /// Empty values are treated as unset. `JWT_SECRET` has no fallback: a
    /// deployment without one must not start.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let store = match var("USER_STORE").as_deref() {
            None | Some("postgres") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => bail!("USER_STORE must be `postgres` or `memory`, got `{other}`"),
        };

        let database_url = var("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set when USER_STORE=postgres");
        }

        let secret = var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt = JwtConfig {
            secret,
            issuer: var("JWT_ISSUER").unwrap_or_else(|| "packpal".into()),
            audience: var("JWT_AUDIENCE").unwrap_or_else(|| "packpal-users".into()),
            ttl_minutes: match var("JWT_TTL_MINUTES") {
                Some(v) => v
                    .parse::<i64>()
                    .ok()
                    .filter(|m| *m > 0)
                    .with_context(|| format!("JWT_TTL_MINUTES must be a positive integer, got `{v}`"))?,
                None => 60,
            },
        };

        let protect_user_routes = match var("PROTECT_USER_ROUTES") {
            Some(v) => v
                .parse::<bool>()
                .with_context(|| format!("PROTECT_USER_ROUTES must be true or false, got `{v}`"))?,
            None => false,
        };

        let port = match var("APP_PORT") {
            Some(v) => v
                .parse::<u16>()
                .with_context(|| format!("APP_PORT must be a port number, got `{v}`"))?,
            None => 8080,
        };

        Ok(Self {
            store,
            database_url,
            jwt,
            cors_origin: var("CORS_ORIGIN"),
            protect_user_routes,
            host: var("APP_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
        })
    }
}
