// src/config.rs

use std::{env, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::{
    common::retry::RetryPolicy,
    db::{PgMembershipRepository, PgProfileRepository, PgTenantDirectory, UserRepository},
    ports::{PageReloader, Ports},
    services::session_store::LocalSessionStore,
    storage::FileLocalStore,
};

/// Limites de tempo e de novas tentativas do bootstrap.
/// São fallbacks de liveness, não cancelam as chamadas em andamento.
#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    pub auth_safety_timeout: Duration,
    pub tenant_safety_timeout: Duration,
    pub profile_retry: RetryPolicy,
    pub tenant_rpc_timeout: Duration,
    pub inactivity_limit: Duration,
    pub inactivity_check_interval: Duration,
    // Tenant pedido por deep-link; tem prioridade sobre o salvo localmente
    pub requested_tenant: Option<Uuid>,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            auth_safety_timeout: Duration::from_secs(15),
            tenant_safety_timeout: Duration::from_secs(5),
            profile_retry: RetryPolicy::default(),
            tenant_rpc_timeout: Duration::from_secs(8),
            inactivity_limit: Duration::from_secs(30 * 60),
            inactivity_check_interval: Duration::from_secs(60),
            requested_tenant: None,
        }
    }
}

impl BootstrapSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            auth_safety_timeout: env_millis("AUTH_SAFETY_TIMEOUT_MS", defaults.auth_safety_timeout)?,
            tenant_safety_timeout: env_millis("TENANT_SAFETY_TIMEOUT_MS", defaults.tenant_safety_timeout)?,
            profile_retry: RetryPolicy::new(
                env_parse("PROFILE_MAX_ATTEMPTS", defaults.profile_retry.max_attempts)?,
                env_millis("PROFILE_RETRY_BACKOFF_MS", defaults.profile_retry.backoff)?,
            ),
            tenant_rpc_timeout: env_millis("TENANT_RPC_TIMEOUT_MS", defaults.tenant_rpc_timeout)?,
            inactivity_limit: Duration::from_secs(env_parse(
                "INACTIVITY_LIMIT_SECS",
                defaults.inactivity_limit.as_secs(),
            )?),
            inactivity_check_interval: defaults.inactivity_check_interval,
            requested_tenant: env_optional::<Uuid>("REQUESTED_TENANT_ID")?,
        })
    }
}

/// Configuração do binário, lida do ambiente (.env opcional).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt_secret: String,
    pub local_store_path: PathBuf,
    pub db_max_connections: u32,
    pub bootstrap: BootstrapSettings,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").context("DATABASE_URL deve ser definida")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET deve ser definido")?;
        let local_store_path = env::var("LOCAL_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".careflow/local.json"));

        Ok(Self {
            database_url,
            jwt_secret,
            local_store_path,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 5)?,
            bootstrap: BootstrapSettings::from_env()?,
        })
    }
}

// O estado compartilhado: pool + todas as portas já montadas
#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub session_store: Arc<LocalSessionStore>,
    pub ports: Ports,
    pub settings: BootstrapSettings,
}

impl AppState {
    pub async fn new(config: &AppConfig, reloader: Arc<dyn PageReloader>) -> anyhow::Result<Self> {
        // Conecta ao banco de dados, usando '?' para propagar erros
        let db_pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.database_url)
            .await?;

        tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

        // --- Monta o gráfico de dependências ---
        let local_store = Arc::new(FileLocalStore::new(&config.local_store_path));
        let user_repo = Arc::new(UserRepository::new(db_pool.clone()));
        let session_store = Arc::new(LocalSessionStore::new(
            user_repo,
            local_store.clone(),
            config.jwt_secret.clone(),
        ));

        let ports = Ports::new(
            session_store.clone(),
            Arc::new(PgProfileRepository::new(db_pool.clone())),
            Arc::new(PgMembershipRepository::new(db_pool.clone())),
            Arc::new(PgTenantDirectory::new(db_pool.clone())),
            local_store,
            reloader,
        );

        Ok(Self {
            db_pool,
            session_store,
            ports,
            settings: config.bootstrap.clone(),
        })
    }
}

fn env_optional<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{} tem um valor inválido: {}", key, raw)),
        _ => Ok(None),
    }
}

fn env_parse<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    Ok(env_optional(key)?.unwrap_or(default))
}

fn env_millis(key: &str, default: Duration) -> anyhow::Result<Duration> {
    Ok(env_optional::<u64>(key)?
        .map(Duration::from_millis)
        .unwrap_or(default))
}
