//! Contratos com os colaboradores externos do bootstrap.
//!
//! Os serviços (`AuthBootstrap`, `TenantResolver`) só conhecem estes traits;
//! os adaptadores Postgres/arquivo vivem em `db` e `storage`, e os testes
//! usam implementações em memória.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::common::error::AppResult;
use crate::common::retry::{Sleeper, TokioSleeper};
use crate::models::auth::{Identity, IdentityMetadata, Profile, ProfileDraft, UserRecord};
use crate::models::tenancy::{Membership, Tenant};

// Chaves do armazenamento local do cliente
pub const CURRENT_TENANT_KEY: &str = "currentTenantId";
pub const AUTH_TOKEN_KEY: &str = "careflow-auth-token";

/// Session Store: dono exclusivo da identidade e das credenciais.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn current_identity(&self) -> AppResult<Option<Identity>>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<Identity>;

    async fn sign_up(&self, email: &str, password: &str, metadata: IdentityMetadata) -> AppResult<Identity>;

    async fn sign_out(&self) -> AppResult<()>;

    /// Notificações de troca de identidade. Soltar o receiver cancela a inscrição.
    fn subscribe(&self) -> broadcast::Receiver<Option<Identity>>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn find_by_identity_id(&self, identity_id: Uuid) -> AppResult<Option<Profile>>;

    /// Deve falhar com `AppError::ProfileAlreadyExists` se a identidade já tiver perfil.
    async fn insert(&self, draft: &ProfileDraft) -> AppResult<Profile>;
}

#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// Vínculos ativos, ordenados por `joined_at` crescente.
    async fn find_active_by_identity(&self, identity_id: Uuid) -> AppResult<Vec<Membership>>;
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Caminho preferido (RPC `get_my_tenants`), evita a recursão das policies.
    async fn fetch_my_tenants(&self, identity_id: Uuid) -> AppResult<Vec<Tenant>>;

    /// Leitura direta da tabela, só tenants ativos.
    async fn find_active_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<Tenant>>;

    async fn find_by_subdomain(&self, subdomain: &str) -> AppResult<Option<Tenant>>;

    /// RPC `create_tenant`: cria a organização e o vínculo de dono.
    async fn create_tenant(&self, name: &str, subdomain: &str, owner_id: Uuid) -> AppResult<Tenant>;

    /// RPC `set_current_tenant`: escopo de autorização do lado do servidor.
    async fn set_tenant_context(&self, identity_id: Uuid, tenant_id: Uuid) -> AppResult<()>;
}

/// Linhas de credencial usadas pelo `LocalSessionStore`.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<UserRecord>>;
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<UserRecord>>;

    /// Deve falhar com `AppError::EmailAlreadyExists` para e-mail repetido.
    async fn create_user(&self, email: &str, password_hash: &str, metadata: &IdentityMetadata) -> AppResult<UserRecord>;
}

/// Armazenamento chave-valor do cliente (o "localStorage").
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> AppResult<()>;
    async fn remove(&self, key: &str) -> AppResult<()>;
}

/// Camada de apresentação: recarregar tudo depois de trocar de tenant.
pub trait PageReloader: Send + Sync {
    fn reload(&self);
}

/// Todas as dependências do bootstrap, montadas uma vez no início da aplicação.
#[derive(Clone)]
pub struct Ports {
    pub session: Arc<dyn SessionStore>,
    pub profiles: Arc<dyn ProfileRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub directory: Arc<dyn TenantDirectory>,
    pub local_store: Arc<dyn LocalStore>,
    pub reloader: Arc<dyn PageReloader>,
    pub sleeper: Arc<dyn Sleeper>,
}

impl Ports {
    pub fn new(
        session: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileRepository>,
        memberships: Arc<dyn MembershipRepository>,
        directory: Arc<dyn TenantDirectory>,
        local_store: Arc<dyn LocalStore>,
        reloader: Arc<dyn PageReloader>,
    ) -> Self {
        Self {
            session,
            profiles,
            memberships,
            directory,
            local_store,
            reloader,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}
