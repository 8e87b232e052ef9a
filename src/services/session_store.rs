// src/services/session_store.rs

use std::sync::Arc;

use async_trait::async_trait;
use bcrypt::{hash, verify};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use tokio::sync::{broadcast, RwLock};

use crate::{
    common::error::{AppError, AppResult},
    models::auth::{Claims, Identity, IdentityMetadata, UserRecord},
    ports::{CredentialRepository, LocalStore, SessionStore, AUTH_TOKEN_KEY},
};

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
struct ActiveSession {
    identity: Identity,
    token: String,
}

/// Session Store sobre uma tabela de credenciais própria.
/// Senha com bcrypt (fora do executor async), sessão como JWT HS256.
pub struct LocalSessionStore {
    users: Arc<dyn CredentialRepository>,
    local_store: Arc<dyn LocalStore>,
    jwt_secret: String,
    hash_cost: u32,
    token_ttl: chrono::Duration,
    current: RwLock<Option<ActiveSession>>,
    events: broadcast::Sender<Option<Identity>>,
}

impl LocalSessionStore {
    pub fn new(users: Arc<dyn CredentialRepository>, local_store: Arc<dyn LocalStore>, jwt_secret: String) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            users,
            local_store,
            jwt_secret,
            hash_cost: bcrypt::DEFAULT_COST,
            token_ttl: chrono::Duration::days(7),
            current: RwLock::new(None),
            events,
        }
    }

    /// Custo do bcrypt (mínimo 4). Útil para testes.
    pub fn with_hash_cost(mut self, cost: u32) -> Self {
        self.hash_cost = cost.max(4);
        self
    }

    pub fn with_token_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Token da sessão ativa, se houver.
    pub async fn access_token(&self) -> Option<String> {
        self.current.read().await.as_ref().map(|s| s.token.clone())
    }

    /// Restaura a sessão persistida no armazenamento local.
    pub async fn restore(&self) -> AppResult<Option<Identity>> {
        let Some(token) = self.local_store.get(AUTH_TOKEN_KEY).await? else {
            return Ok(None);
        };

        let claims = match self.validate_token(&token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!("Token persistido inválido: {}", e);
                self.local_store.remove(AUTH_TOKEN_KEY).await?;
                return Err(AppError::InvalidSession);
            }
        };

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(AppError::InvalidSession)?;

        let identity = identity_from(&user, &claims);
        *self.current.write().await = Some(ActiveSession {
            identity: identity.clone(),
            token,
        });
        let _ = self.events.send(Some(identity.clone()));

        tracing::info!("🔑 Sessão restaurada para {}", identity.email);
        Ok(Some(identity))
    }

    fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_ref()),
            &Validation::default(),
        )?;
        Ok(token_data.claims)
    }

    fn create_token(&self, user: &UserRecord) -> AppResult<(String, Claims)> {
        let now = Utc::now();
        let expires_at = now + self.token_ttl;

        let claims = Claims {
            sub: user.id,
            email: user.email.clone(),
            exp: expires_at.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_ref()),
        )?;
        Ok((token, claims))
    }

    // Abre a sessão, persiste o token e avisa os inscritos
    async fn establish(&self, user: &UserRecord) -> AppResult<Identity> {
        let (token, claims) = self.create_token(user)?;
        let identity = identity_from(user, &claims);

        if let Err(e) = self.local_store.set(AUTH_TOKEN_KEY, &token).await {
            tracing::warn!("Não foi possível persistir o token: {}", e);
        }

        *self.current.write().await = Some(ActiveSession {
            identity: identity.clone(),
            token,
        });
        // Sem inscritos o envio falha, e tudo bem
        let _ = self.events.send(Some(identity.clone()));

        Ok(identity)
    }

    async fn hash_password(&self, password: &str) -> AppResult<String> {
        let password_clone = password.to_owned();
        let cost = self.hash_cost;
        let hashed = tokio::task::spawn_blocking(move || hash(&password_clone, cost))
            .await
            .map_err(|e| anyhow::anyhow!("Falha na task de hashing: {}", e))??;
        Ok(hashed)
    }
}

#[async_trait]
impl SessionStore for LocalSessionStore {
    async fn current_identity(&self) -> AppResult<Option<Identity>> {
        let Some(session) = self.current.read().await.clone() else {
            return Ok(None);
        };

        match self.validate_token(&session.token) {
            Ok(_) => Ok(Some(session.identity)),
            Err(AppError::JwtError(e)) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                tracing::info!("Sessão de {} expirou", session.identity.email);
                *self.current.write().await = None;
                Err(AppError::InvalidSession)
            }
            Err(_) => {
                *self.current.write().await = None;
                Err(AppError::InvalidSession)
            }
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<Identity> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        let password_clone = password.to_owned();
        let password_hash_clone = user.password_hash.clone();

        // Executa a verificação em um thread separado
        let is_password_valid = tokio::task::spawn_blocking(move || verify(&password_clone, &password_hash_clone))
            .await
            .map_err(|e| anyhow::anyhow!("Falha na task de verificação de senha: {}", e))??;

        if !is_password_valid {
            return Err(AppError::InvalidCredentials);
        }

        self.establish(&user).await
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: IdentityMetadata) -> AppResult<Identity> {
        let hashed_password = self.hash_password(password).await?;
        let user = self.users.create_user(email, &hashed_password, &metadata).await?;

        tracing::info!("Usuário {} registrado", user.email);
        self.establish(&user).await
    }

    async fn sign_out(&self) -> AppResult<()> {
        let previous = self.current.write().await.take();
        self.local_store.remove(AUTH_TOKEN_KEY).await?;

        if previous.is_some() {
            let _ = self.events.send(None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Option<Identity>> {
        self.events.subscribe()
    }
}

fn identity_from(user: &UserRecord, claims: &Claims) -> Identity {
    Identity {
        id: user.id,
        email: user.email.clone(),
        metadata: user.metadata.clone(),
        issued_at: timestamp(claims.iat),
        expires_at: timestamp(claims.exp),
    }
}

fn timestamp(secs: usize) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs as i64, 0)
}
