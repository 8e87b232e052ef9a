// src/db/user_repo.rs

use async_trait::async_trait;
use sqlx::{types::Json, PgPool};
use uuid::Uuid;

use crate::{
    common::error::{AppError, AppResult},
    models::auth::{IdentityMetadata, UserRecord},
    ports::CredentialRepository,
};

// O repositório de credenciais, responsável pela tabela 'auth_users'
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for UserRepository {
    // Busca um usuário pelo seu e-mail (sem diferenciar maiúsculas)
    async fn find_by_email(&self, email: &str) -> AppResult<Option<UserRecord>> {
        let maybe_user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, email, password_hash, metadata, created_at, updated_at
            FROM auth_users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(maybe_user)
    }

    // Busca um usuário pelo seu ID
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<UserRecord>> {
        let maybe_user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, email, password_hash, metadata, created_at, updated_at
            FROM auth_users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(maybe_user)
    }

    // Cria um novo usuário; e-mail duplicado vira EmailAlreadyExists
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        metadata: &IdentityMetadata,
    ) -> AppResult<UserRecord> {
        sqlx::query_as::<_, UserRecord>(
            r#"
            INSERT INTO auth_users (email, password_hash, metadata)
            VALUES ($1, $2, $3)
            RETURNING id, email, password_hash, metadata, created_at, updated_at
            "#,
        )
        .bind(email)
        .bind(password_hash)
        .bind(Json(metadata))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return AppError::EmailAlreadyExists;
                }
            }
            e.into()
        })
    }
}
