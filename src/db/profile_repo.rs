// src/db/profile_repo.rs

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::error::{AppError, AppResult},
    models::auth::{Profile, ProfileDraft},
    ports::ProfileRepository,
};

const PROFILE_COLUMNS: &str = r#"
    id, user_id, email, full_name, role, tenant_id,
    is_super_admin, is_active, created_at, updated_at
"#;

// Tabela 'users_profiles': no máximo uma linha por user_id (índice único)
#[derive(Clone)]
pub struct PgProfileRepository {
    pool: PgPool,
}

impl PgProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileRepository for PgProfileRepository {
    async fn find_by_identity_id(&self, identity_id: Uuid) -> AppResult<Option<Profile>> {
        let query = format!("SELECT {} FROM users_profiles WHERE user_id = $1", PROFILE_COLUMNS);

        let profile = sqlx::query_as::<_, Profile>(&query)
            .bind(identity_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(profile)
    }

    async fn insert(&self, draft: &ProfileDraft) -> AppResult<Profile> {
        let query = format!(
            r#"
            INSERT INTO users_profiles (user_id, email, full_name, role, is_active)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            PROFILE_COLUMNS
        );

        sqlx::query_as::<_, Profile>(&query)
            .bind(draft.identity_id)
            .bind(&draft.email)
            .bind(&draft.display_name)
            .bind(draft.role.as_str())
            .bind(draft.is_active)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db_err) = &e {
                    if db_err.is_unique_violation() {
                        return match db_err.constraint() {
                            // Corrida perdida para outra criação automática
                            Some("users_profiles_user_id_key") | None => AppError::ProfileAlreadyExists,
                            Some(constraint) => AppError::UniqueConstraintViolation(constraint.to_string()),
                        };
                    }
                }
                e.into()
            })
    }
}
