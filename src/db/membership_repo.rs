// src/db/membership_repo.rs

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{common::error::AppResult, models::tenancy::Membership, ports::MembershipRepository};

// Tabela-ponte 'user_tenant_memberships' (um vínculo ativo por usuário+tenant)
#[derive(Clone)]
pub struct PgMembershipRepository {
    pool: PgPool,
}

impl PgMembershipRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipRepository for PgMembershipRepository {
    async fn find_active_by_identity(&self, identity_id: Uuid) -> AppResult<Vec<Membership>> {
        let memberships = sqlx::query_as::<_, Membership>(
            r#"
            SELECT id, user_id, tenant_id, role, permissions, is_active, joined_at
            FROM user_tenant_memberships
            WHERE user_id = $1 AND is_active = true
            ORDER BY joined_at ASC
            "#,
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(memberships)
    }
}
