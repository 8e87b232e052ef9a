// src/db/tenancy_repo.rs

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::error::{AppError, AppResult},
    models::tenancy::Tenant,
    ports::TenantDirectory,
};

const TENANT_COLUMNS: &str = r#"
    id, name, subdomain, settings, features,
    subscription_tier, subscription_status, is_active, created_at
"#;

// Acesso às organizações: RPCs (funções SQL) e leitura direta da tabela 'tenants'
#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: PgPool,
}

impl PgTenantDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn fetch_my_tenants(&self, identity_id: Uuid) -> AppResult<Vec<Tenant>> {
        let query = format!("SELECT {} FROM get_my_tenants($1)", TENANT_COLUMNS);

        let tenants = sqlx::query_as::<_, Tenant>(&query)
            .bind(identity_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(tenants)
    }

    async fn find_active_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<Tenant>> {
        // O SQLx lida bem com arrays usando ANY
        let query = format!(
            "SELECT {} FROM tenants WHERE id = ANY($1) AND is_active = true",
            TENANT_COLUMNS
        );

        let tenants = sqlx::query_as::<_, Tenant>(&query)
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(tenants)
    }

    async fn find_by_subdomain(&self, subdomain: &str) -> AppResult<Option<Tenant>> {
        let query = format!("SELECT {} FROM tenants WHERE subdomain = $1", TENANT_COLUMNS);

        let tenant = sqlx::query_as::<_, Tenant>(&query)
            .bind(subdomain)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    async fn create_tenant(&self, name: &str, subdomain: &str, owner_id: Uuid) -> AppResult<Tenant> {
        // A função cria o tenant e o vínculo 'owner' na mesma transação
        let query = format!("SELECT {} FROM create_tenant($1, $2, $3)", TENANT_COLUMNS);

        sqlx::query_as::<_, Tenant>(&query)
            .bind(name)
            .bind(subdomain)
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if let Some(db_err) = e.as_database_error() {
                    if db_err.is_unique_violation() {
                        return AppError::SubdomainAlreadyExists(subdomain.to_string());
                    }
                }
                e.into()
            })
    }

    async fn set_tenant_context(&self, identity_id: Uuid, tenant_id: Uuid) -> AppResult<()> {
        sqlx::query("SELECT set_current_tenant($1, $2)")
            .bind(identity_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
