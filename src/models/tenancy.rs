// src/models/tenancy.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

// ---
// 1. Tenant (a "Organização")
// ---
// Workspace isolado da agência; todo dado de negócio pertence a exatamente um.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub subdomain: String,
    #[sqlx(json)]
    #[serde(default)]
    pub settings: TenantSettings,
    #[sqlx(json)]
    #[serde(default)]
    pub features: TenantFeatures,
    pub subscription_tier: String,
    pub subscription_status: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Configurações livres do tenant. Só `disabled_features` tem semântica aqui.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_features: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TenantSettings {
    pub fn is_feature_disabled(&self, feature: &str) -> bool {
        self.disabled_features.iter().any(|f| f == feature)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TenantFeatures {
    pub careflow_enabled: Option<bool>,
    pub novumflow_enabled: Option<bool>,
    pub ai_enabled: Option<bool>,
}

// ---
// 2. Membership (a "Ponte" Identidade-Tenant)
// ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub id: Uuid,
    #[sqlx(rename = "user_id")]
    pub identity_id: Uuid,
    pub tenant_id: Uuid,
    #[sqlx(try_from = "String")]
    pub role: MembershipRole,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
}

impl Membership {
    pub fn grants(&self, permission: &str) -> bool {
        self.role.is_elevated() || self.permissions.iter().any(|p| p == permission)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MembershipRole {
    Owner,
    Admin,
    Manager,
    Member,
    Other(String),
}

impl MembershipRole {
    pub fn as_str(&self) -> &str {
        match self {
            MembershipRole::Owner => "owner",
            MembershipRole::Admin => "admin",
            MembershipRole::Manager => "manager",
            MembershipRole::Member => "member",
            MembershipRole::Other(s) => s,
        }
    }

    // owner/admin têm todas as permissões
    pub fn is_elevated(&self) -> bool {
        matches!(self, MembershipRole::Owner | MembershipRole::Admin)
    }
}

impl From<String> for MembershipRole {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "owner" => MembershipRole::Owner,
            "admin" => MembershipRole::Admin,
            "manager" => MembershipRole::Manager,
            "member" => MembershipRole::Member,
            _ => MembershipRole::Other(value),
        }
    }
}

impl From<MembershipRole> for String {
    fn from(role: MembershipRole) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for MembershipRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---
// 3. Payload de criação de organização
// ---
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTenantPayload {
    #[validate(length(min = 1, max = 120, message = "O nome da organização é obrigatório."))]
    pub name: String,
    #[validate(custom(function = "validate_subdomain"))]
    pub subdomain: String,
}

impl CreateTenantPayload {
    pub fn new(name: &str, subdomain: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            subdomain: subdomain.trim().to_ascii_lowercase(),
        }
    }
}

// Subdomínio DNS: 3-63 chars, [a-z0-9-], sem hífen nas pontas
fn validate_subdomain(subdomain: &str) -> Result<(), ValidationError> {
    let valid_chars = subdomain
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let valid_len = (3..=63).contains(&subdomain.len());
    let valid_edges = !subdomain.starts_with('-') && !subdomain.ends_with('-');

    if valid_chars && valid_len && valid_edges {
        Ok(())
    } else {
        Err(ValidationError::new("subdomain")
            .with_message("Subdomínio inválido (use 3-63 letras minúsculas, números ou hífen).".into()))
    }
}
