// src/models/auth.rs

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

// Nome usado quando não dá para derivar nada da identidade
pub const FALLBACK_DISPLAY_NAME: &str = "New User";

// ---
// 1. Identity (o principal autenticado, dono é o Session Store)
// ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub metadata: IdentityMetadata,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Metadados anexados no cadastro, usados depois para montar o perfil.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityMetadata {
    pub full_name: Option<String>,
    pub role: Option<String>,
}

// ---
// 2. Role (o papel do perfil dentro da aplicação)
// ---
// Aceita qualquer string vinda do banco; comparação sem diferenciar maiúsculas.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Manager,
    Staff,
    Carer,
    Family,
    Client,
    Other(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Staff => "staff",
            Role::Carer => "carer",
            Role::Family => "family",
            Role::Client => "client",
            Role::Other(s) => s,
        }
    }

    /// Papéis que um usuário pode escolher para si no cadastro.
    pub fn is_self_assignable(&self) -> bool {
        matches!(self, Role::Staff | Role::Carer | Role::Family | Role::Client)
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "manager" => Role::Manager,
            "staff" => Role::Staff,
            "carer" => Role::Carer,
            "family" => Role::Family,
            "client" => Role::Client,
            _ => Role::Other(value),
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::from(value.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---
// 3. Profile (registro da aplicação, um por identidade)
// ---
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    #[sqlx(rename = "user_id")]
    pub identity_id: Uuid,
    pub email: String,
    #[sqlx(rename = "full_name")]
    pub display_name: String,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub tenant_id: Option<Uuid>,
    pub is_super_admin: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Acesso administrativo: papel admin ou a flag explícita de super admin.
    pub fn is_admin(&self) -> bool {
        self.is_super_admin || self.role == Role::Admin
    }
}

/// O que o bootstrap insere quando a identidade ainda não tem perfil.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDraft {
    pub identity_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub is_active: bool,
}

impl ProfileDraft {
    /// Nome: full_name dos metadados > parte local do e-mail > "New User".
    /// Papel: o dos metadados só se for auto-atribuível; senão `staff`.
    pub fn for_identity(identity: &Identity) -> Self {
        let display_name = identity
            .metadata
            .full_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .or_else(|| {
                identity
                    .email
                    .split('@')
                    .next()
                    .map(str::trim)
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| FALLBACK_DISPLAY_NAME.to_string());

        let role = identity
            .metadata
            .role
            .as_deref()
            .map(Role::from)
            .filter(Role::is_self_assignable)
            .unwrap_or(Role::Staff);

        Self {
            identity_id: identity.id,
            email: identity.email.clone(),
            display_name,
            role,
            is_active: true,
        }
    }
}

// ---
// 4. Payloads de entrada (validados antes de ir ao Session Store)
// ---
#[derive(Debug, Deserialize, Validate)]
pub struct SignInPayload {
    #[validate(email(message = "O e-mail fornecido é inválido."))]
    pub email: String,
    #[validate(length(min = 1, message = "A senha é obrigatória."))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignUpPayload {
    #[validate(email(message = "O e-mail fornecido é inválido."))]
    pub email: String,
    #[validate(length(min = 6, message = "A senha deve ter no mínimo 6 caracteres."))]
    pub password: String,
    #[validate(length(min = 1, message = "O nome é obrigatório."))]
    pub display_name: String,
    pub role: String,
}

// ---
// 5. Credenciais do session store local
// ---
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: Uuid,
    pub email: String,

    #[serde(skip_serializing)] // IMPORTANTE para segurança
    pub password_hash: String,

    #[sqlx(json)]
    pub metadata: IdentityMetadata,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Estrutura de dados ("claims") dentro do JWT
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,     // Subject (ID do usuário)
    pub email: String,
    pub exp: usize,    // Expiration time
    pub iat: usize,    // Issued At
}
