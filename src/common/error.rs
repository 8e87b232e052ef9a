// src/common/error.rs

use thiserror::Error;

// Nosso tipo de erro, com `thiserror` para melhor ergonomia.
// As portas (session store, repositórios, diretório de tenants) devolvem sempre AppError.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("E-mail já existe")]
    EmailAlreadyExists,

    #[error("Credenciais inválidas")]
    InvalidCredentials,

    // Refresh token ausente/inválido ou sessão expirada
    #[error("Sessão inválida ou expirada")]
    InvalidSession,

    #[error("Serviço indisponível: {0}")]
    ServiceUnavailable(String),

    #[error("Usuário não autenticado")]
    NotAuthenticated,

    // Violação da unicidade de `user_id` na tabela de perfis
    #[error("Já existe um perfil para esta identidade")]
    ProfileAlreadyExists,

    #[error("O subdomínio '{0}' já está em uso")]
    SubdomainAlreadyExists(String),

    #[error("Tempo esgotado em '{0}'")]
    Timeout(&'static str),

    // Uso indevido: consumir um serviço fora do escopo onde ele foi montado
    #[error("{0} usado fora do seu provider")]
    ProviderMissing(&'static str),

    #[error("Violação de unicidade: {0}")]
    UniqueConstraintViolation(String),

    // Variante para erros de banco de dados
    #[error("Erro de banco de dados")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Erro de armazenamento local: {0}")]
    StorageError(#[from] std::io::Error),

    #[error("Erro de serialização: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Erro de Bcrypt: {0}")]
    BcryptError(#[from] bcrypt::BcryptError),

    #[error("Erro de JWT: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    // Variante genérica para qualquer outro erro inesperado
    #[error("Erro interno: {0}")]
    InternalServerError(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Falhas de leitura que valem uma nova tentativa (ou o caminho alternativo).
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::ServiceUnavailable(_) | AppError::Timeout(_) => true,
            AppError::DatabaseError(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Protocol(_)
            ),
            AppError::StorageError(_) => true,
            _ => false,
        }
    }

    /// Erros que o chamador (tela) deve mostrar ao usuário.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            AppError::ValidationError(_)
                | AppError::EmailAlreadyExists
                | AppError::InvalidCredentials
                | AppError::SubdomainAlreadyExists(_)
                | AppError::NotAuthenticated
        )
    }
}
