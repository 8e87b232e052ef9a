//src/main.rs

use std::sync::Arc;

use careflow_session::{ports::PageReloader, AppConfig, AppError, AppState, Providers};
use tracing_subscriber::EnvFilter;

// Sem camada de apresentação: o "recarregamento" vira só uma linha de log
struct LogReloader;

impl PageReloader for LogReloader {
    fn reload(&self) {
        tracing::info!("🔄 Recarregamento completo solicitado");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Inicializa o logger (RUST_LOG tem prioridade)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let config = AppConfig::from_env()?;
    let app_state = AppState::new(&config, Arc::new(LogReloader)).await?;

    // Faz o app rodar as migrações do SQLx na inicialização
    sqlx::migrate!().run(&app_state.db_pool).await?;
    tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

    // Sessão salva de uma execução anterior, se houver
    match app_state.session_store.restore().await {
        Ok(Some(identity)) => tracing::info!("Sessão anterior encontrada para {}", identity.email),
        Ok(None) => tracing::info!("Nenhuma sessão salva"),
        Err(AppError::InvalidSession) => tracing::warn!("Sessão salva inválida; descartada"),
        Err(e) => tracing::warn!("Não foi possível restaurar a sessão: {}", e),
    }

    let providers = Providers::mount(&app_state.ports, &app_state.settings);
    let auth = providers.auth()?;
    let tenants = providers.tenant()?;

    // Login opcional para exercitar o fluxo completo
    if let (Ok(email), Ok(password)) = (std::env::var("CAREFLOW_LOGIN_EMAIL"), std::env::var("CAREFLOW_LOGIN_PASSWORD")) {
        auth.wait_until_settled().await;
        if let Err(e) = auth.sign_in(&email, &password).await {
            tracing::error!("❌ Login de teste falhou: {}", e);
        }
    }

    let auth_state = auth.wait_until_settled().await;
    let tenant_state = tenants
        .wait_for_identity(auth_state.identity_id(), app_state.settings.tenant_rpc_timeout)
        .await;

    let report = serde_json::json!({
        "auth": auth_state,
        "tenants": tenant_state,
        "canAccessCareFlow": tenants.can_access_careflow(),
        "canAccessNovumFlow": tenants.can_access_novumflow(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    providers.shutdown();
    Ok(())
}
