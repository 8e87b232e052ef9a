// src/services/auth_bootstrap.rs

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, Weak,
};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::{
        error::{AppError, AppResult},
        retry::{RetryPolicy, Sleeper},
    },
    config::BootstrapSettings,
    models::auth::{Identity, IdentityMetadata, Profile, ProfileDraft, SignInPayload, SignUpPayload},
    ports::{LocalStore, Ports, ProfileRepository, SessionStore, AUTH_TOKEN_KEY, CURRENT_TENANT_KEY},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ProfileStatus {
    Loading,
    Creating,
    Ready,
    // Identidade conhecida sem perfil: "precisa de suporte", não é deslogado
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthPhase {
    Initializing,
    Authenticated(ProfileStatus),
    Unauthenticated,
}

/// O trio `{identity, profile, isLoading}` consumido pelo resto da aplicação.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub identity: Option<Identity>,
    pub profile: Option<Profile>,
    pub is_loading: bool,
    pub phase: AuthPhase,
    pub service_unavailable: bool,
}

impl AuthState {
    fn initializing() -> Self {
        Self {
            identity: None,
            profile: None,
            is_loading: true,
            phase: AuthPhase::Initializing,
            service_unavailable: false,
        }
    }

    fn unauthenticated() -> Self {
        Self {
            identity: None,
            profile: None,
            is_loading: false,
            phase: AuthPhase::Unauthenticated,
            service_unavailable: false,
        }
    }

    pub fn identity_id(&self) -> Option<Uuid> {
        self.identity.as_ref().map(|identity| identity.id)
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.phase, AuthPhase::Authenticated(_))
    }

    pub fn needs_support(&self) -> bool {
        self.phase == AuthPhase::Authenticated(ProfileStatus::Missing)
    }
}

enum ProfileOutcome {
    Ready(Profile),
    Missing,
}

/// Resolve identidade -> perfil na inicialização e a cada troca de identidade.
///
/// Escritas assíncronas no estado passam por `apply`, que descarta o resultado
/// quando o serviço já foi desmontado ou quando uma resolução mais nova começou.
pub struct AuthBootstrap {
    session: Arc<dyn SessionStore>,
    profiles: Arc<dyn ProfileRepository>,
    local_store: Arc<dyn LocalStore>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
    safety_timeout: Duration,
    state: watch::Sender<AuthState>,
    mounted: AtomicBool,
    generation: AtomicU64,
    create_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AuthBootstrap {
    /// Monta o serviço e dispara a resolução inicial. Precisa de um runtime tokio.
    pub fn mount(ports: &Ports, settings: &BootstrapSettings) -> Arc<Self> {
        let (state, _) = watch::channel(AuthState::initializing());

        let this = Arc::new(Self {
            session: ports.session.clone(),
            profiles: ports.profiles.clone(),
            local_store: ports.local_store.clone(),
            sleeper: ports.sleeper.clone(),
            retry: settings.profile_retry,
            safety_timeout: settings.auth_safety_timeout,
            state,
            mounted: AtomicBool::new(true),
            generation: AtomicU64::new(0),
            create_lock: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
        });

        // Inscreve antes da resolução inicial para não perder nenhuma troca
        let events = this.session.subscribe();

        let handles = vec![
            tokio::spawn(Self::safety_timer(Arc::downgrade(&this))),
            tokio::spawn(Self::listen(Arc::downgrade(&this), events)),
            tokio::spawn(this.clone().initialize()),
        ];
        this.lock_tasks().extend(handles);

        tracing::debug!("AuthBootstrap montado");
        this
    }

    // ---
    // Leitura do estado
    // ---

    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.borrow().identity.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.state.borrow().profile.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Espera até `is_loading` ficar falso (resolução concluída ou timeout de segurança).
    pub async fn wait_until_settled(&self) -> AuthState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| !state.is_loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    // ---
    // Operações expostas para as telas
    // ---

    /// Delegado ao Session Store. Não mexe no estado local: a inscrição reage à troca.
    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<()> {
        let payload = SignInPayload {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        payload.validate()?;

        self.session
            .sign_in_with_password(&payload.email, &payload.password)
            .await
            .map(|identity| tracing::info!("🔐 Login efetuado para {}", identity.email))
            .inspect_err(|e| tracing::warn!("Login recusado para {}: {}", payload.email, e))
    }

    /// Cadastro: nome e papel vão como metadados para a criação posterior do perfil.
    pub async fn sign_up(&self, email: &str, password: &str, display_name: &str, role: &str) -> AppResult<()> {
        let payload = SignUpPayload {
            email: email.trim().to_string(),
            password: password.to_string(),
            display_name: display_name.trim().to_string(),
            role: role.trim().to_string(),
        };
        payload.validate()?;

        let metadata = IdentityMetadata {
            full_name: Some(payload.display_name.clone()),
            role: Some(payload.role.clone()).filter(|r| !r.is_empty()),
        };

        self.session
            .sign_up(&payload.email, &payload.password, metadata)
            .await
            .map(|identity| tracing::info!("🆕 Cadastro efetuado para {}", identity.email))
            .inspect_err(|e| tracing::warn!("Cadastro recusado para {}: {}", payload.email, e))
    }

    /// Sempre termina deslogado do ponto de vista da UI; falhas só vão para o log.
    pub async fn sign_out(&self) {
        let generation = self.next_generation();
        self.apply(generation, |state| *state = AuthState::unauthenticated());

        for key in [CURRENT_TENANT_KEY, AUTH_TOKEN_KEY] {
            if let Err(e) = self.local_store.remove(key).await {
                tracing::warn!("Falha ao limpar '{}' do armazenamento local: {}", key, e);
            }
        }

        if let Err(e) = self.session.sign_out().await {
            tracing::warn!("Logout remoto falhou (ignorado): {}", e);
        }
    }

    /// Refaz a resolução do perfil para a identidade atual.
    pub async fn refresh_profile(&self) {
        let generation = self.next_generation();
        match self.session.current_identity().await {
            Ok(identity) => self.resolve(identity, generation).await,
            Err(e) => tracing::warn!("Não foi possível reler a identidade atual: {}", e),
        }
    }

    /// Desmonta: nenhuma escrita assíncrona é aplicada depois disto.
    pub fn unmount(&self) {
        if self.mounted.swap(false, Ordering::SeqCst) {
            for handle in self.lock_tasks().drain(..) {
                handle.abort();
            }
            tracing::debug!("AuthBootstrap desmontado");
        }
    }

    // ---
    // Máquina de estados
    // ---

    async fn initialize(self: Arc<Self>) {
        let generation = self.next_generation();

        match self.session.current_identity().await {
            Ok(identity) => self.resolve(identity, generation).await,
            Err(AppError::ServiceUnavailable(reason)) => {
                tracing::error!("🔥 Session Store indisponível: {}", reason);
                self.apply(generation, |state| {
                    *state = AuthState::unauthenticated();
                    state.service_unavailable = true;
                });
            }
            Err(AppError::InvalidSession) => {
                tracing::warn!("Sessão persistida inválida; limpando e seguindo deslogado");
                if let Err(e) = self.session.sign_out().await {
                    tracing::warn!("Falha ao limpar a sessão inválida: {}", e);
                }
                self.apply(generation, |state| *state = AuthState::unauthenticated());
            }
            Err(e) => {
                tracing::error!("Erro inesperado ao carregar a identidade: {}", e);
                self.apply(generation, |state| *state = AuthState::unauthenticated());
            }
        }
    }

    async fn resolve(&self, identity: Option<Identity>, generation: u64) {
        let Some(identity) = identity else {
            self.apply(generation, |state| *state = AuthState::unauthenticated());
            return;
        };

        let switched = self.apply(generation, |state| {
            // Mesma identidade (ex.: token renovado) mantém o perfil atual
            if state.identity_id() != Some(identity.id) || state.profile.is_none() {
                state.profile = None;
                state.phase = AuthPhase::Authenticated(ProfileStatus::Loading);
            }
            state.identity = Some(identity.clone());
            state.service_unavailable = false;
        });
        if !switched {
            return;
        }

        let profiles: &dyn ProfileRepository = self.profiles.as_ref();
        let identity_id = identity.id;
        let lookup = self
            .retry
            .run(self.sleeper.as_ref(), "Busca de perfil", move || {
                profiles.find_by_identity_id(identity_id)
            })
            .await;

        let outcome = match lookup {
            Ok(Some(profile)) => ProfileOutcome::Ready(profile),
            Ok(None) => {
                let creating = self.apply(generation, |state| {
                    state.phase = AuthPhase::Authenticated(ProfileStatus::Creating);
                });
                if !creating {
                    return;
                }
                match self.auto_create(&identity).await {
                    Some(profile) => ProfileOutcome::Ready(profile),
                    None => ProfileOutcome::Missing,
                }
            }
            Err(e) => {
                tracing::warn!("⚠️ Perfil de {} indisponível após novas tentativas: {}", identity.email, e);
                ProfileOutcome::Missing
            }
        };

        self.apply(generation, |state| {
            match outcome {
                ProfileOutcome::Ready(profile) => {
                    state.profile = Some(profile);
                    state.phase = AuthPhase::Authenticated(ProfileStatus::Ready);
                }
                ProfileOutcome::Missing => {
                    state.profile = None;
                    state.phase = AuthPhase::Authenticated(ProfileStatus::Missing);
                }
            }
            state.is_loading = false;
        });
    }

    // Uma única inserção por ciclo; perder a corrida para outra inserção não é erro.
    async fn auto_create(&self, identity: &Identity) -> Option<Profile> {
        let _guard = self.create_lock.lock().await;

        // Quem esperou o lock pode encontrar o perfil já criado
        if let Ok(Some(profile)) = self.profiles.find_by_identity_id(identity.id).await {
            return Some(profile);
        }

        let draft = ProfileDraft::for_identity(identity);

        tracing::info!(
            "🆕 Criando perfil para {} (nome '{}', papel {})",
            identity.email,
            draft.display_name,
            draft.role
        );

        match self.profiles.insert(&draft).await {
            Ok(profile) => Some(profile),
            Err(AppError::ProfileAlreadyExists) => {
                tracing::info!("Perfil de {} já foi criado em paralelo; reutilizando", identity.email);
                self.profiles
                    .find_by_identity_id(identity.id)
                    .await
                    .inspect_err(|e| tracing::warn!("Falha ao reler o perfil existente: {}", e))
                    .ok()
                    .flatten()
            }
            Err(e) => {
                tracing::error!("❌ Falha ao criar o perfil de {}: {}", identity.email, e);
                None
            }
        }
    }

    async fn listen(this: Weak<Self>, mut events: broadcast::Receiver<Option<Identity>>) {
        loop {
            let identity = match events.recv().await {
                Ok(identity) => Some(identity),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("{} notificações de identidade perdidas; relendo a atual", skipped);
                    None
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let Some(this) = this.upgrade() else { break };
            if !this.is_mounted() {
                break;
            }

            let generation = this.next_generation();
            tokio::spawn(async move {
                let identity = match identity {
                    Some(identity) => identity,
                    None => match this.session.current_identity().await {
                        Ok(identity) => identity,
                        Err(e) => {
                            tracing::warn!("Falha ao reler a identidade: {}", e);
                            return;
                        }
                    },
                };
                this.resolve(identity, generation).await;
            });
        }
    }

    async fn safety_timer(this: Weak<Self>) {
        let Some((sleeper, timeout)) = this
            .upgrade()
            .map(|strong| (strong.sleeper.clone(), strong.safety_timeout))
        else {
            return;
        };

        sleeper.sleep(timeout).await;

        let Some(this) = this.upgrade() else { return };
        if !this.is_mounted() {
            return;
        }

        let forced = this.state.send_if_modified(|state| {
            if state.is_loading {
                state.is_loading = false;
                true
            } else {
                false
            }
        });
        if forced {
            tracing::warn!("⏱️ AuthBootstrap: forçando isLoading=false após {:?}", timeout);
        }
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn apply(&self, generation: u64, update: impl FnOnce(&mut AuthState)) -> bool {
        let applied = self.state.send_if_modified(|state| {
            if !self.mounted.load(Ordering::SeqCst) || self.generation.load(Ordering::SeqCst) != generation {
                return false;
            }
            update(state);
            true
        });
        if !applied {
            tracing::debug!("Resultado da resolução {} descartado (obsoleto)", generation);
        }
        applied
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for AuthBootstrap {
    fn drop(&mut self) {
        for handle in self.lock_tasks().drain(..) {
            handle.abort();
        }
    }
}
