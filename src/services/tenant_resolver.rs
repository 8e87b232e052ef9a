// src/services/tenant_resolver.rs

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, Weak,
};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::{
        error::{AppError, AppResult},
        retry::Sleeper,
    },
    config::BootstrapSettings,
    models::auth::Identity,
    models::tenancy::{CreateTenantPayload, Membership, Tenant},
    ports::{LocalStore, MembershipRepository, PageReloader, Ports, TenantDirectory, CURRENT_TENANT_KEY},
    services::auth_bootstrap::AuthState,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantState {
    // Identidade a quem as listas pertencem
    pub identity_id: Option<Uuid>,
    pub tenants: Vec<Tenant>,
    pub memberships: Vec<Membership>,
    pub current_tenant: Option<Tenant>,
    pub is_loading: bool,
}

impl TenantState {
    fn initial() -> Self {
        Self {
            identity_id: None,
            tenants: Vec::new(),
            memberships: Vec::new(),
            current_tenant: None,
            is_loading: true,
        }
    }

    fn cleared(&mut self) {
        self.identity_id = None;
        self.tenants.clear();
        self.memberships.clear();
        self.current_tenant = None;
        self.is_loading = false;
    }

    pub fn current_membership(&self) -> Option<&Membership> {
        let current = self.current_tenant.as_ref()?;
        self.memberships.iter().find(|m| m.tenant_id == current.id)
    }
}

/// Escolha do tenant atual: pedido (deep-link) > salvo localmente > primeiro da lista.
/// Ids que não estão na lista carregada são ignorados.
pub fn select_tenant<'a>(
    tenants: &'a [Tenant],
    requested: Option<Uuid>,
    persisted: Option<Uuid>,
) -> Option<&'a Tenant> {
    let find = |id: Option<Uuid>| id.and_then(|id| tenants.iter().find(|t| t.id == id));
    find(requested).or_else(|| find(persisted)).or_else(|| tenants.first())
}

/// Reordena os tenants pela ordem de entrada (joined_at) dos vínculos.
/// Tenants sem vínculo carregado vão para o fim, na ordem original.
pub fn order_by_membership(mut tenants: Vec<Tenant>, memberships: &[Membership]) -> Vec<Tenant> {
    let rank: HashMap<Uuid, usize> = memberships
        .iter()
        .enumerate()
        .map(|(i, m)| (m.tenant_id, i))
        .collect();
    // sort_by_key é estável
    tenants.sort_by_key(|t| rank.get(&t.id).copied().unwrap_or(usize::MAX));
    tenants.dedup_by_key(|t| t.id);
    tenants
}

/// Organizações em que a identidade atual pode atuar, e qual delas é a atual.
pub struct TenantResolver {
    auth: watch::Receiver<AuthState>,
    memberships: Arc<dyn MembershipRepository>,
    directory: Arc<dyn TenantDirectory>,
    local_store: Arc<dyn LocalStore>,
    reloader: Arc<dyn PageReloader>,
    sleeper: Arc<dyn Sleeper>,
    safety_timeout: Duration,
    rpc_timeout: Duration,
    requested_tenant: Option<Uuid>,
    state: watch::Sender<TenantState>,
    mounted: AtomicBool,
    in_flight: AtomicBool,
    reload_requested: AtomicBool,
    load_generation: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TenantResolver {
    /// Monta o resolvedor ligado ao estado de autenticação.
    /// Recarrega os tenants sempre que o id da identidade muda.
    pub fn mount(auth: watch::Receiver<AuthState>, ports: &Ports, settings: &BootstrapSettings) -> Arc<Self> {
        let (state, _) = watch::channel(TenantState::initial());

        let this = Arc::new(Self {
            auth,
            memberships: ports.memberships.clone(),
            directory: ports.directory.clone(),
            local_store: ports.local_store.clone(),
            reloader: ports.reloader.clone(),
            sleeper: ports.sleeper.clone(),
            safety_timeout: settings.tenant_safety_timeout,
            rpc_timeout: settings.tenant_rpc_timeout,
            requested_tenant: settings.requested_tenant,
            state,
            mounted: AtomicBool::new(true),
            in_flight: AtomicBool::new(false),
            reload_requested: AtomicBool::new(false),
            load_generation: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
        });

        let watcher = tokio::spawn(Self::follow_identity(Arc::downgrade(&this), this.auth.clone()));
        this.lock_tasks().push(watcher);

        this
    }

    // ---
    // Leitura do estado
    // ---

    pub fn state(&self) -> TenantState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TenantState> {
        self.state.subscribe()
    }

    pub fn current_tenant(&self) -> Option<Tenant> {
        self.state.borrow().current_tenant.clone()
    }

    pub fn tenants(&self) -> Vec<Tenant> {
        self.state.borrow().tenants.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub async fn wait_until_settled(&self) -> TenantState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|state| !state.is_loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    /// Espera a carga da identidade indicada terminar, até `limit`.
    /// Estourado o limite, devolve o estado como estiver.
    pub async fn wait_for_identity(&self, identity_id: Option<Uuid>, limit: Duration) -> TenantState {
        let mut rx = self.state.subscribe();
        let loaded = tokio::time::timeout(
            limit,
            rx.wait_for(|state| !state.is_loading && state.identity_id == identity_id),
        )
        .await;
        match loaded {
            Ok(Ok(state)) => state.clone(),
            _ => self.state(),
        }
    }

    /// owner/admin sempre; demais papéis só com a permissão listada literalmente.
    pub fn has_permission(&self, permission: &str) -> bool {
        if self.current_identity().is_none() {
            return false;
        }
        let state = self.state.borrow();
        state
            .current_membership()
            .is_some_and(|membership| membership.grants(permission))
    }

    /// Tudo liberado por padrão; só `settings.disabled_features` desliga algo.
    pub fn has_feature(&self, feature: &str) -> bool {
        match &self.state.borrow().current_tenant {
            Some(tenant) => !tenant.settings.is_feature_disabled(feature),
            None => true,
        }
    }

    pub fn can_access_careflow(&self) -> bool {
        self.state
            .borrow()
            .current_tenant
            .as_ref()
            .and_then(|t| t.features.careflow_enabled)
            .unwrap_or(false)
    }

    pub fn can_access_novumflow(&self) -> bool {
        self.state
            .borrow()
            .current_tenant
            .as_ref()
            .and_then(|t| t.features.novumflow_enabled)
            .unwrap_or(true)
    }

    // ---
    // Operações
    // ---

    /// Carrega vínculos e tenants da identidade atual e escolhe o tenant corrente.
    ///
    /// Chamadas concorrentes não disparam uma segunda busca: a carga em andamento
    /// faz mais uma passada ao terminar.
    pub async fn load_tenants(self: &Arc<Self>) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::debug!("TenantResolver: carga já em andamento, agendando nova passada");
            self.reload_requested.store(true, Ordering::SeqCst);
            return;
        }

        loop {
            self.reload_requested.store(false, Ordering::SeqCst);
            self.load_once().await;
            self.in_flight.store(false, Ordering::SeqCst);

            if !self.is_mounted() || !self.reload_requested.swap(false, Ordering::SeqCst) {
                break;
            }
            // Outra chamada pode ter assumido a carga nesse meio tempo
            if self.in_flight.swap(true, Ordering::SeqCst) {
                break;
            }
        }
    }

    async fn load_once(self: &Arc<Self>) {
        let Some(identity) = self.current_identity() else {
            tracing::debug!("TenantResolver: sem identidade, limpando tenants");
            self.state.send_modify(TenantState::cleared);
            return;
        };

        let generation = self.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.send_modify(|state| state.is_loading = true);
        self.spawn_liveness_guard(generation);

        let Ok(fetched) = tokio::time::timeout(self.rpc_timeout, self.fetch(&identity)).await else {
            tracing::error!("TenantResolver: carga de {} estourou o tempo", identity.email);
            self.state.send_modify(|state| state.is_loading = false);
            return;
        };

        // Resultado obsoleto: a identidade mudou ou o serviço foi desmontado
        if !self.is_mounted() {
            return;
        }
        if self.current_identity().map(|i| i.id) != Some(identity.id) {
            tracing::debug!("TenantResolver: carga de {} descartada (identidade mudou)", identity.email);
            // Nada da identidade anterior pode continuar visível
            self.state.send_modify(|state| {
                state.identity_id = None;
                state.tenants.clear();
                state.memberships.clear();
                state.current_tenant = None;
            });
            return;
        }

        let (memberships, tenants) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                // Falha de leitura: nada na tela, mas a escolha salva continua intacta
                tracing::error!("TenantResolver: falha ao carregar tenants de {}: {}", identity.email, e);
                self.state.send_modify(|state| {
                    state.identity_id = Some(identity.id);
                    state.tenants.clear();
                    state.memberships.clear();
                    state.current_tenant = None;
                    state.is_loading = false;
                });
                return;
            }
        };

        let persisted = match self.local_store.get(CURRENT_TENANT_KEY).await {
            Ok(value) => value.and_then(|raw| Uuid::parse_str(raw.trim()).ok()),
            Err(e) => {
                tracing::warn!("Falha ao ler o tenant salvo: {}", e);
                None
            }
        };
        let selected = select_tenant(&tenants, self.requested_tenant, persisted).cloned();

        tracing::info!(
            "🏢 {} tenant(s) para {}; atual: {}",
            tenants.len(),
            identity.email,
            selected.as_ref().map(|t| t.name.as_str()).unwrap_or("nenhum")
        );

        self.state.send_modify(|state| {
            state.identity_id = Some(identity.id);
            state.memberships = memberships;
            state.tenants = tenants;
            state.current_tenant = selected.clone();
            state.is_loading = false;
        });

        self.persist_selection(selected.as_ref().map(|t| t.id)).await;

        if let Some(tenant) = selected {
            self.spawn_tenant_context(identity.id, tenant.id);
        }
    }

    /// Troca o tenant atual e pede o recarregamento completo da apresentação.
    /// Um id fora da lista carregada é ignorado (só log). Devolve se trocou.
    pub async fn switch_tenant(&self, tenant_id: Uuid) -> bool {
        let Some(tenant) = self
            .state
            .borrow()
            .tenants
            .iter()
            .find(|t| t.id == tenant_id)
            .cloned()
        else {
            tracing::warn!("Tenant {} não está entre os carregados; troca ignorada", tenant_id);
            return false;
        };

        self.state
            .send_modify(|state| state.current_tenant = Some(tenant.clone()));
        self.persist_selection(Some(tenant.id)).await;

        if let Some(identity) = self.current_identity() {
            self.notify_tenant_context(identity.id, tenant.id).await;
        }

        tracing::info!("🔄 Tenant atual agora é '{}'; recarregando", tenant.name);
        self.reloader.reload();
        true
    }

    /// Cria a organização pelo procedimento remoto e atualiza a lista.
    pub async fn create_tenant(self: &Arc<Self>, name: &str, subdomain: &str) -> AppResult<Tenant> {
        let payload = CreateTenantPayload::new(name, subdomain);
        payload.validate()?;

        let identity = self.current_identity().ok_or(AppError::NotAuthenticated)?;

        // Checa antes para não esperar o timeout do RPC num subdomínio ocupado
        if self.directory.find_by_subdomain(&payload.subdomain).await?.is_some() {
            tracing::warn!("Subdomínio '{}' já existe", payload.subdomain);
            return Err(AppError::SubdomainAlreadyExists(payload.subdomain));
        }

        let created = tokio::time::timeout(
            self.rpc_timeout,
            self.directory
                .create_tenant(&payload.name, &payload.subdomain, identity.id),
        )
        .await;

        let tenant = match created {
            Ok(Ok(tenant)) => tenant,
            Ok(Err(e)) => {
                tracing::error!("❌ create_tenant falhou para '{}': {}", payload.subdomain, e);
                return Err(e);
            }
            Err(_) => {
                tracing::warn!("create_tenant estourou o tempo; verificando se a organização foi criada");
                match self.directory.find_by_subdomain(&payload.subdomain).await {
                    Ok(Some(tenant)) => tenant,
                    Ok(None) => return Err(AppError::Timeout("create_tenant")),
                    Err(e) => {
                        tracing::error!("Falha ao verificar a criação de '{}': {}", payload.subdomain, e);
                        return Err(AppError::Timeout("create_tenant"));
                    }
                }
            }
        };

        tracing::info!("✅ Organização '{}' criada ({})", tenant.name, tenant.id);
        self.load_tenants().await;
        Ok(tenant)
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    pub fn unmount(&self) {
        if self.mounted.swap(false, Ordering::SeqCst) {
            for handle in self.lock_tasks().drain(..) {
                handle.abort();
            }
            tracing::debug!("TenantResolver desmontado");
        }
    }

    // ---
    // Internos
    // ---

    fn current_identity(&self) -> Option<Identity> {
        self.auth.borrow().identity.clone()
    }

    // Vínculos primeiro; depois RPC preferido, com leitura direta como alternativa
    async fn fetch(&self, identity: &Identity) -> AppResult<(Vec<Membership>, Vec<Tenant>)> {
        let memberships = self.memberships.find_active_by_identity(identity.id).await?;

        let tenants = match self.directory.fetch_my_tenants(identity.id).await {
            Ok(tenants) if !tenants.is_empty() => tenants,
            Ok(_) => {
                tracing::warn!("RPC get_my_tenants vazio; usando leitura direta");
                self.fetch_direct(&memberships).await?
            }
            Err(e) => {
                tracing::warn!("RPC get_my_tenants falhou ({}); usando leitura direta", e);
                self.fetch_direct(&memberships).await?
            }
        };

        let tenants = order_by_membership(tenants, &memberships);
        Ok((memberships, tenants))
    }

    async fn fetch_direct(&self, memberships: &[Membership]) -> AppResult<Vec<Tenant>> {
        let mut ids: Vec<Uuid> = Vec::with_capacity(memberships.len());
        for membership in memberships {
            if !ids.contains(&membership.tenant_id) {
                ids.push(membership.tenant_id);
            }
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.directory.find_active_by_ids(&ids).await
    }

    async fn persist_selection(&self, tenant_id: Option<Uuid>) {
        let result = match tenant_id {
            Some(id) => self.local_store.set(CURRENT_TENANT_KEY, &id.to_string()).await,
            None => self.local_store.remove(CURRENT_TENANT_KEY).await,
        };
        if let Err(e) = result {
            tracing::warn!("Falha ao salvar o tenant atual: {}", e);
        }
    }

    // Melhor esforço, com tempo limitado
    async fn notify_tenant_context(&self, identity_id: Uuid, tenant_id: Uuid) {
        match tokio::time::timeout(
            self.rpc_timeout,
            self.directory.set_tenant_context(identity_id, tenant_id),
        )
        .await
        {
            Ok(Ok(())) => tracing::debug!("Contexto RLS definido para {}", tenant_id),
            Ok(Err(e)) => tracing::error!("Erro ao definir o contexto RLS: {}", e),
            Err(_) => tracing::warn!("set_current_tenant estourou o tempo para {}", tenant_id),
        }
    }

    fn spawn_tenant_context(self: &Arc<Self>, identity_id: Uuid, tenant_id: Uuid) {
        let this = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Some(this) = this.upgrade() {
                this.notify_tenant_context(identity_id, tenant_id).await;
            }
        });
    }

    fn spawn_liveness_guard(self: &Arc<Self>, generation: u64) {
        let this: Weak<Self> = Arc::downgrade(self);
        let sleeper = self.sleeper.clone();
        let timeout = self.safety_timeout;

        let handle = tokio::spawn(async move {
            sleeper.sleep(timeout).await;
            let Some(this) = this.upgrade() else { return };
            if !this.is_mounted() || this.load_generation.load(Ordering::SeqCst) != generation {
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
                tracing::warn!("⏱️ TenantResolver: forçando isLoading=false após {:?}", timeout);
            }
        });

        let mut tasks = self.lock_tasks();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    async fn follow_identity(this: Weak<Self>, mut auth: watch::Receiver<AuthState>) {
        let mut last_seen: Option<Option<Uuid>> = None;

        loop {
            let current = auth.borrow_and_update().identity_id();
            if last_seen != Some(current) {
                last_seen = Some(current);
                let Some(strong) = this.upgrade() else { break };
                strong.load_tenants().await;
            }

            if auth.changed().await.is_err() {
                break;
            }
        }
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TenantResolver {
    fn drop(&mut self) {
        for handle in self.lock_tasks().drain(..) {
            handle.abort();
        }
    }
}
