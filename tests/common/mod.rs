// tests/common/mod.rs
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use careflow_session::{
    common::error::{AppError, AppResult},
    models::auth::{Identity, IdentityMetadata, Profile, ProfileDraft},
    models::tenancy::{Membership, MembershipRole, Tenant, TenantFeatures, TenantSettings},
    ports::{LocalStore, MembershipRepository, PageReloader, Ports, ProfileRepository, SessionStore, TenantDirectory},
    storage::MemoryLocalStore,
};

// ---
// Construtores
// ---

pub fn identity(email: &str) -> Identity {
    identity_with(email, IdentityMetadata::default())
}

pub fn identity_with(email: &str, metadata: IdentityMetadata) -> Identity {
    Identity {
        id: Uuid::new_v4(),
        email: email.to_string(),
        metadata,
        issued_at: Some(Utc::now()),
        expires_at: None,
    }
}

pub fn tenant(name: &str) -> Tenant {
    Tenant {
        id: Uuid::new_v4(),
        name: name.to_string(),
        subdomain: name.to_lowercase(),
        settings: TenantSettings::default(),
        features: TenantFeatures::default(),
        subscription_tier: "basic".into(),
        subscription_status: "active".into(),
        is_active: true,
        created_at: Utc::now(),
    }
}

pub fn membership(identity_id: Uuid, tenant: &Tenant, role: MembershipRole, permissions: &[&str]) -> Membership {
    Membership {
        id: Uuid::new_v4(),
        identity_id,
        tenant_id: tenant.id,
        role,
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        is_active: true,
        joined_at: Utc::now(),
    }
}

/// Deixa as tasks em segundo plano rodarem (com o relógio pausado o tempo avança sozinho).
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// ---
// Session Store
// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    Normal,
    Unavailable,
    Invalid,
    Hang,
}

pub struct FakeSessionStore {
    current: Mutex<Option<Identity>>,
    mode: Mutex<IdentityMode>,
    accounts: Mutex<HashMap<String, (String, Identity)>>,
    events: broadcast::Sender<Option<Identity>>,
    sign_outs: AtomicUsize,
    sign_in_calls: AtomicUsize,
}

impl FakeSessionStore {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            current: Mutex::new(None),
            mode: Mutex::new(IdentityMode::Normal),
            accounts: Mutex::new(HashMap::new()),
            events,
            sign_outs: AtomicUsize::new(0),
            sign_in_calls: AtomicUsize::new(0),
        })
    }

    pub fn signed_in(identity: Identity) -> Arc<Self> {
        let store = Self::new();
        *store.current.lock().unwrap() = Some(identity);
        store
    }

    pub fn set_mode(&self, mode: IdentityMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn add_account(&self, email: &str, password: &str) -> Identity {
        let identity = identity(email);
        self.accounts
            .lock()
            .unwrap()
            .insert(email.to_string(), (password.to_string(), identity.clone()));
        identity
    }

    /// Simula uma troca de identidade vinda do provedor (outra aba, refresh etc.).
    pub fn switch_identity(&self, identity: Option<Identity>) {
        *self.current.lock().unwrap() = identity.clone();
        let _ = self.events.send(identity);
    }

    pub fn sign_outs(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for FakeSessionStore {
    async fn current_identity(&self) -> AppResult<Option<Identity>> {
        let mode = *self.mode.lock().unwrap();
        match mode {
            IdentityMode::Normal => Ok(self.current.lock().unwrap().clone()),
            IdentityMode::Unavailable => Err(AppError::ServiceUnavailable("connection refused".into())),
            IdentityMode::Invalid => Err(AppError::InvalidSession),
            IdentityMode::Hang => std::future::pending().await,
        }
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> AppResult<Identity> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        let account = self.accounts.lock().unwrap().get(email).cloned();
        match account {
            Some((expected, identity)) if expected == password => {
                self.switch_identity(Some(identity.clone()));
                Ok(identity)
            }
            _ => Err(AppError::InvalidCredentials),
        }
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: IdentityMetadata) -> AppResult<Identity> {
        let identity = {
            let mut accounts = self.accounts.lock().unwrap();
            if accounts.contains_key(email) {
                return Err(AppError::EmailAlreadyExists);
            }
            let identity = identity_with(email, metadata);
            accounts.insert(email.to_string(), (password.to_string(), identity.clone()));
            identity
        };
        self.switch_identity(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> AppResult<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.set_mode(IdentityMode::Normal);
        let previous = self.current.lock().unwrap().take();
        if previous.is_some() {
            let _ = self.events.send(None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Option<Identity>> {
        self.events.subscribe()
    }
}

// ---
// Perfis
// ---

#[derive(Default)]
pub struct FakeProfileRepository {
    rows: Mutex<HashMap<Uuid, Profile>>,
    drafts: Mutex<Vec<ProfileDraft>>,
    delays: Mutex<HashMap<Uuid, Duration>>,
    transient_failures: AtomicUsize,
    hang: AtomicBool,
    // Simula outra aba inserindo o perfil entre a busca e a inserção
    conflict_on_insert: AtomicBool,
    fail_inserts: AtomicBool,
    lookups: AtomicUsize,
    inserts: AtomicUsize,
}

impl FakeProfileRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_profile(self: Arc<Self>, profile: Profile) -> Arc<Self> {
        self.rows.lock().unwrap().insert(profile.identity_id, profile);
        self
    }

    pub fn fail_lookups(&self, times: usize) {
        self.transient_failures.store(times, Ordering::SeqCst);
    }

    pub fn delay_for(&self, identity_id: Uuid, delay: Duration) {
        self.delays.lock().unwrap().insert(identity_id, delay);
    }

    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn conflict_on_insert(&self) {
        self.conflict_on_insert.store(true, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    pub fn drafts(&self) -> Vec<ProfileDraft> {
        self.drafts.lock().unwrap().clone()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

pub fn profile_from(draft: &ProfileDraft) -> Profile {
    Profile {
        id: Uuid::new_v4(),
        identity_id: draft.identity_id,
        email: draft.email.clone(),
        display_name: draft.display_name.clone(),
        role: draft.role.clone(),
        tenant_id: None,
        is_super_admin: false,
        is_active: draft.is_active,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn profile_for(identity: &Identity) -> Profile {
    profile_from(&ProfileDraft::for_identity(identity))
}

#[async_trait]
impl ProfileRepository for FakeProfileRepository {
    async fn find_by_identity_id(&self, identity_id: Uuid) -> AppResult<Option<Profile>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = self.delays.lock().unwrap().get(&identity_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::ServiceUnavailable("profiles offline".into()));
        }

        Ok(self.rows.lock().unwrap().get(&identity_id).cloned())
    }

    async fn insert(&self, draft: &ProfileDraft) -> AppResult<Profile> {
        self.inserts.fetch_add(1, Ordering::SeqCst);
        self.drafts.lock().unwrap().push(draft.clone());

        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable("profiles read-only".into()));
        }

        let mut rows = self.rows.lock().unwrap();
        if self.conflict_on_insert.swap(false, Ordering::SeqCst) {
            rows.insert(draft.identity_id, profile_from(draft));
            return Err(AppError::ProfileAlreadyExists);
        }
        if rows.contains_key(&draft.identity_id) {
            return Err(AppError::ProfileAlreadyExists);
        }
        let profile = profile_from(draft);
        rows.insert(draft.identity_id, profile.clone());
        Ok(profile)
    }
}

// ---
// Vínculos
// ---

#[derive(Default)]
pub struct FakeMembershipRepository {
    rows: Mutex<Vec<Membership>>,
    delay: Mutex<Option<Duration>>,
    hang: AtomicBool,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl FakeMembershipRepository {
    pub fn new(rows: Vec<Membership>) -> Arc<Self> {
        Arc::new(Self {
            rows: Mutex::new(rows),
            ..Default::default()
        })
    }

    pub fn push(&self, membership: Membership) {
        self.rows.lock().unwrap().push(membership);
    }

    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    /// A resposta reflete as linhas do momento da chamada, entregues depois do atraso.
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MembershipRepository for FakeMembershipRepository {
    async fn find_active_by_identity(&self, identity_id: Uuid) -> AppResult<Vec<Membership>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::ServiceUnavailable("memberships offline".into()));
        }

        let snapshot: Vec<Membership> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.identity_id == identity_id && m.is_active)
            .cloned()
            .collect();
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(snapshot)
    }
}

// ---
// Diretório de tenants
// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMode {
    Normal,
    Empty,
    Fail,
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Normal,
    // Cria no banco mas a resposta nunca chega
    HangAfterCreate,
    HangWithoutCreate,
}

pub struct FakeTenantDirectory {
    tenants: Mutex<Vec<Tenant>>,
    memberships: Option<Arc<FakeMembershipRepository>>,
    rpc_mode: Mutex<RpcMode>,
    create_mode: Mutex<CreateMode>,
    rpc_calls: AtomicUsize,
    direct_calls: AtomicUsize,
    create_calls: AtomicUsize,
    context_calls: Mutex<Vec<(Uuid, Uuid)>>,
}

impl FakeTenantDirectory {
    /// `memberships` recebe o vínculo de dono quando um tenant é criado.
    pub fn new(tenants: Vec<Tenant>, memberships: Option<Arc<FakeMembershipRepository>>) -> Arc<Self> {
        Arc::new(Self {
            tenants: Mutex::new(tenants),
            memberships,
            rpc_mode: Mutex::new(RpcMode::Normal),
            create_mode: Mutex::new(CreateMode::Normal),
            rpc_calls: AtomicUsize::new(0),
            direct_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            context_calls: Mutex::new(Vec::new()),
        })
    }

    pub fn add_tenant(&self, tenant: Tenant) {
        self.tenants.lock().unwrap().push(tenant);
    }

    pub fn set_rpc_mode(&self, mode: RpcMode) {
        *self.rpc_mode.lock().unwrap() = mode;
    }

    pub fn set_create_mode(&self, mode: CreateMode) {
        *self.create_mode.lock().unwrap() = mode;
    }

    pub fn rpc_calls(&self) -> usize {
        self.rpc_calls.load(Ordering::SeqCst)
    }

    pub fn direct_calls(&self) -> usize {
        self.direct_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn context_calls(&self) -> Vec<(Uuid, Uuid)> {
        self.context_calls.lock().unwrap().clone()
    }

    fn visible_to(&self, identity_id: Uuid) -> Vec<Tenant> {
        let tenant_ids: Vec<Uuid> = match &self.memberships {
            Some(repo) => repo
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.identity_id == identity_id && m.is_active)
                .map(|m| m.tenant_id)
                .collect(),
            None => return self.tenants.lock().unwrap().clone(),
        };
        self.tenants
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_active && tenant_ids.contains(&t.id))
            .cloned()
            .collect()
    }

    fn insert_tenant(&self, name: &str, subdomain: &str, owner_id: Uuid) -> Tenant {
        let mut created = tenant(name);
        created.subdomain = subdomain.to_string();
        self.tenants.lock().unwrap().push(created.clone());
        if let Some(repo) = &self.memberships {
            repo.push(membership(owner_id, &created, MembershipRole::Owner, &[]));
        }
        created
    }
}

#[async_trait]
impl TenantDirectory for FakeTenantDirectory {
    async fn fetch_my_tenants(&self, identity_id: Uuid) -> AppResult<Vec<Tenant>> {
        self.rpc_calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.rpc_mode.lock().unwrap();
        match mode {
            RpcMode::Normal => Ok(self.visible_to(identity_id)),
            RpcMode::Empty => Ok(Vec::new()),
            RpcMode::Fail => Err(AppError::ServiceUnavailable("infinite recursion detected in policy".into())),
            RpcMode::Hang => std::future::pending().await,
        }
    }

    async fn find_active_by_ids(&self, ids: &[Uuid]) -> AppResult<Vec<Tenant>> {
        self.direct_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tenants
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.is_active && ids.contains(&t.id))
            .cloned()
            .collect())
    }

    async fn find_by_subdomain(&self, subdomain: &str) -> AppResult<Option<Tenant>> {
        Ok(self
            .tenants
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.subdomain == subdomain)
            .cloned())
    }

    async fn create_tenant(&self, name: &str, subdomain: &str, owner_id: Uuid) -> AppResult<Tenant> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mode = *self.create_mode.lock().unwrap();
        match mode {
            CreateMode::Normal => Ok(self.insert_tenant(name, subdomain, owner_id)),
            CreateMode::HangAfterCreate => {
                self.insert_tenant(name, subdomain, owner_id);
                std::future::pending().await
            }
            CreateMode::HangWithoutCreate => std::future::pending().await,
        }
    }

    async fn set_tenant_context(&self, identity_id: Uuid, tenant_id: Uuid) -> AppResult<()> {
        self.context_calls.lock().unwrap().push((identity_id, tenant_id));
        Ok(())
    }
}

// ---
// Armazenamento local e recarregamento
// ---

/// Conta as escritas para verificar operações que não devem persistir nada.
#[derive(Default)]
pub struct CountingLocalStore {
    inner: MemoryLocalStore,
    writes: AtomicUsize,
}

impl CountingLocalStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_entry(key: &str, value: &str) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryLocalStore::with_entry(key, value),
            writes: AtomicUsize::new(0),
        })
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn read(&self, key: &str) -> Option<String> {
        self.inner.get(key).await.unwrap()
    }
}

#[async_trait]
impl LocalStore for CountingLocalStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(key).await
    }
}

#[derive(Default)]
pub struct RecordingReloader {
    reloads: AtomicUsize,
}

impl RecordingReloader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl PageReloader for RecordingReloader {
    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

// ---
// Montagem
// ---

pub struct Harness {
    pub session: Arc<FakeSessionStore>,
    pub profiles: Arc<FakeProfileRepository>,
    pub memberships: Arc<FakeMembershipRepository>,
    pub directory: Arc<FakeTenantDirectory>,
    pub local_store: Arc<CountingLocalStore>,
    pub reloader: Arc<RecordingReloader>,
}

impl Harness {
    pub fn new(session: Arc<FakeSessionStore>) -> Self {
        let memberships = FakeMembershipRepository::new(Vec::new());
        Self {
            session,
            profiles: FakeProfileRepository::new(),
            directory: FakeTenantDirectory::new(Vec::new(), Some(memberships.clone())),
            memberships,
            local_store: CountingLocalStore::new(),
            reloader: RecordingReloader::new(),
        }
    }

    pub fn ports(&self) -> Ports {
        Ports::new(
            self.session.clone(),
            self.profiles.clone(),
            self.memberships.clone(),
            self.directory.clone(),
            self.local_store.clone(),
            self.reloader.clone(),
        )
    }
}
