// src/services/providers.rs

use std::sync::Arc;

use crate::{
    common::error::{AppError, AppResult},
    config::BootstrapSettings,
    ports::Ports,
    services::{auth_bootstrap::AuthBootstrap, inactivity::InactivityMonitor, tenant_resolver::TenantResolver},
};

/// Escopo de injeção: os serviços montados no início da aplicação.
///
/// Pedir um serviço que não foi montado é erro de programação e falha na hora
/// com `AppError::ProviderMissing`.
#[derive(Default, Clone)]
pub struct Providers {
    auth: Option<Arc<AuthBootstrap>>,
    tenant: Option<Arc<TenantResolver>>,
    inactivity: Option<Arc<InactivityMonitor>>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Monta tudo na ordem certa: autenticação, tenants (que seguem a identidade)
    /// e o monitor de inatividade.
    pub fn mount(ports: &Ports, settings: &BootstrapSettings) -> Self {
        let auth = AuthBootstrap::mount(ports, settings);
        let tenant = TenantResolver::mount(auth.subscribe(), ports, settings);
        let inactivity = InactivityMonitor::start(
            &auth,
            settings.inactivity_limit,
            settings.inactivity_check_interval,
        );

        Self {
            auth: Some(auth),
            tenant: Some(tenant),
            inactivity: Some(inactivity),
        }
    }

    pub fn with_auth(mut self, auth: Arc<AuthBootstrap>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_tenant(mut self, tenant: Arc<TenantResolver>) -> Self {
        self.tenant = Some(tenant);
        self
    }

    pub fn auth(&self) -> AppResult<Arc<AuthBootstrap>> {
        self.auth
            .clone()
            .ok_or(AppError::ProviderMissing("AuthBootstrap"))
    }

    pub fn tenant(&self) -> AppResult<Arc<TenantResolver>> {
        self.tenant
            .clone()
            .ok_or(AppError::ProviderMissing("TenantResolver"))
    }

    pub fn inactivity(&self) -> AppResult<Arc<InactivityMonitor>> {
        self.inactivity
            .clone()
            .ok_or(AppError::ProviderMissing("InactivityMonitor"))
    }

    /// Desmonta na ordem inversa.
    pub fn shutdown(&self) {
        if let Some(inactivity) = &self.inactivity {
            inactivity.stop();
        }
        if let Some(tenant) = &self.tenant {
            tenant.unmount();
        }
        if let Some(auth) = &self.auth {
            auth.unmount();
        }
    }
}
