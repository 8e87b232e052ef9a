// src/lib.rs

//! Bootstrap de sessão do CareFlow: identidade -> perfil -> organização atual.
//!
//! Os serviços vivem em `services` e falam com o mundo só pelas portas de `ports`.

pub mod common;
pub mod config;
pub mod db;
pub mod models;
pub mod ports;
pub mod services;
pub mod storage;

pub use common::error::{AppError, AppResult};
pub use config::{AppConfig, AppState, BootstrapSettings};
pub use ports::Ports;
pub use services::{
    auth_bootstrap::{AuthBootstrap, AuthPhase, AuthState, ProfileStatus},
    inactivity::InactivityMonitor,
    providers::Providers,
    session_store::LocalSessionStore,
    tenant_resolver::{TenantResolver, TenantState},
};
