// src/services/inactivity.rs

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::services::auth_bootstrap::AuthBootstrap;

/// Desloga a identidade depois de um período sem atividade do usuário.
/// Só age enquanto existe identidade; a UI chama `record_activity` nos eventos de input.
pub struct InactivityMonitor {
    last_activity: Mutex<Instant>,
    limit: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl InactivityMonitor {
    pub fn start(auth: &Arc<AuthBootstrap>, limit: Duration, check_interval: Duration) -> Arc<Self> {
        let this = Arc::new(Self {
            last_activity: Mutex::new(Instant::now()),
            limit,
            task: Mutex::new(None),
        });

        let handle = tokio::spawn(Self::watch(
            Arc::downgrade(&this),
            Arc::downgrade(auth),
            check_interval,
        ));
        *this.lock_task() = Some(handle);

        this
    }

    pub fn record_activity(&self) {
        *self.lock_last() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.lock_last().elapsed()
    }

    pub fn stop(&self) {
        if let Some(handle) = self.lock_task().take() {
            handle.abort();
        }
    }

    async fn watch(this: Weak<Self>, auth: Weak<AuthBootstrap>, check_interval: Duration) {
        let mut ticker = tokio::time::interval(check_interval);
        // O primeiro tick do interval é imediato
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let (Some(monitor), Some(auth)) = (this.upgrade(), auth.upgrade()) else {
                break;
            };
            if !auth.is_mounted() {
                break;
            }

            if auth.identity().is_none() {
                // Sem ninguém logado o relógio não conta
                monitor.record_activity();
                continue;
            }

            let idle = monitor.idle_for();
            if idle > monitor.limit {
                tracing::info!("😴 Usuário inativo há {:?}; encerrando a sessão", idle);
                auth.sign_out().await;
                monitor.record_activity();
            }
        }
    }

    fn lock_last(&self) -> std::sync::MutexGuard<'_, Instant> {
        self.last_activity.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for InactivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
