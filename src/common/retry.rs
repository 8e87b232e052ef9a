// src/common/retry.rs

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::common::error::AppResult;

/// Abstração do "relógio" usada pelos serviços para esperar.
/// Em produção é o timer do tokio; nos testes pode ser substituída.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Política de nova tentativa com limite explícito.
/// `max_attempts` conta a primeira chamada (2 = uma tentativa extra).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Executa `op` até dar certo ou esgotar as tentativas.
    /// Só erros transitórios são repetidos; os demais voltam na hora.
    pub async fn run<T, F, Fut>(&self, sleeper: &dyn Sleeper, label: &str, mut op: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && e.is_transient() => {
                    tracing::warn!(
                        "🔁 {} falhou (tentativa {}/{}): {}. Nova tentativa em {:?}",
                        label,
                        attempt,
                        max_attempts,
                        e,
                        self.backoff
                    );
                    sleeper.sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
