// src/storage/file_store.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{common::error::AppResult, ports::LocalStore};

/// Armazenamento local persistido num arquivo JSON (`{"chave": "valor"}`).
/// Toda escrita regrava o arquivo inteiro; o volume aqui é de poucas chaves.
#[derive(Debug)]
pub struct FileLocalStore {
    path: PathBuf,
    // Serializa leitura-modificação-escrita dentro do processo
    lock: Mutex<()>,
}

impl FileLocalStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> AppResult<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => Ok(entries),
                Err(e) => {
                    // Arquivo corrompido não deve travar o bootstrap: começa do zero
                    tracing::warn!("⚠️ Armazenamento local ilegível em {:?}: {}", self.path, e);
                    Ok(BTreeMap::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, entries: &BTreeMap<String, String>) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        // Escreve num temporário e renomeia, para não deixar JSON pela metade
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(entries)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalStore for FileLocalStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries).await
    }

    async fn remove(&self, key: &str) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(key).is_some() {
            self.save(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove_persist_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("local.json");

        let store = FileLocalStore::new(&path);
        assert_eq!(store.path(), path.as_path());
        assert_eq!(store.get("currentTenantId").await.unwrap(), None);

        store.set("currentTenantId", "t-1").await.unwrap();
        store.set("other", "x").await.unwrap();

        let reopened = FileLocalStore::new(&path);
        assert_eq!(reopened.get("currentTenantId").await.unwrap().as_deref(), Some("t-1"));

        reopened.remove("currentTenantId").await.unwrap();
        assert_eq!(store.get("currentTenantId").await.unwrap(), None);
        assert_eq!(store.get("other").await.unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn corrupted_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let store = FileLocalStore::new(&path);
        assert_eq!(store.get("currentTenantId").await.unwrap(), None);

        store.set("currentTenantId", "t-2").await.unwrap();
        assert_eq!(store.get("currentTenantId").await.unwrap().as_deref(), Some("t-2"));
    }
}
