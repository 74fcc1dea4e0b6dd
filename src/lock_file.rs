//! Lock file (§6.3): a YAML sidecar recording every import's pinned
//! integrity hash and approval, every approved shell command, and the
//! project's trusted domains, so re-running an interpretation doesn't
//! re-prompt for approvals it already has on file.
//!
//! Serialized with `serde`/`serde_yaml`, the same pairing the teacher uses
//! for its own config-shaped data; `IndexMap` keeps `imports` in
//! insertion order so the on-disk file doesn't churn unrelated lines on
//! every save.

use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::capabilities::{Clock, LockFile};
use crate::errors::InterpreterError;
use crate::fs::FileSystem;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportLockEntry {
    pub resolved: String,
    pub integrity: String,
    pub approved_at: String,
    pub approved_by: String,
    pub trust: String,
    pub ttl_secs: Option<u64>,
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySection {
    pub trusted_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LockFileData {
    pub version: u32,
    pub imports: IndexMap<String, ImportLockEntry>,
    pub resolver_prefixes: IndexMap<String, String>,
    pub command_approvals: Vec<String>,
    pub security: SecuritySection,
}

impl Default for LockFileData {
    fn default() -> Self {
        Self {
            version: 1,
            imports: IndexMap::new(),
            resolver_prefixes: IndexMap::new(),
            command_approvals: Vec::new(),
            security: SecuritySection::default(),
        }
    }
}

/// A lock file persisted as YAML via the injected [`FileSystem`].
pub struct YamlLockFile {
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    path: String,
    data: RwLock<LockFileData>,
}

impl YamlLockFile {
    /// Load `path` if it exists and parses, otherwise start from an empty
    /// lock file (a missing or malformed lock file is not itself an
    /// error: it just means nothing is pre-approved yet).
    pub async fn load(fs: Arc<dyn FileSystem>, clock: Arc<dyn Clock>, path: impl Into<String>) -> Self {
        let path = path.into();
        let data = match fs.read_file(&path).await {
            Ok(contents) => serde_yaml::from_str(&contents).unwrap_or_default(),
            Err(_) => LockFileData::default(),
        };
        Self { fs, clock, path, data: RwLock::new(data) }
    }

    async fn persist(&self) -> Result<(), InterpreterError> {
        let data = self.data.read().await;
        let yaml = serde_yaml::to_string(&*data).map_err(|e| InterpreterError::ValidationFailed {
            message: format!("failed to serialize lock file: {e}"),
        })?;
        self.fs
            .write_file(&self.path, yaml.as_bytes())
            .await
            .map_err(|e| InterpreterError::Permission { path: format!("{}: {e}", self.path) })
    }

    pub async fn snapshot(&self) -> LockFileData {
        self.data.read().await.clone()
    }
}

#[async_trait]
impl LockFile for YamlLockFile {
    async fn record_import(
        &self,
        source: &str,
        resolved: &str,
        integrity: &str,
        approved_by: &str,
        trust: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), InterpreterError> {
        let now = self.clock.now();
        let expires_at = ttl_secs.map(|secs| (now + chrono::Duration::seconds(secs as i64)).to_rfc3339());
        let entry = ImportLockEntry {
            resolved: resolved.to_string(),
            integrity: integrity.to_string(),
            approved_at: now.to_rfc3339(),
            approved_by: approved_by.to_string(),
            trust: trust.to_string(),
            ttl_secs,
            expires_at,
        };
        {
            let mut data = self.data.write().await;
            data.imports.insert(source.to_string(), entry);
        }
        self.persist().await
    }

    async fn lookup_import(&self, source: &str) -> Option<ImportLockEntry> {
        let data = self.data.read().await;
        let entry = data.imports.get(source)?.clone();
        if let Some(expires_at) = &entry.expires_at {
            if let Ok(expiry) = chrono::DateTime::parse_from_rfc3339(expires_at) {
                if self.clock.now() > expiry {
                    return None;
                }
            }
        }
        Some(entry)
    }

    async fn record_command_approval(&self, command_hash: &str) -> Result<(), InterpreterError> {
        {
            let mut data = self.data.write().await;
            if !data.command_approvals.iter().any(|h| h == command_hash) {
                data.command_approvals.push(command_hash.to_string());
            }
        }
        self.persist().await
    }

    async fn is_command_approved(&self, command_hash: &str) -> bool {
        self.data.read().await.command_approvals.iter().any(|h| h == command_hash)
    }

    async fn trusted_domains(&self) -> Vec<String> {
        self.data.read().await.security.trusted_domains.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::SystemClock;
    use crate::fs::InMemoryFs;

    fn lock_file() -> YamlLockFile {
        YamlLockFile {
            fs: Arc::new(InMemoryFs::new()),
            clock: Arc::new(SystemClock),
            path: "/proj/mlc.lock.yaml".to_string(),
            data: RwLock::new(LockFileData::default()),
        }
    }

    #[tokio::test]
    async fn record_then_lookup_import() {
        let lf = lock_file();
        lf.record_import("https://x.test/a.mld", "https://x.test/a.mld", "sha256:abc", "user", "always", None)
            .await
            .unwrap();
        let entry = lf.lookup_import("https://x.test/a.mld").await.unwrap();
        assert_eq!(entry.integrity, "sha256:abc");
    }

    #[tokio::test]
    async fn lookup_missing_import_is_none() {
        let lf = lock_file();
        assert!(lf.lookup_import("nope").await.is_none());
    }

    #[tokio::test]
    async fn expired_import_entry_is_not_returned() {
        let lf = lock_file();
        lf.record_import("https://x.test/a.mld", "https://x.test/a.mld", "sha256:abc", "user", "once", Some(0))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(lf.lookup_import("https://x.test/a.mld").await.is_none());
    }

    #[tokio::test]
    async fn command_approval_roundtrip() {
        let lf = lock_file();
        assert!(!lf.is_command_approved("hash1").await);
        lf.record_command_approval("hash1").await.unwrap();
        assert!(lf.is_command_approved("hash1").await);
    }

    #[tokio::test]
    async fn persisted_lock_file_reloads() {
        let fs: Arc<dyn FileSystem> = Arc::new(InMemoryFs::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let lf = YamlLockFile::load(Arc::clone(&fs), Arc::clone(&clock), "/proj/mlc.lock.yaml").await;
        lf.record_import("a", "a", "sha256:x", "u", "always", None).await.unwrap();

        let reloaded = YamlLockFile::load(fs, clock, "/proj/mlc.lock.yaml").await;
        assert!(reloaded.lookup_import("a").await.is_some());
    }
}
