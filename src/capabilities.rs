//! Capability traits (§6.1): everything the interpreter needs from the
//! outside world — filesystem, network, human approval, caching, time,
//! and id generation — arrives as an injected trait object, the same way
//! the teacher's `Bash` takes `Arc<dyn FileSystem>` rather than touching
//! `std::fs` directly. This keeps the interpreter itself deterministic
//! and host-agnostic: a test can swap in an in-memory filesystem and a
//! fixed clock without the interpreter knowing the difference.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::errors::InterpreterError;

pub use crate::fs::FileSystem;

/// The result of fetching a URL (§4.6/§6.1). Grounded on the teacher's
/// `network::types::FetchResult`.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// The URL actually served, after following redirects.
    pub final_url: String,
}

/// Fetches URL content subject to protocol/domain allow- and block-lists
/// and a byte/time budget. A concrete implementation lives in
/// [`crate::fetcher`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, InterpreterError>;
}

/// Prompts a human (or a policy engine standing in for one) to approve an
/// import or a shell command before it runs (§4.6, §4.9).
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve_import(&self, url: &str, content_hash: &str) -> Result<bool, InterpreterError>;
    async fn approve_command(&self, command: &str) -> Result<bool, InterpreterError>;
}

/// Content-addressable storage for fetched import bodies, keyed by a
/// sha256 hex digest of the content (§4.6 integrity pinning). Entries
/// never expire: identical content hashes to the same key forever.
#[async_trait]
pub trait ImmutableCache: Send + Sync {
    async fn get(&self, content_hash: &str) -> Option<Vec<u8>>;
    async fn put(&self, content_hash: &str, data: &[u8]);
}

/// Short-lived cache for resolver results that are allowed to go stale
/// (e.g. a registry index), keyed by an opaque string with a TTL.
#[async_trait]
pub trait RuntimeCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn put(&self, key: &str, data: &[u8], ttl_secs: u64);
}

/// Persists import/command approvals and pinned integrity hashes across
/// runs (§6.3). A concrete YAML-backed implementation lives in
/// [`crate::lock_file`].
#[async_trait]
pub trait LockFile: Send + Sync {
    async fn record_import(
        &self,
        source: &str,
        resolved: &str,
        integrity: &str,
        approved_by: &str,
        trust: &str,
        ttl_secs: Option<u64>,
    ) -> Result<(), InterpreterError>;

    async fn lookup_import(&self, source: &str) -> Option<crate::lock_file::ImportLockEntry>;

    async fn record_command_approval(&self, command_hash: &str) -> Result<(), InterpreterError>;

    async fn is_command_approved(&self, command_hash: &str) -> bool;

    async fn trusted_domains(&self) -> Vec<String>;
}

/// Wall-clock time, injected so `@now` and expiry checks are testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

/// Generates the opaque ids stamped onto directive nodes and transform
/// stream entries when the parser didn't already assign one.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn next_id(&self) -> String {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let bytes: [u8; 8] = rng.gen();
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }
}
