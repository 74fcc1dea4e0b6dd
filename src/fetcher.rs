//! Fetcher (C4): URL reads for `import`/`path`/`file-content` directives,
//! content-addressed and approval-gated.
//!
//! The allow/block-list and redirect-following logic is ported from the
//! teacher's `network::allow_list`/`network::fetch` (origin-exact, path-
//! prefix matching; redirect targets re-checked against the same list;
//! a capped redirect count) rather than rewritten from scratch. The
//! teacher wraps a raw, closure-injected transport (`FetchFn`) with this
//! policy layer instead of calling an HTTP client directly — this crate
//! keeps that shape as the [`RawTransport`] trait, so tests can supply a
//! canned transport with no real network access.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::capabilities::{Approver, FetchResponse, Fetcher, ImmutableCache};
use crate::errors::InterpreterError;
use crate::fs::FileSystem;

const DEFAULT_MAX_REDIRECTS: usize = 20;
const DEFAULT_MAX_RESPONSE_BYTES: u64 = 10 * 1024 * 1024;
const REDIRECT_CODES: &[u16] = &[301, 302, 303, 307, 308];

/// The wire-level transport a host plugs in (a real HTTP client in
/// production, a canned responder in tests). Mirrors the teacher's
/// `FetchFn` closure but as a trait object so it composes with the rest
/// of this crate's capability traits.
#[async_trait]
pub trait RawTransport: Send + Sync {
    async fn get(&self, url: &str) -> Result<RawResponse, String>;
}

pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

struct ParsedUrl {
    origin: String,
    pathname: String,
}

fn parse_url(url: &str) -> Option<ParsedUrl> {
    let scheme_end = url.find("://")?;
    let after_scheme = &url[scheme_end + 3..];
    let (authority, pathname) = match after_scheme.find('/') {
        Some(pos) => (&after_scheme[..pos], &after_scheme[pos..]),
        None => (after_scheme, "/"),
    };
    if authority.is_empty() {
        return None;
    }
    let pathname = pathname.split('?').next().unwrap_or("/");
    let pathname = pathname.split('#').next().unwrap_or("/");
    let scheme = &url[..scheme_end];
    Some(ParsedUrl { origin: format!("{scheme}://{authority}"), pathname: pathname.to_string() })
}

fn matches_allow_entry(url: &str, entry: &str) -> bool {
    let (Some(parsed), Some(parsed_entry)) = (parse_url(url), parse_url(entry)) else { return false };
    if parsed.origin != parsed_entry.origin {
        return false;
    }
    if parsed_entry.pathname == "/" || parsed_entry.pathname.is_empty() {
        return true;
    }
    parsed.pathname.starts_with(&parsed_entry.pathname)
}

fn is_allowed(url: &str, allow_prefixes: &[String]) -> bool {
    !allow_prefixes.is_empty() && allow_prefixes.iter().any(|p| matches_allow_entry(url, p))
}

fn is_blocked(url: &str, block_prefixes: &[String]) -> bool {
    block_prefixes.iter().any(|p| matches_allow_entry(url, p))
}

fn resolve_redirect(base: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    let Some(scheme_end) = base.find("://") else { return location.to_string() };
    let after_scheme = &base[scheme_end + 3..];
    match after_scheme.find('/') {
        Some(first_slash) => {
            let origin = &base[..scheme_end + 3 + first_slash];
            if location.starts_with('/') {
                format!("{origin}{location}")
            } else {
                let base_path = &base[..base.rfind('/').unwrap_or(base.len())];
                format!("{base_path}/{location}")
            }
        }
        None => {
            if location.starts_with('/') {
                format!("{base}{location}")
            } else {
                format!("{base}/{location}")
            }
        }
    }
}

/// Static allow/block configuration for outbound fetches (§4.6). An empty
/// allow-list denies everything unless `dangerously_allow_all` is set,
/// matching the teacher's fail-closed default.
#[derive(Debug, Clone, Default)]
pub struct NetworkPolicy {
    pub allowed_prefixes: Vec<String>,
    pub blocked_prefixes: Vec<String>,
    pub dangerously_allow_all: bool,
    pub max_redirects: Option<usize>,
    pub max_response_bytes: Option<u64>,
}

impl NetworkPolicy {
    fn check(&self, url: &str) -> Result<(), InterpreterError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(InterpreterError::UrlValidation { url: url.to_string(), message: "unsupported scheme".into() });
        }
        if is_blocked(url, &self.blocked_prefixes) {
            return Err(InterpreterError::UrlValidation { url: url.to_string(), message: "URL is explicitly blocked".into() });
        }
        if self.dangerously_allow_all {
            return Ok(());
        }
        if !is_allowed(url, &self.allowed_prefixes) {
            return Err(InterpreterError::UrlValidation { url: url.to_string(), message: "URL not in allow-list".into() });
        }
        Ok(())
    }
}

/// Sha256 hex digest, `sha256:`-prefixed, used as the immutable cache key
/// and the lock file's integrity field (§4.6).
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{:x}", hasher.finalize())
}

/// Policy-enforcing, cache-backed [`Fetcher`] implementation.
pub struct PolicyFetcher {
    transport: Arc<dyn RawTransport>,
    cache: Arc<dyn ImmutableCache>,
    policy: NetworkPolicy,
}

impl PolicyFetcher {
    pub fn new(transport: Arc<dyn RawTransport>, cache: Arc<dyn ImmutableCache>, policy: NetworkPolicy) -> Self {
        Self { transport, cache, policy }
    }

    async fn fetch_following_redirects(&self, url: &str) -> Result<(String, RawResponse), InterpreterError> {
        let max_redirects = self.policy.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS);
        let max_bytes = self.policy.max_response_bytes.unwrap_or(DEFAULT_MAX_RESPONSE_BYTES);
        self.policy.check(url)?;

        let mut current = url.to_string();
        let mut redirects = 0;
        loop {
            let response = self
                .transport
                .get(&current)
                .await
                .map_err(|message| InterpreterError::FetchHttp { url: current.clone(), status: 0, message })?;

            if response.body.len() as u64 > max_bytes {
                return Err(InterpreterError::ResponseTooLarge { url: current, limit: max_bytes });
            }

            if REDIRECT_CODES.contains(&response.status) {
                if let Some(location) = response.headers.get("location") {
                    let next = resolve_redirect(&current, location);
                    self.policy.check(&next)?;
                    redirects += 1;
                    if redirects > max_redirects {
                        return Err(InterpreterError::FetchHttp {
                            url: next,
                            status: response.status,
                            message: "too many redirects".into(),
                        });
                    }
                    current = next;
                    continue;
                }
            }

            return Ok((current, response));
        }
    }
}

#[async_trait]
impl Fetcher for PolicyFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, InterpreterError> {
        let (final_url, response) = self.fetch_following_redirects(url).await?;
        if !(200..300).contains(&response.status) {
            return Err(InterpreterError::FetchHttp {
                url: final_url,
                status: response.status,
                message: "non-2xx response".into(),
            });
        }
        let hash = content_hash(&response.body);
        self.cache.put(&hash, &response.body).await;
        Ok(FetchResponse { status: response.status, headers: response.headers, body: response.body, final_url })
    }
}

/// Approval gate around a [`Fetcher`], keeping import approval policy
/// (always-allow vs ask-every-time vs pinned-by-hash) out of the
/// transport layer (§4.6).
pub struct ApprovalGatedFetcher<F: Fetcher> {
    pub inner: F,
    pub approver: Arc<dyn Approver>,
}

impl<F: Fetcher> ApprovalGatedFetcher<F> {
    pub async fn fetch_with_approval(&self, url: &str) -> Result<FetchResponse, InterpreterError> {
        let response = self.inner.fetch(url).await?;
        let hash = content_hash(&response.body);
        if !self.approver.approve_import(url, &hash).await? {
            return Err(InterpreterError::ApprovalDenied { url: url.to_string() });
        }
        Ok(response)
    }
}

/// Disk-backed [`ImmutableCache`], storing fetched bytes under
/// `<root>/<hash>` through the same [`FileSystem`] capability as
/// everything else. Content-addressed storage never needs invalidation —
/// the same key always names the same bytes — so a plain file per hash
/// is enough, no expiry bookkeeping required.
pub struct FsImmutableCache {
    fs: Arc<dyn FileSystem>,
    root: String,
}

impl FsImmutableCache {
    pub fn new(fs: Arc<dyn FileSystem>, root: impl Into<String>) -> Self {
        Self { fs, root: root.into() }
    }

    fn path_for(&self, content_hash: &str) -> String {
        format!("{}/{}", self.root, content_hash.replace(':', "_"))
    }
}

#[async_trait]
impl ImmutableCache for FsImmutableCache {
    async fn get(&self, content_hash: &str) -> Option<Vec<u8>> {
        self.fs.read_file_buffer(&self.path_for(content_hash)).await.ok()
    }

    async fn put(&self, content_hash: &str, data: &[u8]) {
        let _ = self.fs.write_file(&self.path_for(content_hash), data).await;
    }
}

pub fn is_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}
