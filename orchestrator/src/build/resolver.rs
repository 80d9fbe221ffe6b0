//! Image tag resolution for pre-built images

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::debug;

use crate::errors::OrchestratorError;

/// `resolve(repository, architecture) -> tag`
#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve(&self, repository: &str, arch: &str) -> Result<String, OrchestratorError>;
}

/// Resolves from configured pins, falling back to a default tag
#[derive(Debug, Clone)]
pub struct StaticResolver {
    pins: BTreeMap<String, String>,
    default_tag: String,
}

impl StaticResolver {
    pub fn new(pins: BTreeMap<String, String>) -> Self {
        Self {
            pins,
            default_tag: "latest".to_string(),
        }
    }
}

#[async_trait]
impl ImageResolver for StaticResolver {
    async fn resolve(&self, repository: &str, _arch: &str) -> Result<String, OrchestratorError> {
        Ok(self
            .pins
            .get(repository)
            .cloned()
            .unwrap_or_else(|| self.default_tag.clone()))
    }
}

/// TTL cache in front of another resolver.
///
/// Keys are `repository@arch`; concurrent lookups of distinct keys never
/// contend on a write.
pub struct CachedResolver<R> {
    inner: R,
    ttl: Duration,
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl<R: ImageResolver> CachedResolver<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn cached(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(tag, _)| tag.clone())
    }
}

#[async_trait]
impl<R: ImageResolver> ImageResolver for CachedResolver<R> {
    async fn resolve(&self, repository: &str, arch: &str) -> Result<String, OrchestratorError> {
        let key = format!("{}@{}", repository, arch);
        if let Some(tag) = self.cached(&key) {
            debug!(repository, arch, tag = %tag, "resolver cache hit");
            return Ok(tag);
        }

        let tag = self.inner.resolve(repository, arch).await?;
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(key, (tag.clone(), Instant::now()));
        Ok(tag)
    }
}

/// Full image reference from a repository and a resolved tag.
///
/// A repository that already names a tag or digest is returned unchanged.
pub fn image_reference(repository: &str, tag: &str) -> String {
    let last_segment = repository.rsplit('/').next().unwrap_or(repository);
    if last_segment.contains(':') || repository.contains('@') {
        repository.to_string()
    } else {
        format!("{}:{}", repository, tag)
    }
}
