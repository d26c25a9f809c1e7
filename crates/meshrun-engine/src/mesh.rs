use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Resolves an opaque mesh-object reference to a generated file on
/// disk. Only consulted when a stage input carries a reference
/// instead of a plain path.
pub trait MeshResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Option<PathBuf>;
}

/// Resolver that knows nothing; every lookup fails open.
#[derive(Default)]
pub struct NoMeshes;

impl MeshResolver for NoMeshes {
    fn resolve(&self, _reference: &str) -> Option<PathBuf> {
        None
    }
}

/// Once-per-session cache in front of a resolver. Lookups fail open:
/// a missing mesh never aborts a run, it is logged at debug level and
/// the file is skipped.
pub struct MeshCache {
    resolver: Box<dyn MeshResolver>,
    cache: Mutex<HashMap<String, Option<PathBuf>>>,
}

impl MeshCache {
    pub fn new(resolver: Box<dyn MeshResolver>) -> Self {
        Self {
            resolver,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn shared(resolver: Box<dyn MeshResolver>) -> Arc<Self> {
        Arc::new(Self::new(resolver))
    }

    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cached) = cache.get(reference) {
            return cached.clone();
        }
        let resolved = self.resolver.resolve(reference);
        if resolved.is_none() {
            tracing::debug!(reference, "mesh reference did not resolve; skipping");
        }
        cache.insert(reference.to_string(), resolved.clone());
        resolved
    }

    pub fn clear(&self) {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}
