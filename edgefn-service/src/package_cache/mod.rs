//! Package cache (spec §4.2): deduplicated, at-most-one-concurrent-fetch
//! cache mapping `(function_id, version)` to an extracted package on disk.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use moka::sync::Cache as TtlCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metadata_store::MetadataStore;
use crate::object_store::{hex_encode, ObjectStore};

pub type PackageKey = (Uuid, i32);

/// A resident, extracted package. `entry_module` is the `index` module path
/// the sandbox loader resolves `require("index")`/the bootstrap entry to.
pub struct CachedPackage {
    pub function_id: Uuid,
    pub version: i32,
    pub extracted_path: PathBuf,
    pub entry_module: PathBuf,
    pub content_hash: String,
    pub size_bytes: u64,
    refcount: Arc<AtomicUsize>,
    stale: Arc<AtomicBool>,
    last_used: Mutex<Instant>,
}

/// RAII reference: held for the lifetime of one invocation referencing this
/// package. Dropping it releases the refcount; if the entry was invalidated
/// while checked out, the on-disk copy is purged once the last handle drops.
pub struct PackageHandle {
    package: Arc<CachedPackage>,
    root: PathBuf,
}

impl std::ops::Deref for PackageHandle {
    type Target = CachedPackage;
    fn deref(&self) -> &CachedPackage {
        &self.package
    }
}

impl Clone for PackageHandle {
    fn clone(&self) -> Self {
        self.package.refcount.fetch_add(1, Ordering::AcqRel);
        Self { package: self.package.clone(), root: self.root.clone() }
    }
}

impl Drop for PackageHandle {
    fn drop(&mut self) {
        let prev = self.package.refcount.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 && self.package.stale.load(Ordering::Acquire) {
            let path = self.package.extracted_path.clone();
            tokio::spawn(async move {
                let _ = tokio::fs::remove_dir_all(&path).await;
            });
        }
    }
}

struct FetchGuard;

/// Fetch-once, extract-once, refcounted local package store.
pub struct PackageCache {
    root: PathBuf,
    capacity_bytes: u64,
    resident_bytes: AtomicU64,
    entries: DashMap<PackageKey, Arc<CachedPackage>>,
    in_flight: DashMap<PackageKey, Arc<AsyncMutex<()>>>,
    negative: TtlCache<PackageKey, ()>,
    object_store: Arc<dyn ObjectStore>,
    metadata_store: Arc<dyn MetadataStore>,
}

impl PackageCache {
    pub fn new(
        root: PathBuf,
        capacity_bytes: u64,
        negative_cache_ttl: Duration,
        object_store: Arc<dyn ObjectStore>,
        metadata_store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            root,
            capacity_bytes,
            resident_bytes: AtomicU64::new(0),
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            negative: TtlCache::builder().time_to_live(negative_cache_ttl).build(),
            object_store,
            metadata_store,
        }
    }

    /// Fetch the active version of `function_id`, or a pinned `version` if
    /// given. At most one concurrent caller performs the object-store fetch
    /// + extraction for a given key; the rest observe its result.
    pub async fn get(&self, function_id: Uuid, version: i32) -> Result<PackageHandle> {
        let key = (function_id, version);

        if let Some(handle) = self.checkout_resident(key) {
            return Ok(handle);
        }
        if self.negative.contains_key(&key) {
            return Err(Error::NotFound(format!(
                "function {function_id} version {version} not found"
            )));
        }

        let lock = self
            .in_flight
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        let _guard: tokio::sync::MutexGuard<'_, ()> = lock.lock().await;
        let _flight = FetchGuard;

        // Re-check: another caller may have completed the fetch while we
        // waited for the lock (the single-flight invariant, spec §4.2/§8-4).
        if let Some(handle) = self.checkout_resident(key) {
            self.in_flight.remove(&key);
            return Ok(handle);
        }
        if self.negative.contains_key(&key) {
            self.in_flight.remove(&key);
            return Err(Error::NotFound(format!(
                "function {function_id} version {version} not found"
            )));
        }

        let result = self.fetch_and_extract(function_id, version).await;
        self.in_flight.remove(&key);

        match result {
            Ok(package) => {
                self.admit(key, package.clone())?;
                Ok(PackageHandle { package, root: self.root.clone() })
            }
            Err(Error::NotFound(msg)) => {
                self.negative.insert(key, ());
                Err(Error::NotFound(msg))
            }
            Err(e) => Err(e),
        }
    }

    fn checkout_resident(&self, key: PackageKey) -> Option<PackageHandle> {
        let entry = self.entries.get(&key)?;
        let package = entry.value().clone();
        package.refcount.fetch_add(1, Ordering::AcqRel);
        *package.last_used.lock() = Instant::now();
        Some(PackageHandle { package, root: self.root.clone() })
    }

    async fn fetch_and_extract(&self, function_id: Uuid, version: i32) -> Result<Arc<CachedPackage>> {
        let package_row = self
            .metadata_store
            .get_function_version(function_id, version)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("function {function_id} version {version} not found"))
            })?;

        let bytes = self.object_store.get(&package_row.object_store_path).await?;

        // SHA-256 per spec.md §3 (Package) / §8 invariant 3.
        let computed_hash = hex_encode(Sha256::digest(&bytes));
        if computed_hash != package_row.content_hash {
            return Err(Error::Integrity(format!(
                "package hash mismatch for function {function_id} version {version}: \
                 expected {}, got {computed_hash}",
                package_row.content_hash
            )));
        }

        let extracted_path = self.root.join(function_id.to_string()).join(version.to_string());
        Self::extract_archive(&bytes, &extracted_path).await?;

        let entry_module = Self::locate_entry_module(&extracted_path).await?;

        Ok(Arc::new(CachedPackage {
            function_id,
            version,
            extracted_path,
            entry_module,
            content_hash: computed_hash,
            size_bytes: bytes.len() as u64,
            refcount: Arc::new(AtomicUsize::new(0)),
            stale: Arc::new(AtomicBool::new(false)),
            last_used: Mutex::new(Instant::now()),
        }))
    }

    async fn extract_archive(bytes: &[u8], dest: &Path) -> Result<()> {
        let bytes = bytes.to_vec();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<()> {
            if dest.exists() {
                std::fs::remove_dir_all(&dest)?;
            }
            std::fs::create_dir_all(&dest)?;
            let decoder = flate2::read::GzDecoder::new(bytes.as_slice());
            let mut archive = tar::Archive::new(decoder);
            archive.unpack(&dest)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Infrastructure(format!("extraction task panicked: {e}")))??;
        Ok(())
    }

    async fn locate_entry_module(extracted_path: &Path) -> Result<PathBuf> {
        for candidate in ["index.js", "index.ts", "index.mjs"] {
            let path = extracted_path.join(candidate);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(path);
            }
        }
        Err(Error::Infrastructure(format!(
            "no entry module named `index` found under {}",
            extracted_path.display()
        )))
    }

    /// Insert a freshly-extracted package, evicting zero-refcount entries by
    /// LRU until there is room. Errors with `cache_full` if capacity is
    /// exhausted and every resident entry is pinned (spec §5 back-pressure).
    fn admit(&self, key: PackageKey, package: Arc<CachedPackage>) -> Result<()> {
        let needed = package.size_bytes;

        if needed <= self.capacity_bytes {
            while self.resident_bytes.load(Ordering::Acquire) + needed > self.capacity_bytes {
                if !self.evict_one_lru() {
                    return Err(Error::QuotaExceeded(
                        "package cache is full and all resident entries are pinned".to_string(),
                    ));
                }
            }
        }

        self.resident_bytes.fetch_add(needed, Ordering::AcqRel);
        self.entries.insert(key, package);
        Ok(())
    }

    fn evict_one_lru(&self) -> bool {
        let mut candidates: VecDeque<(PackageKey, Instant, u64)> = self
            .entries
            .iter()
            .filter(|e| e.value().refcount.load(Ordering::Acquire) == 0)
            .map(|e| (*e.key(), *e.value().last_used.lock(), e.value().size_bytes))
            .collect();

        candidates.make_contiguous().sort_by_key(|(_, last_used, _)| *last_used);

        let Some((key, _, size)) = candidates.pop_front() else {
            return false;
        };

        if let Some((_, package)) = self.entries.remove(&key) {
            self.resident_bytes.fetch_sub(size, Ordering::AcqRel);
            let path = package.extracted_path.clone();
            tokio::spawn(async move {
                let _ = tokio::fs::remove_dir_all(&path).await;
            });
        }
        true
    }

    /// Invalidate a specific `(function_id, version)` on a function-version
    /// change event. Active references remain valid (no mid-invocation
    /// rug-pull); the directory is purged once the last handle is dropped.
    pub fn invalidate(&self, function_id: Uuid, version: i32) {
        let key = (function_id, version);
        if let Some((_, package)) = self.entries.remove(&key) {
            self.resident_bytes.fetch_sub(package.size_bytes, Ordering::AcqRel);
            if package.refcount.load(Ordering::Acquire) == 0 {
                let path = package.extracted_path.clone();
                tokio::spawn(async move {
                    let _ = tokio::fs::remove_dir_all(&path).await;
                });
            } else {
                package.stale.store(true, Ordering::Release);
            }
        }
        self.negative.invalidate(&key);
    }

    /// Invalidate every version of a function (the function itself was
    /// deleted).
    pub fn invalidate_function(&self, function_id: Uuid) {
        let keys: Vec<PackageKey> = self
            .entries
            .iter()
            .map(|e| *e.key())
            .filter(|(fid, _)| *fid == function_id)
            .collect();
        for key in keys {
            self.invalidate(function_id, key.1);
        }
    }

    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_key_identity() {
        let fid = Uuid::new_v4();
        let key: PackageKey = (fid, 3);
        assert_eq!(key.0, fid);
        assert_eq!(key.1, 3);
    }
}
