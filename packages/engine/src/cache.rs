//! Content Cache
//!
//! Version-gated bundle cache. Every access reads the small remote version
//! entry first and downloads the full bundle only when the stamps differ.
//! Any network failure falls back to the local copy, even a stale one.

use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use zhangwo_algo::{Question, SubjectBundle};

use crate::remote::{BatchWrite, ContentVersionEntry, RemoteError, RemoteStore, WriteBatch};
use crate::storage::{Storage, StorageError, StoredBundle};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("bundle '{bundle_id}' is not cached locally and the remote store is unreachable")]
    Unavailable { bundle_id: String },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Where a returned bundle came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleSource {
    /// Local copy whose stamp matches the version index
    CacheHit,
    /// Freshly downloaded and fanned out into the question store
    Downloaded,
    /// Downloaded, content unchanged; only the stamp was refreshed
    Restamped,
    /// Local copy served because the remote could not be reached
    StaleFallback,
}

/// SHA-256 over the bundle content, ignoring version and timestamp
pub fn content_hash(bundle: &SubjectBundle) -> Result<String, serde_json::Error> {
    let content = serde_json::to_vec(&(
        &bundle.id,
        &bundle.title,
        &bundle.curriculum,
        &bundle.questions,
        bundle.is_dynamic,
    ))?;
    Ok(hex::encode(Sha256::digest(&content)))
}

pub struct ContentCache {
    storage: Storage,
    remote: Arc<dyn RemoteStore>,
}

impl ContentCache {
    pub fn new(storage: Storage, remote: Arc<dyn RemoteStore>) -> Self {
        Self { storage, remote }
    }

    /// Resolve a bundle, downloading it only when the version index moved
    pub async fn get_bundle(&self, bundle_id: &str) -> CacheResult<SubjectBundle> {
        self.get_bundle_with_source(bundle_id)
            .await
            .map(|(bundle, _)| bundle)
    }

    pub async fn get_bundle_with_source(&self, bundle_id: &str) -> CacheResult<(SubjectBundle, BundleSource)> {
        let local = self.storage.bundles().get(bundle_id)?;

        let entry = match self.remote.version_entry(bundle_id).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(bundle_id, error = %e, "version index unreachable, using local bundle");
                return self.fallback(bundle_id, local);
            }
        };

        if let (Some(stored), Some(entry)) = (&local, &entry) {
            if stored.index_stamp() == Some(entry.last_updated.as_str()) {
                tracing::debug!(bundle_id, version = %entry.version, "bundle cache hit");
                return Ok((stored.bundle.clone(), BundleSource::CacheHit));
            }
        }

        let fetched = match self.remote.fetch_bundle(bundle_id).await {
            Ok(Some(bundle)) => bundle,
            Ok(None) => {
                tracing::warn!(bundle_id, "bundle missing remotely, using local bundle");
                return self.fallback(bundle_id, local);
            }
            Err(e) => {
                tracing::warn!(bundle_id, error = %e, "bundle download failed, using local bundle");
                return self.fallback(bundle_id, local);
            }
        };

        // 记录版本索引的时间戳，它不一定与文档自带的相同
        let stamp = entry
            .as_ref()
            .map(|entry| entry.last_updated.clone())
            .unwrap_or_else(|| fetched.last_updated.clone());
        let hash = content_hash(&fetched).map_err(StorageError::from)?;
        let unchanged = local
            .as_ref()
            .map(|stored| stored.content_hash == hash)
            .unwrap_or(false);

        if unchanged {
            self.storage.bundles().refresh_stamp(&fetched, &hash, &stamp)?;
            tracing::info!(bundle_id, version = %fetched.version, "bundle content unchanged, stamp refreshed");
            Ok((fetched, BundleSource::Restamped))
        } else {
            self.storage.bundles().put(&fetched, &hash, &stamp)?;
            tracing::info!(
                bundle_id,
                version = %fetched.version,
                questions = fetched.questions.len(),
                "bundle downloaded"
            );
            Ok((fetched, BundleSource::Downloaded))
        }
    }

    fn fallback(
        &self,
        bundle_id: &str,
        local: Option<StoredBundle>,
    ) -> CacheResult<(SubjectBundle, BundleSource)> {
        match local {
            Some(stored) => Ok((stored.bundle, BundleSource::StaleFallback)),
            None => Err(CacheError::Unavailable {
                bundle_id: bundle_id.to_string(),
            }),
        }
    }

    /// Indexed lookup in the local question store
    pub fn questions_for_atom(&self, bundle_id: &str, atom_id: &str) -> CacheResult<Vec<Question>> {
        Ok(self.storage.bundles().questions_for_atom(bundle_id, atom_id)?)
    }

    /// Publish a bundle and its bumped version entry in one atomic batch
    ///
    /// The local cache is updated only after the remote commit succeeds.
    pub async fn publish_bundle(&self, bundle: &SubjectBundle) -> CacheResult<ContentVersionEntry> {
        let entry = ContentVersionEntry::for_bundle(bundle);

        let mut batch = WriteBatch::new();
        batch.push(BatchWrite::PutBundle {
            bundle: bundle.clone(),
        });
        batch.push(BatchWrite::PutVersion {
            entry: entry.clone(),
        });
        self.remote.commit(batch).await?;

        let hash = content_hash(bundle).map_err(StorageError::from)?;
        self.storage.bundles().put(bundle, &hash, &entry.last_updated)?;
        tracing::info!(bundle_id = %bundle.id, version = %bundle.version, "bundle published");

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use zhangwo_algo::{Atom, AtomStatus, Chapter, QuestionPayload};

    fn bundle(version: &str, stamp: &str) -> SubjectBundle {
        SubjectBundle {
            id: "fractions".to_string(),
            title: "Fractions".to_string(),
            curriculum: vec![Chapter {
                id: "c1".to_string(),
                title: "Basics".to_string(),
                atoms: vec![Atom {
                    id: "halves".to_string(),
                    title: "Halves".to_string(),
                    prerequisites: vec![],
                    status: AtomStatus::Live,
                    templates: vec![],
                    drill: None,
                }],
            }],
            questions: vec![Question {
                id: "q1".to_string(),
                atom_id: "halves".to_string(),
                version: version.to_string(),
                fact_id: None,
                payload: QuestionPayload::NumberLine {
                    prompt: "Place 1/2".to_string(),
                    min: 0.0,
                    max: 1.0,
                    target: 0.5,
                    tolerance: 0.05,
                },
            }],
            version: version.to_string(),
            last_updated: stamp.to_string(),
            is_dynamic: false,
        }
    }

    fn setup() -> (Arc<MemoryRemoteStore>, ContentCache, Storage) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let storage = Storage::in_memory().unwrap();
        let cache = ContentCache::new(storage.clone(), remote.clone());
        (remote, cache, storage)
    }

    #[test]
    fn test_content_hash_ignores_stamp() {
        let a = bundle("1.0.0", "2026-01-01T00:00:00Z");
        let mut b = a.clone();
        b.version = "1.0.1".to_string();
        b.last_updated = "2026-02-01T00:00:00Z".to_string();
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());

        b.title = "Fractions II".to_string();
        assert_ne!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
        assert_eq!(content_hash(&a).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_second_read_is_a_cache_hit() {
        let (remote, cache, _) = setup();
        remote.seed_bundle(bundle("1.0.0", "2026-01-01T00:00:00Z"));

        let (_, first) = cache.get_bundle_with_source("fractions").await.unwrap();
        let (_, second) = cache.get_bundle_with_source("fractions").await.unwrap();

        assert_eq!(first, BundleSource::Downloaded);
        assert_eq!(second, BundleSource::CacheHit);
        assert_eq!(remote.counts().bundle_fetches, 1);
        assert_eq!(remote.counts().version_reads, 2);
    }

    #[tokio::test]
    async fn test_version_bump_with_same_content_restamps() {
        let (remote, cache, storage) = setup();
        remote.seed_bundle(bundle("1.0.0", "2026-01-01T00:00:00Z"));
        cache.get_bundle("fractions").await.unwrap();

        remote.seed_bundle(bundle("1.0.0", "2026-03-01T00:00:00Z"));
        let (fetched, source) = cache.get_bundle_with_source("fractions").await.unwrap();

        assert_eq!(source, BundleSource::Restamped);
        assert_eq!(fetched.last_updated, "2026-03-01T00:00:00Z");
        let stored = storage.bundles().get("fractions").unwrap().unwrap();
        assert_eq!(stored.last_updated(), "2026-03-01T00:00:00Z");
        assert_eq!(stored.index_stamp(), Some("2026-03-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_index_stamp_differing_from_bundle_stamp_still_hits() {
        let (remote, cache, storage) = setup();
        remote.seed_bundle(bundle("1.0.0", "2026-01-01T00:00:00.000Z"));
        remote.set_version_entry(ContentVersionEntry {
            bundle_id: "fractions".to_string(),
            version: "1.0.0".to_string(),
            last_updated: "2026-02-01T00:00:00Z".to_string(),
        });

        let (_, first) = cache.get_bundle_with_source("fractions").await.unwrap();
        let (_, second) = cache.get_bundle_with_source("fractions").await.unwrap();
        let (_, third) = cache.get_bundle_with_source("fractions").await.unwrap();

        assert_eq!(first, BundleSource::Downloaded);
        assert_eq!(second, BundleSource::CacheHit);
        assert_eq!(third, BundleSource::CacheHit);
        assert_eq!(remote.counts().bundle_fetches, 1);

        let stored = storage.bundles().get("fractions").unwrap().unwrap();
        assert_eq!(stored.last_updated(), "2026-01-01T00:00:00.000Z");
        assert_eq!(stored.index_stamp(), Some("2026-02-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_offline_serves_stale_copy() {
        let (remote, cache, _) = setup();
        remote.seed_bundle(bundle("1.0.0", "2026-01-01T00:00:00Z"));
        cache.get_bundle("fractions").await.unwrap();

        remote.set_offline(true);
        let (bundle, source) = cache.get_bundle_with_source("fractions").await.unwrap();
        assert_eq!(source, BundleSource::StaleFallback);
        assert_eq!(bundle.version, "1.0.0");
    }

    #[tokio::test]
    async fn test_offline_without_copy_is_unavailable() {
        let (remote, cache, _) = setup();
        remote.set_offline(true);

        let err = cache.get_bundle("fractions").await.unwrap_err();
        assert!(matches!(err, CacheError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_questions_for_atom_after_download() {
        let (remote, cache, _) = setup();
        remote.seed_bundle(bundle("1.0.0", "2026-01-01T00:00:00Z"));
        cache.get_bundle("fractions").await.unwrap();

        let questions = cache.questions_for_atom("fractions", "halves").unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].id, "q1");
    }

    #[tokio::test]
    async fn test_publish_commits_bundle_and_version_together() {
        let (remote, cache, storage) = setup();

        let entry = cache
            .publish_bundle(&bundle("2.0.0", "2026-04-01T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(entry.version, "2.0.0");
        assert_eq!(remote.counts().commits, 1);
        assert_eq!(remote.bundle("fractions").unwrap().version, "2.0.0");
        assert!(storage.bundles().get("fractions").unwrap().is_some());

        // Published stamp matches: next read is a hit
        let (_, source) = cache.get_bundle_with_source("fractions").await.unwrap();
        assert_eq!(source, BundleSource::CacheHit);
    }

    #[tokio::test]
    async fn test_failed_publish_leaves_cache_untouched() {
        let (remote, cache, storage) = setup();
        remote.set_fail_commits(true);

        assert!(cache
            .publish_bundle(&bundle("2.0.0", "2026-04-01T00:00:00Z"))
            .await
            .is_err());
        assert!(storage.bundles().get("fractions").unwrap().is_none());
        assert!(remote.bundle("fractions").is_none());
    }
}
