//! Profile cache
//!
//! Durable DID → profile store backed by sled. A cached profile substitutes
//! for a remote fetch while it is fresh: `cached_at + cache_life` has not
//! passed, or freshness checking is disabled entirely.
//!
//! Two guards protect against a historical nil-write bug: a stored row whose
//! bytes are the literal JSON `null` reads back as absent, and writing a
//! value that serializes to `null` is a hard error.

use std::path::Path;

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};

use crate::types::{Did, Error, Profile, Result};

const NULL_LITERAL: &[u8] = b"null";

#[derive(Clone)]
pub struct ProfileCache {
    db: sled::Db,
    cache_life: Duration,
    expire: bool,
}

impl ProfileCache {
    /// Open or create the cache store.
    pub fn open(path: impl AsRef<Path>, cache_hours: i64, expire: bool) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        info!(
            path = %path.display(),
            rows = db.len(),
            cache_hours,
            expire,
            "opened profile cache"
        );
        Ok(Self {
            db,
            cache_life: Duration::hours(cache_hours),
            expire,
        })
    }

    /// Fetch the stored profile for a DID, if any.
    pub fn get(&self, did: &str) -> Result<Option<Profile>> {
        match self.db.get(did.as_bytes())? {
            Some(raw) if raw.as_ref() == NULL_LITERAL => {
                warn!(did, "cache row holds literal null, treating as absent");
                Ok(None)
            }
            Some(raw) => {
                let profile: Profile = serde_json::from_slice(&raw)?;
                Ok(Some(profile))
            }
            None => Ok(None),
        }
    }

    /// Upsert a profile. Rejects a value that serializes to `null`.
    pub fn put(&self, did: &str, profile: &Profile) -> Result<()> {
        let value = serde_json::to_vec(profile)?;
        if value == NULL_LITERAL {
            return Err(Error::DataIntegrity(format!(
                "refusing to write null profile for {}",
                did
            )));
        }
        self.db.insert(did.as_bytes(), value)?;
        Ok(())
    }

    /// Remove a DID's row.
    pub fn delete(&self, did: &str) -> Result<()> {
        self.db.remove(did.as_bytes())?;
        tracing::debug!(did, "deleted cached profile");
        Ok(())
    }

    /// Lazy scan of every cached DID. Finite and restartable; rows written
    /// during the scan may or may not be observed.
    pub fn scan(&self) -> impl Iterator<Item = Did> {
        self.db.iter().filter_map(|row| {
            let (key, _) = row.ok()?;
            String::from_utf8(key.to_vec()).ok()
        })
    }

    /// Freshness predicate: with expiry disabled every cached profile is
    /// fresh; otherwise the stamp's age must not exceed the cache life
    /// (`cached_at + cache_life >= now`). An unstamped profile is stale.
    pub fn is_fresh(&self, profile: &Profile) -> bool {
        if !self.expire {
            return true;
        }
        match profile.cached_at {
            Some(at) => Utc::now() - at <= self.cache_life,
            None => false,
        }
    }

    /// The scheduler's fast path: the cached profile iff present and fresh.
    /// A row that fails to parse is treated as absent so the DID gets
    /// re-resolved rather than wedging the pipeline.
    pub fn skip_fetch(&self, did: &str) -> Option<Profile> {
        match self.get(did) {
            Ok(Some(profile)) if self.is_fresh(&profile) => Some(profile),
            Ok(_) => None,
            Err(e) => {
                warn!(did, error = %e, "unreadable cache row, will re-resolve");
                None
            }
        }
    }

    /// One-shot import of a gzipped JSON bootstrap file: an object mapping
    /// DID → profile. Entries keep whatever `cachedAt` they carry; a `null`
    /// entry is skipped with a warning rather than written.
    pub fn import_gz(&self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let reader = flate2::read::GzDecoder::new(file);
        let entries: std::collections::HashMap<Did, Value> = serde_json::from_reader(reader)?;

        let mut imported = 0usize;
        for (did, value) in entries {
            if value.is_null() {
                warn!(did, "skipping null entry in bootstrap file");
                continue;
            }
            let profile: Profile = serde_json::from_value(value)?;
            self.put(&did, &profile)?;
            imported += 1;
        }
        info!(file = %path.display(), imported, "imported cache bootstrap");
        Ok(imported)
    }

    /// Number of cached rows.
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Flush outstanding writes to disk. Called on shutdown.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn open_temp(cache_hours: i64, expire: bool) -> (ProfileCache, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = ProfileCache::open(dir.path().join("cache.db"), cache_hours, expire).unwrap();
        (cache, dir)
    }

    fn profile(did: &str) -> Profile {
        Profile {
            did: did.into(),
            handle: Some("a.bsky.social".into()),
            display_name: Some("A".into()),
            description: Some("hello".into()),
            follows_count: 10,
            followers_count: 20,
            cached_at: None,
        }
    }

    #[test]
    fn round_trip_preserves_profile() {
        let (cache, _dir) = open_temp(1, true);
        let mut p = profile("did:plc:rt");
        p.stamp();
        cache.put("did:plc:rt", &p).unwrap();
        let got = cache.get("did:plc:rt").unwrap().unwrap();
        assert_eq!(got, p);
    }

    #[test]
    fn get_absent_is_none() {
        let (cache, _dir) = open_temp(1, true);
        assert!(cache.get("did:plc:missing").unwrap().is_none());
    }

    #[test]
    fn literal_null_row_reads_as_absent() {
        let (cache, _dir) = open_temp(1, true);
        cache.db.insert(b"did:plc:nil", b"null".to_vec()).unwrap();
        assert!(cache.get("did:plc:nil").unwrap().is_none());
        assert!(cache.skip_fetch("did:plc:nil").is_none());
    }

    #[test]
    fn delete_removes_row() {
        let (cache, _dir) = open_temp(1, true);
        let p = profile("did:plc:del");
        cache.put("did:plc:del", &p).unwrap();
        cache.delete("did:plc:del").unwrap();
        assert!(cache.get("did:plc:del").unwrap().is_none());
    }

    #[test]
    fn scan_yields_all_dids() {
        let (cache, _dir) = open_temp(1, true);
        for did in ["did:plc:a", "did:plc:b", "did:plc:c"] {
            cache.put(did, &profile(did)).unwrap();
        }
        let mut dids: Vec<Did> = cache.scan().collect();
        dids.sort();
        assert_eq!(dids, vec!["did:plc:a", "did:plc:b", "did:plc:c"]);
    }

    #[test]
    fn unstamped_profile_is_stale() {
        let (cache, _dir) = open_temp(1, true);
        let p = profile("did:plc:old");
        cache.put("did:plc:old", &p).unwrap();
        assert!(cache.skip_fetch("did:plc:old").is_none());
    }

    #[test]
    fn stamped_profile_is_fresh_within_cache_life() {
        let (cache, _dir) = open_temp(1, true);
        let mut p = profile("did:plc:fresh");
        p.stamp();
        cache.put("did:plc:fresh", &p).unwrap();
        assert!(cache.skip_fetch("did:plc:fresh").is_some());
    }

    #[test]
    fn expired_stamp_is_stale() {
        let (cache, _dir) = open_temp(1, true);
        let mut p = profile("did:plc:stale");
        p.cached_at = Some(Utc::now() - Duration::hours(2));
        cache.put("did:plc:stale", &p).unwrap();
        assert!(cache.skip_fetch("did:plc:stale").is_none());
    }

    #[test]
    fn expiry_disabled_makes_everything_fresh() {
        let (cache, _dir) = open_temp(1, false);
        let mut p = profile("did:plc:ancient");
        p.cached_at = Some(Utc::now() - Duration::days(365));
        cache.put("did:plc:ancient", &p).unwrap();
        assert!(cache.skip_fetch("did:plc:ancient").is_some());

        // Even an unstamped row counts as fresh with expiry off.
        let q = profile("did:plc:unstamped");
        cache.put("did:plc:unstamped", &q).unwrap();
        assert!(cache.skip_fetch("did:plc:unstamped").is_some());
    }

    #[test]
    fn corrupt_row_does_not_wedge_skip_fetch() {
        let (cache, _dir) = open_temp(1, true);
        cache.db.insert(b"did:plc:bad", b"{not json".to_vec()).unwrap();
        assert!(cache.skip_fetch("did:plc:bad").is_none());
    }

    #[test]
    fn import_gz_upserts_entries_and_skips_nulls() {
        let (cache, dir) = open_temp(1, true);
        let payload = serde_json::json!({
            "did:plc:one": {
                "did": "did:plc:one",
                "handle": "one.bsky.social",
                "followsCount": 5,
                "followersCount": 6,
                "cachedAt": "2024-01-01T00:00:00Z"
            },
            "did:plc:two": null
        });

        let gz_path = dir.path().join("cache.json.gz");
        let file = std::fs::File::create(&gz_path).unwrap();
        let mut enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        enc.write_all(payload.to_string().as_bytes()).unwrap();
        enc.finish().unwrap();

        let imported = cache.import_gz(&gz_path).unwrap();
        assert_eq!(imported, 1);
        let got = cache.get("did:plc:one").unwrap().unwrap();
        assert_eq!(got.handle.as_deref(), Some("one.bsky.social"));
        assert!(got.cached_at.is_some());
        assert!(cache.get("did:plc:two").unwrap().is_none());
    }
}
