//! In-memory fingerprint index.
//!
//! [`InMemoryFingerprintIndex`] keeps fingerprints in a `HashMap` keyed by
//! image id plus a secondary `ExactHash -> {ImageId}` bucket map, both behind
//! one `RwLock` so a replacement is observed atomically. Exact lookups are
//! O(1) per image; similarity search is a linear scan, which gives
//! exhaustive threshold coverage.

use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use gallery_types::{ExactHash, ImageId, PerceptualHash};

use crate::error::{FingerprintError, FingerprintResult};
use crate::fingerprint::{check_threshold, DuplicateGroup, ImageFingerprint, SimilarMatch};
use crate::traits::FingerprintIndex;

/// An in-memory implementation of [`FingerprintIndex`].
#[derive(Debug, Default)]
pub struct InMemoryFingerprintIndex {
    inner: RwLock<IndexState>,
}

#[derive(Debug, Default)]
struct IndexState {
    by_image: HashMap<ImageId, ImageFingerprint>,
    by_exact: HashMap<ExactHash, BTreeSet<ImageId>>,
}

impl IndexState {
    fn insert(&mut self, fingerprint: ImageFingerprint) -> Option<ImageFingerprint> {
        let previous = self.detach(&fingerprint.image_id);
        self.by_exact
            .entry(fingerprint.exact_hash)
            .or_default()
            .insert(fingerprint.image_id);
        self.by_image.insert(fingerprint.image_id, fingerprint);
        previous
    }

    fn detach(&mut self, image_id: &ImageId) -> Option<ImageFingerprint> {
        let previous = self.by_image.remove(image_id)?;
        if let Some(bucket) = self.by_exact.get_mut(&previous.exact_hash) {
            bucket.remove(image_id);
            if bucket.is_empty() {
                self.by_exact.remove(&previous.exact_hash);
            }
        }
        Some(previous)
    }
}

impl InMemoryFingerprintIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from previously exported fingerprints.
    ///
    /// Later entries for the same image replace earlier ones.
    pub fn from_fingerprints(
        fingerprints: impl IntoIterator<Item = ImageFingerprint>,
    ) -> FingerprintResult<Self> {
        let mut state = IndexState::default();
        for fp in fingerprints {
            let fp = ImageFingerprint::new(
                fp.image_id,
                fp.exact_hash,
                fp.perceptual_hash,
                fp.width,
                fp.height,
            )?;
            state.insert(fp);
        }
        Ok(Self {
            inner: RwLock::new(state),
        })
    }

    /// All fingerprints, ascending by image id.
    pub fn export(&self) -> FingerprintResult<Vec<ImageFingerprint>> {
        let state = self.read()?;
        let mut all: Vec<ImageFingerprint> = state.by_image.values().cloned().collect();
        all.sort_by(|a, b| a.image_id.cmp(&b.image_id));
        Ok(all)
    }

    fn read(&self) -> FingerprintResult<RwLockReadGuard<'_, IndexState>> {
        self.inner.read().map_err(|_| FingerprintError::LockPoisoned)
    }

    fn write(&self) -> FingerprintResult<RwLockWriteGuard<'_, IndexState>> {
        self.inner.write().map_err(|_| FingerprintError::LockPoisoned)
    }
}

impl FingerprintIndex for InMemoryFingerprintIndex {
    fn register(
        &self,
        image_id: ImageId,
        exact_hash: ExactHash,
        perceptual_hash: PerceptualHash,
        width: u32,
        height: u32,
    ) -> FingerprintResult<()> {
        let fingerprint = ImageFingerprint::new(image_id, exact_hash, perceptual_hash, width, height)?;
        let mut state = self.write()?;
        let replaced = state.insert(fingerprint).is_some();
        debug!(image = %image_id, exact = %exact_hash.short_hex(), phash = %perceptual_hash, replaced, "registered fingerprint");
        Ok(())
    }

    fn register_unless_duplicate(
        &self,
        image_id: ImageId,
        exact_hash: ExactHash,
        perceptual_hash: PerceptualHash,
        width: u32,
        height: u32,
    ) -> FingerprintResult<Option<ImageId>> {
        let fingerprint = ImageFingerprint::new(image_id, exact_hash, perceptual_hash, width, height)?;
        let mut state = self.write()?;
        let existing = state
            .by_exact
            .get(&exact_hash)
            .and_then(|bucket| bucket.iter().find(|id| **id != image_id).copied());
        if let Some(existing) = existing {
            debug!(image = %image_id, existing = %existing, exact = %exact_hash.short_hex(), "duplicate refused");
            return Ok(Some(existing));
        }
        state.insert(fingerprint);
        debug!(image = %image_id, exact = %exact_hash.short_hex(), phash = %perceptual_hash, "registered unique fingerprint");
        Ok(None)
    }

    fn get(&self, image_id: &ImageId) -> FingerprintResult<Option<ImageFingerprint>> {
        Ok(self.read()?.by_image.get(image_id).cloned())
    }

    fn remove(&self, image_id: &ImageId) -> FingerprintResult<bool> {
        let removed = self.write()?.detach(image_id).is_some();
        if removed {
            debug!(image = %image_id, "removed fingerprint");
        }
        Ok(removed)
    }

    fn len(&self) -> FingerprintResult<usize> {
        Ok(self.read()?.by_image.len())
    }

    fn find_by_exact_hash(&self, exact_hash: &ExactHash) -> FingerprintResult<Vec<ImageId>> {
        let state = self.read()?;
        Ok(state
            .by_exact
            .get(exact_hash)
            .map(|bucket| bucket.iter().copied().collect())
            .unwrap_or_default())
    }

    fn find_exact_duplicates(
        &self,
        exclude: Option<&ImageId>,
    ) -> FingerprintResult<Vec<DuplicateGroup>> {
        let state = self.read()?;
        let mut groups: Vec<DuplicateGroup> = state
            .by_exact
            .values()
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|id| Some(*id) != exclude)
                    .copied()
                    .collect::<DuplicateGroup>()
            })
            .filter(|group| group.len() >= 2)
            .collect();
        groups.sort();
        Ok(groups)
    }

    fn find_similar_to_hash(
        &self,
        perceptual_hash: &PerceptualHash,
        threshold: u32,
        exclude: Option<&ImageId>,
    ) -> FingerprintResult<Vec<SimilarMatch>> {
        check_threshold(threshold)?;
        let state = self.read()?;
        let mut matches: Vec<SimilarMatch> = state
            .by_image
            .values()
            .filter(|fp| Some(&fp.image_id) != exclude)
            .filter_map(|fp| {
                let distance = perceptual_hash.distance(&fp.perceptual_hash);
                (distance <= threshold).then_some(SimilarMatch {
                    image_id: fp.image_id,
                    distance,
                })
            })
            .collect();
        matches.sort();
        Ok(matches)
    }

    fn find_similar_groups(&self, threshold: u32) -> FingerprintResult<Vec<DuplicateGroup>> {
        check_threshold(threshold)?;
        let state = self.read()?;
        let mut fingerprints: Vec<&ImageFingerprint> = state.by_image.values().collect();
        fingerprints.sort_by(|a, b| a.image_id.cmp(&b.image_id));

        let mut components = DisjointSet::new(fingerprints.len());
        for (i, left) in fingerprints.iter().enumerate() {
            for (j, right) in fingerprints.iter().enumerate().skip(i + 1) {
                if left.distance_to(right) <= threshold {
                    components.union(i, j);
                }
            }
        }

        let mut by_root: HashMap<usize, DuplicateGroup> = HashMap::new();
        for (i, fp) in fingerprints.iter().enumerate() {
            by_root
                .entry(components.find(i))
                .or_default()
                .insert(fp.image_id);
        }
        let mut groups: Vec<DuplicateGroup> = by_root
            .into_values()
            .filter(|group| group.len() >= 2)
            .collect();
        groups.sort();
        Ok(groups)
    }
}

/// Union-find over fingerprint positions, with path halving.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Smaller index wins so roots stay stable across runs.
            let (keep, merge) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[merge] = keep;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn image(n: u128) -> ImageId {
        ImageId::from_uuid(uuid::Uuid::from_u128(n))
    }

    fn exact(byte: u8) -> ExactHash {
        ExactHash::from_digest([byte; 32])
    }

    fn phash(bits: u64) -> PerceptualHash {
        PerceptualHash::from_bits(bits)
    }

    fn register(index: &InMemoryFingerprintIndex, n: u128, hash: u8, bits: u64) {
        index.register(image(n), exact(hash), phash(bits), 640, 480).unwrap();
    }

    #[test]
    fn register_and_get() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0xff);

        let fp = index.get(&image(1)).unwrap().unwrap();
        assert_eq!(fp.exact_hash, exact(1));
        assert_eq!(fp.perceptual_hash, phash(0xff));
        assert_eq!((fp.width, fp.height), (640, 480));
        assert!(index.get(&image(2)).unwrap().is_none());
    }

    #[test]
    fn register_rejects_zero_dimensions() {
        let index = InMemoryFingerprintIndex::new();
        let err = index.register(image(1), exact(1), phash(0), 0, 0).unwrap_err();
        assert!(matches!(err, FingerprintError::DimensionMismatch { .. }));
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn register_is_idempotent() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0);
        register(&index, 1, 1, 0);
        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(index.find_by_exact_hash(&exact(1)).unwrap(), vec![image(1)]);
    }

    #[test]
    fn reregister_moves_exact_bucket() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0);
        register(&index, 2, 1, 0);
        assert_eq!(index.find_exact_duplicates(None).unwrap().len(), 1);

        // Image 2 is reprocessed and now has different bytes.
        register(&index, 2, 2, 0);
        assert!(index.find_exact_duplicates(None).unwrap().is_empty());
        assert_eq!(index.find_by_exact_hash(&exact(1)).unwrap(), vec![image(1)]);
        assert_eq!(index.find_by_exact_hash(&exact(2)).unwrap(), vec![image(2)]);
    }

    #[test]
    fn register_unless_duplicate_refuses_shared_bytes() {
        let index = InMemoryFingerprintIndex::new();
        assert_eq!(
            index.register_unless_duplicate(image(1), exact(1), phash(0), 640, 480),
            Ok(None)
        );
        assert_eq!(
            index.register_unless_duplicate(image(2), exact(1), phash(0), 640, 480),
            Ok(Some(image(1)))
        );
        assert!(index.get(&image(2)).unwrap().is_none());
        assert_eq!(index.find_by_exact_hash(&exact(1)).unwrap(), vec![image(1)]);

        // Re-registering the holder itself is not a conflict.
        assert_eq!(
            index.register_unless_duplicate(image(1), exact(1), phash(7), 640, 480),
            Ok(None)
        );
        assert_eq!(index.get(&image(1)).unwrap().unwrap().perceptual_hash, phash(7));
    }

    #[test]
    fn register_unless_duplicate_admits_one_concurrent_caller() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        const THREADS: usize = 8;
        for round in 0..20u8 {
            let index = Arc::new(InMemoryFingerprintIndex::new());
            let barrier = Arc::new(Barrier::new(THREADS));
            let handles: Vec<_> = (0..THREADS)
                .map(|t| {
                    let index = Arc::clone(&index);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        index
                            .register_unless_duplicate(image(t as u128), exact(round), phash(0), 640, 480)
                            .unwrap()
                            .is_none()
                    })
                })
                .collect();
            let admitted = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|ok| *ok)
                .count();
            assert_eq!(admitted, 1);
            assert_eq!(index.len().unwrap(), 1);
        }
    }

    #[test]
    fn exact_duplicates_group_by_hash() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0);
        register(&index, 2, 1, 0);
        register(&index, 3, 1, 0);
        register(&index, 4, 2, 0);
        register(&index, 5, 3, 0);
        register(&index, 6, 3, 0);

        let groups = index.find_exact_duplicates(None).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], [image(1), image(2), image(3)].into_iter().collect());
        assert_eq!(groups[1], [image(5), image(6)].into_iter().collect());
    }

    #[test]
    fn exact_duplicates_honour_exclusion() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0);
        register(&index, 2, 1, 0);
        register(&index, 3, 2, 0);
        register(&index, 4, 2, 0);
        register(&index, 5, 2, 0);

        let groups = index.find_exact_duplicates(Some(&image(1))).unwrap();
        assert_eq!(groups, vec![[image(3), image(4), image(5)].into_iter().collect()]);

        let groups = index.find_exact_duplicates(Some(&image(4))).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1], [image(3), image(5)].into_iter().collect());
    }

    #[test]
    fn duplicates_of_excludes_self() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0);
        register(&index, 2, 1, 0);
        assert_eq!(index.duplicates_of(&image(1)).unwrap(), vec![image(2)]);
        assert!(matches!(
            index.duplicates_of(&image(9)),
            Err(FingerprintError::NotRegistered(_))
        ));
    }

    #[test]
    fn similar_respects_threshold() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0b0000);
        register(&index, 2, 2, 0b0111);
        register(&index, 3, 3, 0b0001);

        let within_three = index.find_similar(&image(1), 3).unwrap();
        assert_eq!(
            within_three,
            vec![
                SimilarMatch { image_id: image(3), distance: 1 },
                SimilarMatch { image_id: image(2), distance: 3 },
            ]
        );

        let within_two = index.find_similar(&image(1), 2).unwrap();
        assert_eq!(within_two, vec![SimilarMatch { image_id: image(3), distance: 1 }]);
    }

    #[test]
    fn similar_zero_threshold_means_identical_phash() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0xabcd);
        register(&index, 2, 2, 0xabcd);
        register(&index, 3, 3, 0xabcc);

        let matches = index.find_similar(&image(1), 0).unwrap();
        assert_eq!(matches, vec![SimilarMatch { image_id: image(2), distance: 0 }]);
    }

    #[test]
    fn similar_ties_break_by_id() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0);
        register(&index, 7, 7, 1);
        register(&index, 4, 4, 2);
        let order: Vec<ImageId> = index
            .find_similar(&image(1), 1)
            .unwrap()
            .into_iter()
            .map(|m| m.image_id)
            .collect();
        assert_eq!(order, vec![image(4), image(7)]);
    }

    #[test]
    fn similar_requires_registered_image() {
        let index = InMemoryFingerprintIndex::new();
        assert_eq!(
            index.find_similar(&image(1), 3),
            Err(FingerprintError::NotRegistered(image(1)))
        );
    }

    #[test]
    fn similar_rejects_oversized_threshold() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0);
        assert!(matches!(
            index.find_similar(&image(1), 65),
            Err(FingerprintError::InvalidThreshold { threshold: 65, .. })
        ));
        assert!(index.find_similar(&image(1), 64).is_ok());
    }

    #[test]
    fn similar_to_unregistered_hash() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0b1000);
        let matches = index.find_similar_to_hash(&phash(0), 1, None).unwrap();
        assert_eq!(matches, vec![SimilarMatch { image_id: image(1), distance: 1 }]);
    }

    #[test]
    fn similar_groups_are_transitive() {
        let index = InMemoryFingerprintIndex::new();
        // 1 -- 2 -- 3 chained by single-bit steps, 4 far away, 5 near 4.
        register(&index, 1, 1, 0b000);
        register(&index, 2, 2, 0b001);
        register(&index, 3, 3, 0b011);
        register(&index, 4, 4, u64::MAX);
        register(&index, 5, 5, u64::MAX - 1);
        register(&index, 6, 6, 0x00ff_ff00_0000_0000);

        let groups = index.find_similar_groups(1).unwrap();
        assert_eq!(
            groups,
            vec![
                [image(1), image(2), image(3)].into_iter().collect(),
                [image(4), image(5)].into_iter().collect(),
            ]
        );
    }

    #[test]
    fn remove_clears_both_maps() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0);
        register(&index, 2, 1, 0);
        assert!(index.remove(&image(1)).unwrap());
        assert!(!index.remove(&image(1)).unwrap());
        assert_eq!(index.find_by_exact_hash(&exact(1)).unwrap(), vec![image(2)]);
        assert!(index.find_exact_duplicates(None).unwrap().is_empty());
    }

    #[test]
    fn export_import_roundtrip() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 2, 1, 5);
        register(&index, 1, 1, 6);
        let exported = index.export().unwrap();
        assert_eq!(exported[0].image_id, image(1));

        let restored = InMemoryFingerprintIndex::from_fingerprints(exported.clone()).unwrap();
        assert_eq!(restored.export().unwrap(), exported);
        assert_eq!(restored.find_exact_duplicates(None).unwrap().len(), 1);
    }

    #[test]
    fn import_revalidates_dimensions() {
        let index = InMemoryFingerprintIndex::new();
        register(&index, 1, 1, 0);
        let mut table = serde_json::to_value(index.export().unwrap()).unwrap();
        table[0]["height"] = 0.into();
        let tampered: Vec<ImageFingerprint> = serde_json::from_value(table).unwrap();
        assert!(matches!(
            InMemoryFingerprintIndex::from_fingerprints(tampered),
            Err(FingerprintError::DimensionMismatch { height: 0, .. })
        ));
    }

    proptest! {
        #[test]
        fn similar_matches_brute_force(
            hashes in proptest::collection::vec(any::<u64>(), 1..40),
            threshold in 0u32..=64,
        ) {
            let index = InMemoryFingerprintIndex::new();
            for (n, bits) in hashes.iter().enumerate() {
                register(&index, n as u128, (n % 251) as u8, *bits);
            }
            let target = phash(hashes[0]);
            let mut expected: Vec<SimilarMatch> = hashes
                .iter()
                .enumerate()
                .skip(1)
                .filter_map(|(n, bits)| {
                    let distance = target.distance(&phash(*bits));
                    (distance <= threshold).then_some(SimilarMatch { image_id: image(n as u128), distance })
                })
                .collect();
            expected.sort();
            prop_assert_eq!(index.find_similar(&image(0), threshold).unwrap(), expected);
        }

        #[test]
        fn exact_groups_partition_shared_hashes(buckets in proptest::collection::vec(0u8..6, 1..50)) {
            let index = InMemoryFingerprintIndex::new();
            for (n, bucket) in buckets.iter().enumerate() {
                register(&index, n as u128, *bucket, 0);
            }
            let groups = index.find_exact_duplicates(None).unwrap();
            let mut seen = BTreeSet::new();
            for group in &groups {
                prop_assert!(group.len() >= 2);
                let first = index.get(group.iter().next().unwrap()).unwrap().unwrap().exact_hash;
                for id in group {
                    prop_assert!(seen.insert(*id));
                    prop_assert_eq!(index.get(id).unwrap().unwrap().exact_hash, first);
                }
            }
            let expected_grouped = buckets
                .iter()
                .filter(|b| buckets.iter().filter(|o| o == b).count() >= 2)
                .count();
            prop_assert_eq!(seen.len(), expected_grouped);
        }
    }
}
