//! Bounded keyframe storage.
//!
//! Records are kept in insertion order. When full, inserting evicts the record
//! that adds the least angular coverage: the one closest in rotation to any
//! other record (the incoming one included). Ties go to the oldest.

use std::fmt;

use crate::geometry::SE3;
use crate::sensor::ColorFrame;

/// Sequential keyframe identifier, unique within a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyframeId(pub u64);

impl fmt::Display for KeyframeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KF{}", self.0)
    }
}

/// A stored (color image, pose) sample.
#[derive(Debug, Clone)]
pub struct KeyframeRecord {
    pub id: KeyframeId,
    pub color: ColorFrame,
    /// Camera pose at capture time (T_wc).
    pub pose: SE3,
    pub timestamp: f64,
}

pub struct KeyframeStore {
    capacity: usize,
    records: Vec<KeyframeRecord>,
    next_id: u64,
    evicted: usize,
}

impl KeyframeStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Vec::with_capacity(capacity),
            next_id: 0,
            evicted: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    pub fn records(&self) -> &[KeyframeRecord] {
        &self.records
    }

    /// Total records evicted since creation.
    pub fn evicted_count(&self) -> usize {
        self.evicted
    }

    /// Store a new keyframe, evicting one first if at capacity.
    ///
    /// Returns the assigned id and the evicted record, if any.
    pub fn insert(&mut self, color: ColorFrame, pose: SE3, timestamp: f64) -> (KeyframeId, Option<KeyframeRecord>) {
        let evicted = if self.is_full() {
            let victim = self.least_useful(&pose);
            self.evicted += 1;
            Some(self.records.remove(victim))
        } else {
            None
        };

        let id = KeyframeId(self.next_id);
        self.next_id += 1;
        self.records.push(KeyframeRecord {
            id,
            color,
            pose,
            timestamp,
        });
        (id, evicted)
    }

    /// Index of the record with the smallest angular gap to its nearest
    /// neighbor, counting `incoming` as a neighbor.
    fn least_useful(&self, incoming: &SE3) -> usize {
        let mut best = (0usize, f64::INFINITY);
        for (i, record) in self.records.iter().enumerate() {
            let mut gap = record.pose.angle_to(incoming);
            for (j, other) in self.records.iter().enumerate() {
                if i != j {
                    gap = gap.min(record.pose.angle_to(&other.pose));
                }
            }
            // Strict `<` keeps the oldest on ties.
            if gap < best.1 {
                best = (i, gap);
            }
        }
        best.0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Arc;

    use nalgebra::{UnitQuaternion, Vector3};

    use crate::sensor::{CameraIntrinsics, ColorImage};

    pub(crate) fn color() -> ColorFrame {
        ColorFrame {
            intrinsics: CameraIntrinsics::from_fov(4, 3, 60.0),
            image: Arc::new(ColorImage::filled(4, 3, [10, 20, 30])),
        }
    }

    fn yaw(deg: f64) -> SE3 {
        SE3::new(
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), deg.to_radians()),
            Vector3::zeros(),
        )
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let mut store = KeyframeStore::new(5);
        for i in 0..40 {
            store.insert(color(), yaw(i as f64 * 25.0), i as f64);
            assert!(store.len() <= 5);
        }
        assert_eq!(store.len(), 5);
        assert_eq!(store.evicted_count(), 35);
    }

    #[test]
    fn test_evicts_most_redundant() {
        let mut store = KeyframeStore::new(3);
        store.insert(color(), yaw(0.0), 0.0);
        store.insert(color(), yaw(90.0), 1.0);
        store.insert(color(), yaw(95.0), 2.0);
        // 90 and 95 are 5° apart; the older of the two goes.
        let (id, evicted) = store.insert(color(), yaw(200.0), 3.0);
        assert_eq!(evicted.map(|r| r.id), Some(KeyframeId(1)));
        assert_eq!(id, KeyframeId(3));
        let ids: Vec<u64> = store.records().iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![0, 2, 3]);
    }

    #[test]
    fn test_incoming_counts_as_neighbor() {
        let mut store = KeyframeStore::new(2);
        store.insert(color(), yaw(0.0), 0.0);
        store.insert(color(), yaw(120.0), 1.0);
        let (_, evicted) = store.insert(color(), yaw(118.0), 2.0);
        assert_eq!(evicted.map(|r| r.id), Some(KeyframeId(1)));
    }
}
