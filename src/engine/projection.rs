use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

/// Append-only metric log plus the per-member "latest metric" pointer.
///
/// The pointer is maintained on every insert so `get_latest` never scans
/// history. Ordering is by `recorded_at`, not by arrival.
pub struct MetricProjection {
    by_id: DashMap<Ulid, HealthMetric>,
    history: DashMap<Ulid, Vec<Ulid>>,
    latest: DashMap<Ulid, MemberLatestMetric>,
}

impl Default for MetricProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricProjection {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            history: DashMap::new(),
            latest: DashMap::new(),
        }
    }

    pub fn contains(&self, metric_id: &Ulid) -> bool {
        self.by_id.contains_key(metric_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Append to the log, then update the projection. Returns whether the
    /// projection moved.
    pub fn insert(&self, metric: HealthMetric) -> bool {
        let member_id = metric.member_id;
        let metric_id = metric.id;
        self.by_id.insert(metric_id, metric.clone());
        self.history.entry(member_id).or_default().push(metric_id);
        self.on_metric_inserted(&metric)
    }

    /// Overwrite the member's pointer iff there is none yet or `metric` is at
    /// least as recent. The entry lock makes compare-and-set atomic.
    pub fn on_metric_inserted(&self, metric: &HealthMetric) -> bool {
        let next = MemberLatestMetric {
            member_id: metric.member_id,
            latest_metric_id: metric.id,
            latest_recorded_at: metric.recorded_at,
        };
        match self.latest.entry(metric.member_id) {
            Entry::Vacant(v) => {
                v.insert(next);
                true
            }
            Entry::Occupied(mut o) => {
                if metric.recorded_at >= o.get().latest_recorded_at {
                    o.insert(next);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn latest_pointer(&self, member_id: &Ulid) -> Option<MemberLatestMetric> {
        self.latest.get(member_id).map(|e| *e.value())
    }

    /// O(1): pointer lookup then id lookup.
    pub fn get_latest(&self, member_id: &Ulid) -> Option<HealthMetric> {
        let pointer = self.latest_pointer(member_id)?;
        self.by_id
            .get(&pointer.latest_metric_id)
            .map(|e| e.value().clone())
    }

    /// Full history for a member, newest first.
    pub fn history(&self, member_id: &Ulid) -> Vec<HealthMetric> {
        let ids = self
            .history
            .get(member_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut metrics: Vec<HealthMetric> = ids
            .iter()
            .filter_map(|id| self.by_id.get(id).map(|e| e.value().clone()))
            .collect();
        metrics.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at).then(b.id.cmp(&a.id)));
        metrics
    }

    /// Every stored metric in insertion order per member, for compaction.
    pub fn all(&self) -> Vec<HealthMetric> {
        let mut out = Vec::with_capacity(self.by_id.len());
        for entry in self.history.iter() {
            for id in entry.value() {
                if let Some(m) = self.by_id.get(id) {
                    out.push(m.value().clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(member_id: Ulid, recorded_at: Ms, weight: f64) -> HealthMetric {
        HealthMetric {
            id: Ulid::new(),
            member_id,
            recorded_at,
            values: MetricValues {
                weight_kg: Some(weight),
                ..Default::default()
            },
        }
    }

    #[test]
    fn first_metric_sets_projection() {
        let p = MetricProjection::new();
        let m = Ulid::new();
        assert!(p.get_latest(&m).is_none());

        let first = metric(m, 1_000, 80.0);
        assert!(p.insert(first.clone()));
        assert_eq!(p.get_latest(&m), Some(first));
    }

    #[test]
    fn newer_metric_overwrites() {
        let p = MetricProjection::new();
        let m = Ulid::new();
        p.insert(metric(m, 1_000, 80.0));
        let newer = metric(m, 2_000, 79.0);
        p.insert(newer.clone());
        assert_eq!(p.get_latest(&m), Some(newer));
        assert_eq!(p.latest_pointer(&m).unwrap().latest_recorded_at, 2_000);
    }

    #[test]
    fn late_older_metric_does_not_move_projection() {
        let p = MetricProjection::new();
        let m = Ulid::new();
        let newest = metric(m, 5_000, 75.0);
        p.insert(newest.clone());
        assert!(!p.insert(metric(m, 1_000, 90.0)));
        assert_eq!(p.get_latest(&m), Some(newest));
        assert_eq!(p.history(&m).len(), 2);
    }

    #[test]
    fn equal_timestamp_overwrites() {
        let p = MetricProjection::new();
        let m = Ulid::new();
        p.insert(metric(m, 1_000, 80.0));
        let same_time = metric(m, 1_000, 81.0);
        assert!(p.insert(same_time.clone()));
        assert_eq!(p.get_latest(&m), Some(same_time));
    }

    #[test]
    fn projection_is_max_regardless_of_order() {
        let m = Ulid::new();
        let metrics: Vec<HealthMetric> = [3_000, 9_000, 1_000, 7_000, 5_000]
            .iter()
            .map(|&t| metric(m, t, t as f64 / 100.0))
            .collect();
        let p = MetricProjection::new();
        for x in metrics.iter().cloned() {
            p.insert(x);
        }
        let latest = p.get_latest(&m).unwrap();
        assert_eq!(latest.recorded_at, 9_000);
    }

    #[test]
    fn members_are_independent() {
        let p = MetricProjection::new();
        let (a, b) = (Ulid::new(), Ulid::new());
        p.insert(metric(a, 9_000, 70.0));
        p.insert(metric(b, 1_000, 60.0));
        assert_eq!(p.get_latest(&a).unwrap().recorded_at, 9_000);
        assert_eq!(p.get_latest(&b).unwrap().recorded_at, 1_000);
    }

    #[test]
    fn history_is_newest_first() {
        let p = MetricProjection::new();
        let m = Ulid::new();
        p.insert(metric(m, 2_000, 1.0));
        p.insert(metric(m, 3_000, 1.0));
        p.insert(metric(m, 1_000, 1.0));
        let times: Vec<Ms> = p.history(&m).iter().map(|x| x.recorded_at).collect();
        assert_eq!(times, vec![3_000, 2_000, 1_000]);
        assert!(p.history(&Ulid::new()).is_empty());
    }
}
