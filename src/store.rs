//! Bounded per-series buffers.
//!
//! Every series key owns a time-ordered window of at most `max_points`
//! samples, oldest first. All access goes through one lock so an append
//! is never observed half-applied by a scoring cycle.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::metrics;
use crate::models::DataPoint;

#[derive(Clone)]
pub struct SeriesStore {
    max_points: usize,
    state: Arc<Mutex<HashMap<String, Vec<DataPoint>>>>,
}

impl SeriesStore {
    pub fn new(max_points: usize) -> Self {
        SeriesStore {
            max_points,
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Appends `points` to the buffer of `key` and returns the new length.
    ///
    /// A batch of at least `max_points` replaces the buffer with its own
    /// tail. A smaller batch is appended after dropping just enough of the
    /// oldest buffered points to stay within `max_points`. Points are not
    /// re-sorted or deduplicated.
    pub fn append(&self, key: &str, points: &[DataPoint]) -> usize {
        let mut state = self.state.lock();
        let created = !state.contains_key(key);
        let buffer = state.entry(key.to_string()).or_default();

        if points.len() >= self.max_points {
            let start = points.len() - self.max_points;
            buffer.clear();
            buffer.extend_from_slice(&points[start..]);
        } else {
            let overflow = (buffer.len() + points.len()).saturating_sub(self.max_points);
            buffer.drain(..overflow.min(buffer.len()));
            buffer.extend_from_slice(points);
        }

        let len = buffer.len();
        if created {
            metrics::set_buffered_series(state.len());
        }
        metrics::record_ingested_points(points.len());
        len
    }

    /// Copy of the buffer for `key`, oldest first.
    pub fn read(&self, key: &str) -> Option<Vec<DataPoint>> {
        self.state.lock().get(key).cloned()
    }

    pub fn len(&self, key: &str) -> Option<usize> {
        self.state.lock().get(key).map(Vec::len)
    }

    pub fn series_count(&self) -> usize {
        self.state.lock().len()
    }

    /// Copies the buffers of every listed key that exists, under a single
    /// lock acquisition.
    pub fn snapshot<'a, I>(&self, keys: I) -> SeriesSnapshot
    where
        I: IntoIterator<Item = &'a str>,
    {
        let state = self.state.lock();
        let series = keys
            .into_iter()
            .filter_map(|key| state.get(key).map(|points| (key.to_string(), points.clone())))
            .collect();
        SeriesSnapshot { series }
    }
}

/// Point-in-time copy of a subset of the store, detached from the lock.
#[derive(Debug, Clone, Default)]
pub struct SeriesSnapshot {
    series: HashMap<String, Vec<DataPoint>>,
}

impl SeriesSnapshot {
    pub fn get(&self, key: &str) -> Option<&[DataPoint]> {
        self.series.get(key).map(Vec::as_slice)
    }

    pub fn len_of(&self, key: &str) -> Option<usize> {
        self.series.get(key).map(Vec::len)
    }
}

impl FromIterator<(String, Vec<DataPoint>)> for SeriesSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, Vec<DataPoint>)>>(iter: T) -> Self {
        SeriesSnapshot {
            series: iter.into_iter().collect(),
        }
    }
}
