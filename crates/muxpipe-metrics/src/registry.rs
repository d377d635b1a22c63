use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::{Bytes, BytesMut};
use muxpipe_peer::StreamHandle;
use tracing::{debug, warn};

use crate::codec::{encode_record, Schema, MAX_VALUE_LEN, SCHEMA_FLAG};
use crate::error::{MetricsError, Result};

/// Prefix of the ids given to [`MetricsRegistry::one_time`] metrics.
pub const ONE_TIME_PREFIX: &str = "one.time.metric:";

const MAX_INDEX: u16 = !SCHEMA_FLAG;

struct Entry {
    metric: Arc<MetricInner>,
    value: String,
    counter: i64,
    published: bool,
}

struct State {
    next_index: u16,
    metrics: BTreeMap<u16, Entry>,
    /// Latest unsent value per index.
    updates: BTreeMap<u16, String>,
}

struct RegistryInner {
    state: Mutex<State>,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner of every metric a process publishes.
///
/// Cloning is cheap and clones share the same metrics.
#[derive(Clone)]
pub struct MetricsRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: Mutex::new(State {
                    next_index: 1,
                    metrics: BTreeMap::new(),
                    updates: BTreeMap::new(),
                }),
            }),
        }
    }

    /// Register a metric. Indexes are handed out from 1 upwards.
    pub fn metric(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        units: impl Into<String>,
    ) -> Result<Metric> {
        let (id, name, units) = (id.into(), name.into(), units.into());
        let overhead = Schema::overhead(&id, &name, &units);

        let mut state = self.inner.lock();
        let index = state.next_index;
        if index > MAX_INDEX {
            return Err(MetricsError::IndexExhausted);
        }
        if overhead > MAX_VALUE_LEN {
            return Err(MetricsError::ValueTooLong {
                index,
                len: overhead,
            });
        }
        state.next_index += 1;

        let metric = Arc::new(MetricInner {
            index,
            id,
            name,
            units,
            overhead,
            registry: Arc::downgrade(&self.inner),
        });
        state.metrics.insert(
            index,
            Entry {
                metric: Arc::clone(&metric),
                value: String::new(),
                counter: 0,
                published: false,
            },
        );
        debug!(index, id = %metric.id, "registered metric");
        Ok(Metric { inner: metric })
    }

    /// Register a metric updated through [`Counter::add`] and [`Counter::set`].
    pub fn counter(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        units: impl Into<String>,
    ) -> Result<Counter> {
        self.metric(id, name, units).map(Counter)
    }

    /// Register a metric and post its only value.
    pub fn one_time(&self, name: &str, value: impl fmt::Display) -> Result<Metric> {
        let metric = self.metric(format!("{ONE_TIME_PREFIX}{name}"), name, "")?;
        metric.update(value)?;
        Ok(metric)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().metrics.is_empty()
    }

    /// Build the next metrics payload.
    ///
    /// Schema records come first: for metrics never published, or for every
    /// metric when `force_schema` is set. Then the latest pending value of
    /// each metric that changed since the last collect. Returns `None` when
    /// there is nothing to send.
    pub fn collect(&self, force_schema: bool) -> Option<Bytes> {
        let mut state = self.inner.lock();
        let State {
            metrics, updates, ..
        } = &mut *state;
        let mut buf = BytesMut::new();

        for (index, entry) in metrics.iter_mut() {
            if entry.published && !force_schema {
                continue;
            }
            let schema = entry.metric.schema(&entry.value);
            match encode_record(index | SCHEMA_FLAG, &schema.to_bytes(), &mut buf) {
                Ok(()) => {
                    entry.published = true;
                    // The schema already carries the current value.
                    updates.remove(index);
                }
                Err(err) => warn!(index, error = %err, "skipping metric schema"),
            }
        }

        for (index, value) in std::mem::take(updates) {
            if let Err(err) = encode_record(index, value.as_bytes(), &mut buf) {
                warn!(index, error = %err, "skipping metric value");
            }
        }

        if buf.is_empty() {
            None
        } else {
            Some(buf.freeze())
        }
    }

    /// Collect and write the payload to `sink` as one frame.
    ///
    /// Returns the payload size, `0` if there was nothing to send.
    pub fn publish(&self, sink: &StreamHandle, force_schema: bool) -> Result<usize> {
        match self.collect(force_schema) {
            Some(payload) => Ok(sink.write(&payload)?),
            None => Ok(0),
        }
    }
}

impl fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("MetricsRegistry")
            .field("metrics", &state.metrics.len())
            .field("pending", &state.updates.len())
            .finish()
    }
}

struct MetricInner {
    index: u16,
    id: String,
    name: String,
    units: String,
    overhead: usize,
    registry: Weak<RegistryInner>,
}

impl MetricInner {
    fn schema(&self, value: &str) -> Schema {
        Schema {
            id: self.id.clone(),
            name: self.name.clone(),
            units: self.units.clone(),
            value: value.to_string(),
        }
    }

    /// Apply `change` to the metric's entry under the registry lock.
    ///
    /// A no-op once the registry is gone.
    fn with_entry<T>(
        &self,
        change: impl FnOnce(&mut State, &Self) -> Result<T>,
    ) -> Result<Option<T>> {
        match self.registry.upgrade() {
            Some(registry) => {
                let mut state = registry.lock();
                change(&mut state, self).map(Some)
            }
            None => Ok(None),
        }
    }

    fn check_len(&self, value: &str) -> Result<()> {
        if self.overhead + value.len() > MAX_VALUE_LEN {
            return Err(MetricsError::ValueTooLong {
                index: self.index,
                len: value.len(),
            });
        }
        Ok(())
    }
}

/// Record `value` for `metric` if it differs from the current one.
fn post_locked(state: &mut State, metric: &MetricInner, value: String) -> Result<bool> {
    metric.check_len(&value)?;
    let Some(entry) = state.metrics.get_mut(&metric.index) else {
        return Ok(false);
    };
    if entry.value == value {
        return Ok(false);
    }
    entry.value.clone_from(&value);
    state.updates.insert(metric.index, value);
    Ok(true)
}

/// Handle for one registered metric.
#[derive(Clone)]
pub struct Metric {
    inner: Arc<MetricInner>,
}

impl Metric {
    pub fn index(&self) -> u16 {
        self.inner.index
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn units(&self) -> &str {
        &self.inner.units
    }

    /// Record a new value. Returns `false` if it equals the current value.
    pub fn post(&self, value: impl Into<String>) -> Result<bool> {
        let value = value.into();
        self.inner
            .with_entry(|state, metric| post_locked(state, metric, value))
            .map(|changed| changed.unwrap_or(false))
    }

    /// [`post`](Self::post) the value's `Display` form.
    pub fn update(&self, value: impl fmt::Display) -> Result<bool> {
        self.post(value.to_string())
    }

    /// Current value, empty before the first post.
    pub fn value(&self) -> String {
        self.inner
            .with_entry(|state, metric| {
                Ok(state
                    .metrics
                    .get(&metric.index)
                    .map(|entry| entry.value.clone())
                    .unwrap_or_default())
            })
            .ok()
            .flatten()
            .unwrap_or_default()
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metric")
            .field("index", &self.inner.index)
            .field("id", &self.inner.id)
            .finish()
    }
}

/// A metric holding an integer total.
#[derive(Debug, Clone)]
pub struct Counter(Metric);

impl Counter {
    /// Add `delta` and post the new total.
    pub fn add(&self, delta: i64) -> Result<i64> {
        self.apply(|counter| counter.wrapping_add(delta))
    }

    /// Replace the total.
    pub fn set(&self, value: i64) -> Result<i64> {
        self.apply(|_| value)
    }

    pub fn get(&self) -> i64 {
        self.0
            .inner
            .with_entry(|state, metric| {
                Ok(state
                    .metrics
                    .get(&metric.index)
                    .map_or(0, |entry| entry.counter))
            })
            .ok()
            .flatten()
            .unwrap_or(0)
    }

    pub fn metric(&self) -> &Metric {
        &self.0
    }

    fn apply(&self, next: impl FnOnce(i64) -> i64) -> Result<i64> {
        self.0
            .inner
            .with_entry(|state, metric| {
                let Some(entry) = state.metrics.get_mut(&metric.index) else {
                    return Ok(0);
                };
                let total = next(entry.counter);
                entry.counter = total;
                post_locked(state, metric, total.to_string())?;
                Ok(total)
            })
            .map(|total| total.unwrap_or(0))
    }
}
