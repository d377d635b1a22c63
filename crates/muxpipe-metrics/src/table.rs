use std::collections::BTreeMap;

use tracing::debug;

use crate::codec::{decode_records, Schema};
use crate::error::Result;

/// A metric value as seen by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricEvent {
    pub index: u16,
    pub id: String,
    pub name: String,
    pub units: String,
    pub value: String,
}

/// Collector-side view of one sender's metrics.
///
/// Keep one table per connection: indexes are only unique within a sender.
#[derive(Debug, Default)]
pub struct MetricsTable {
    metrics: BTreeMap<u16, Schema>,
}

impl MetricsTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a metrics payload and return the values it carried.
    ///
    /// Schema records update the table and yield an event if they carry a
    /// value. Values for indexes without a schema yield events with empty
    /// names.
    pub fn apply(&mut self, payload: &[u8]) -> Result<Vec<MetricEvent>> {
        let mut events = Vec::new();

        for record in decode_records(payload)? {
            let index = record.metric_index();
            if record.is_schema() {
                let schema = Schema::parse(index, &record.value)?;
                let has_value = !schema.value.is_empty();
                self.metrics.insert(index, schema);
                if has_value {
                    events.extend(self.event(index));
                }
                continue;
            }

            let value = String::from_utf8_lossy(&record.value).into_owned();
            match self.metrics.get_mut(&index) {
                Some(schema) => schema.value.clone_from(&value),
                None => {
                    debug!(index, "value for metric without schema");
                    events.push(MetricEvent {
                        index,
                        id: String::new(),
                        name: String::new(),
                        units: String::new(),
                        value,
                    });
                    continue;
                }
            }
            events.extend(self.event(index));
        }

        Ok(events)
    }

    pub fn get(&self, index: u16) -> Option<&Schema> {
        self.metrics.get(&index)
    }

    /// Every known metric with its latest value, by index.
    pub fn snapshot(&self) -> Vec<MetricEvent> {
        self.metrics.keys().filter_map(|index| self.event(*index)).collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    fn event(&self, index: u16) -> Option<MetricEvent> {
        self.metrics.get(&index).map(|schema| MetricEvent {
            index,
            id: schema.id.clone(),
            name: schema.name.clone(),
            units: schema.units.clone(),
            value: schema.value.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MetricsRegistry;

    #[test]
    fn registry_payloads_round_trip_into_events() {
        let registry = MetricsRegistry::new();
        let latency = registry.metric("latency", "Latency", "ms").unwrap();
        let idle = registry.metric("idle", "Idle", "").unwrap();
        latency.post("12").unwrap();

        let mut table = MetricsTable::new();
        let events = table.apply(&registry.collect(false).unwrap()).unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(idle.index()).map(|s| s.id.as_str()), Some("idle"));
        assert_eq!(
            events.last(),
            Some(&MetricEvent {
                index: 1,
                id: "latency".to_string(),
                name: "Latency".to_string(),
                units: "ms".to_string(),
                value: "12".to_string(),
            })
        );

        idle.post("yes").unwrap();
        let events = table.apply(&registry.collect(false).unwrap()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "Idle");
        assert_eq!(events[0].value, "yes");

        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].value, "yes");
    }

    #[test]
    fn value_without_schema_is_reported_anonymously() {
        let mut buf = bytes::BytesMut::new();
        crate::codec::encode_record(42, b"7", &mut buf).unwrap();

        let mut table = MetricsTable::new();
        let events = table.apply(&buf).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].index, 42);
        assert!(events[0].id.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let mut table = MetricsTable::new();
        assert!(table.apply(&[0x00, 0x01]).is_err());
    }
}
