use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MetricsError, Result};

/// Index bit marking a schema record.
pub const SCHEMA_FLAG: u16 = 0x8000;

/// Largest value a record can carry.
pub const MAX_VALUE_LEN: usize = u8::MAX as usize;

/// Record header: index (2, big-endian) + value length (1).
pub const RECORD_HEADER_SIZE: usize = 3;

const SEPARATOR: u8 = 0;

/// One record from a metrics payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Raw index, including [`SCHEMA_FLAG`] for schema records.
    pub index: u16,
    pub value: Bytes,
}

impl Record {
    pub fn is_schema(&self) -> bool {
        self.index & SCHEMA_FLAG != 0
    }

    /// Index of the metric this record belongs to.
    pub fn metric_index(&self) -> u16 {
        self.index & !SCHEMA_FLAG
    }
}

/// Append one record to `dst`.
///
/// ```text
/// ┌──────────────┬────────────┬──────────────┐
/// │ Index (2B)   │ Len (1B)   │ Value        │
/// │ BE           │            │ (Len bytes)  │
/// └──────────────┴────────────┴──────────────┘
/// ```
pub fn encode_record(index: u16, value: &[u8], dst: &mut BytesMut) -> Result<()> {
    if value.len() > MAX_VALUE_LEN {
        return Err(MetricsError::ValueTooLong {
            index: index & !SCHEMA_FLAG,
            len: value.len(),
        });
    }
    dst.reserve(RECORD_HEADER_SIZE + value.len());
    dst.put_u16(index);
    dst.put_u8(value.len() as u8);
    dst.put_slice(value);
    Ok(())
}

/// Split a metrics payload into records.
pub fn decode_records(payload: &[u8]) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut rest = payload;

    while !rest.is_empty() {
        let offset = payload.len() - rest.len();
        if rest.len() < RECORD_HEADER_SIZE {
            return Err(MetricsError::Truncated { offset });
        }
        let index = rest.get_u16();
        let len = rest.get_u8() as usize;
        if rest.len() < len {
            return Err(MetricsError::Truncated { offset });
        }
        records.push(Record {
            index,
            value: Bytes::copy_from_slice(&rest[..len]),
        });
        rest.advance(len);
    }

    Ok(records)
}

/// Identity of a metric, as carried by its schema record.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    pub id: String,
    pub name: String,
    pub units: String,
    /// Value at the time the schema was published.
    pub value: String,
}

impl Schema {
    /// Bytes a schema record spends on everything except the value.
    pub(crate) fn overhead(id: &str, name: &str, units: &str) -> usize {
        id.len() + name.len() + units.len() + 5
    }

    /// `id\0name\0units\0value\0\0`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            Self::overhead(&self.id, &self.name, &self.units) + self.value.len(),
        );
        for field in [&self.id, &self.name, &self.units, &self.value] {
            out.extend_from_slice(field.as_bytes());
            out.push(SEPARATOR);
        }
        out.push(SEPARATOR);
        out
    }

    pub fn parse(index: u16, value: &[u8]) -> Result<Self> {
        let mut fields = value
            .split(|b| *b == SEPARATOR)
            .map(|field| String::from_utf8_lossy(field).into_owned());

        let mut next = || fields.next().ok_or(MetricsError::MalformedSchema(index));
        Ok(Self {
            id: next()?,
            name: next()?,
            units: next()?,
            value: next()?,
        })
    }
}
