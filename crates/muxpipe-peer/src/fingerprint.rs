use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use muxpipe_frame::{encode, FINGERPRINT};
use muxpipe_transport::write_all_timeout;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWrite;
use tracing::debug;

use crate::error::{PeerError, Result};

/// Content-hash id of the fingerprint.
pub const KEY_ID: &str = "id";
/// Process id of the sender.
pub const KEY_PID: &str = "pid";
/// Peer address, added by the receiving side.
pub const KEY_REMOTE_ADDR: &str = "remote.addr";

const PLACEHOLDER: &str = "?";

/// Operator-supplied identity facts that the process cannot discover itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    /// Name of the configuration the process was started with.
    pub config_name: String,
    /// Free-form comment from the configuration.
    pub comment: String,
    /// Optional service name.
    pub name: Option<String>,
    /// Optional service description.
    pub description: Option<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            config_name: PLACEHOLDER.to_string(),
            comment: PLACEHOLDER.to_string(),
            name: None,
            description: None,
        }
    }
}

/// Identity blob describing the process at the sending end of a connection.
///
/// Keys are kept sorted, so the serialized form (and therefore the content
/// hash) does not depend on insertion order.
#[derive(Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint {
    props: BTreeMap<String, Value>,
}

impl Fingerprint {
    /// Assemble the fingerprint of the current process.
    pub fn build(identity: &IdentityConfig) -> Self {
        let mut props = BTreeMap::new();
        let mut put = |key: &str, value: Value| {
            props.insert(key.to_string(), value);
        };

        put(KEY_PID, Value::from(std::process::id()));
        put("arch", Value::from(std::env::consts::ARCH));
        put("os", Value::from(std::env::consts::OS));
        put(
            "cpu",
            Value::from(
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1),
            ),
        );
        put(
            "runtime",
            Value::from(option_env!("MUXPIPE_RUSTC_VERSION").unwrap_or("rustc (unknown)")),
        );
        put("version", Value::from(env!("CARGO_PKG_VERSION")));

        let mut args = std::env::args();
        if let Some(app) = args.next() {
            put("app", Value::from(app));
        }
        let rest: Vec<String> = args.collect();
        if !rest.is_empty() {
            put("args", Value::from(rest.join(";")));
        }

        put("config", Value::from(identity.config_name.as_str()));
        put("comment", Value::from(identity.comment.as_str()));

        if let Ok(hostname) = whoami::fallible::hostname() {
            put("hostname", Value::from(hostname));
        }
        if let Ok(user) = whoami::fallible::realname() {
            put("user", Value::from(user));
        }
        if let Ok(username) = whoami::fallible::username() {
            put("username", Value::from(username));
        }

        if let Some(name) = identity.name.as_deref().filter(|s| !s.is_empty()) {
            put("name", Value::from(name));
        }
        if let Some(description) = identity.description.as_deref().filter(|s| !s.is_empty()) {
            put("description", Value::from(description));
        }

        let mut fingerprint = Self { props };
        let id = fingerprint.content_id();
        fingerprint.props.insert(KEY_ID.to_string(), Value::from(id));
        fingerprint
    }

    /// Wrap an existing property map without touching its id.
    pub fn from_props(props: BTreeMap<String, Value>) -> Self {
        Self { props }
    }

    /// Parse a fingerprint payload; it must be a JSON object.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        match value {
            Value::Object(map) => Ok(Self {
                props: map.into_iter().collect(),
            }),
            other => Err(PeerError::ProtocolViolation(format!(
                "fingerprint must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Serialize to the wire payload.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.props)?)
    }

    /// The mapping as a JSON object value.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.props
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        )
    }

    /// Hash of every property except `id` and `remote.addr`.
    ///
    /// Falls back to `(pid:<pid>)` if the properties cannot be serialized.
    pub fn content_id(&self) -> String {
        let hashed: BTreeMap<&str, &Value> = self
            .props
            .iter()
            .filter(|(key, _)| key.as_str() != KEY_ID && key.as_str() != KEY_REMOTE_ADDR)
            .map(|(key, value)| (key.as_str(), value))
            .collect();

        match serde_json::to_vec(&hashed) {
            Ok(data) => hex::encode(Sha256::digest(&data)),
            Err(_) => format!("(pid:{})", std::process::id()),
        }
    }

    /// The id carried in the fingerprint, if any.
    pub fn id(&self) -> Option<&str> {
        self.props.get(KEY_ID).and_then(Value::as_str)
    }

    pub fn pid(&self) -> Option<u64> {
        self.props.get(KEY_PID).and_then(Value::as_u64)
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.props.get(KEY_REMOTE_ADDR).and_then(Value::as_str)
    }

    /// Record the address the connection was accepted from.
    pub fn set_remote_addr(&mut self, addr: SocketAddr) {
        self.insert(KEY_REMOTE_ADDR, addr.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.props.insert(key.into(), value.into());
    }

    pub fn props(&self) -> &BTreeMap<String, Value> {
        &self.props
    }

    pub fn into_props(self) -> BTreeMap<String, Value> {
        self.props
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.props.iter()).finish()
    }
}

/// Write `fingerprint` as a stream-0 frame, giving up after `timeout`.
pub async fn send_fingerprint<W>(
    writer: &mut W,
    fingerprint: &Fingerprint,
    timeout: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = fingerprint.to_bytes()?;
    let wire = encode(FINGERPRINT, &payload)?;
    write_all_timeout(writer, &wire, timeout).await?;
    debug!(id = fingerprint.id().unwrap_or(PLACEHOLDER), "sent fingerprint");
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
