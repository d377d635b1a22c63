//! The standard pipes: one multiplexer to the collector plus a handle for
//! each well-known stream.

use std::path::{Path, PathBuf};

use muxpipe_peer::{Multiplexer, MultiplexerConfig, PeerError, StreamHandle};
use muxpipe_transport::{validate_port, Endpoint, TransportError};
use tracing::{debug, info};

pub use muxpipe_frame::{LOGGER, METRICS, STDERR, STDOUT, USER_STREAM_START};

/// Ports file read when no other path is configured.
pub const DEFAULT_PORTS_FILE: &str = "port.json";

/// Errors that can occur while setting up the standard pipes.
#[derive(Debug, thiserror::Error)]
pub enum PipesError {
    /// The ports file could not be read.
    #[error("failed to read ports file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The ports file is not a JSON array of integers.
    #[error("ports file {} is not a JSON array of integers: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The ports file lists no ports.
    #[error("ports file {} lists no ports", .0.display())]
    NoPorts(PathBuf),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Peer(#[from] PeerError),
}

pub type Result<T> = std::result::Result<T, PipesError>;

/// Read a JSON array of collector ports, e.g. `[7001, 7002]`.
///
/// Entries outside `1..=65535` fail with [`TransportError::InvalidPort`].
pub fn load_ports(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| PipesError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw: Vec<i64> = serde_json::from_slice(&data).map_err(|source| PipesError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let ports = raw
        .into_iter()
        .map(|port| match validate_port(port)? {
            0 => Err(TransportError::InvalidPort(port)),
            port => Ok(port),
        })
        .collect::<std::result::Result<Vec<u16>, TransportError>>()?;
    debug!(path = %path.display(), ?ports, "loaded collector ports");
    Ok(ports)
}

/// A multiplexer to the collector with the four standard streams opened.
#[derive(Debug, Clone)]
pub struct Pipes {
    mux: Multiplexer,
    stdout: StreamHandle,
    stderr: StreamHandle,
    logger: StreamHandle,
    metrics: StreamHandle,
}

impl Pipes {
    /// Connect to `endpoint` and open the standard streams.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(endpoint: Endpoint, config: MultiplexerConfig) -> Result<Self> {
        info!(%endpoint, "opening standard pipes");
        let mux = Multiplexer::open(endpoint, config);
        Ok(Self {
            stdout: mux.new_writer(STDOUT)?,
            stderr: mux.new_writer(STDERR)?,
            logger: mux.new_writer(LOGGER)?,
            metrics: mux.new_writer(METRICS)?,
            mux,
        })
    }

    /// Open the pipes to the first port listed in the ports file at `path`.
    pub fn from_ports_file(
        path: impl AsRef<Path>,
        host: &str,
        config: MultiplexerConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let ports = load_ports(path)?;
        let port = *ports
            .first()
            .ok_or_else(|| PipesError::NoPorts(path.to_path_buf()))?;
        Self::open(Endpoint::new(host, port), config)
    }

    pub fn stdout(&self) -> &StreamHandle {
        &self.stdout
    }

    pub fn stderr(&self) -> &StreamHandle {
        &self.stderr
    }

    pub fn logger(&self) -> &StreamHandle {
        &self.logger
    }

    pub fn metrics(&self) -> &StreamHandle {
        &self.metrics
    }

    /// Handle for an application stream (ids from [`USER_STREAM_START`] up
    /// by convention).
    pub fn stream(&self, stream_id: u32) -> Result<StreamHandle> {
        Ok(self.mux.new_writer(stream_id)?)
    }

    pub fn multiplexer(&self) -> &Multiplexer {
        &self.mux
    }

    /// A `tracing` writer that sends each formatted event over the logger stream.
    #[cfg(feature = "pipe-writer")]
    pub fn log_writer(&self) -> PipeWriter {
        PipeWriter::new(self.logger.clone())
    }
}

/// [`MakeWriter`](tracing_subscriber::fmt::MakeWriter) over a stream handle.
///
/// Each formatted event becomes one frame.
#[cfg(feature = "pipe-writer")]
#[derive(Debug, Clone)]
pub struct PipeWriter {
    handle: StreamHandle,
}

#[cfg(feature = "pipe-writer")]
impl PipeWriter {
    pub fn new(handle: StreamHandle) -> Self {
        Self { handle }
    }
}

#[cfg(feature = "pipe-writer")]
impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for PipeWriter {
    type Writer = &'a StreamHandle;

    fn make_writer(&'a self) -> Self::Writer {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    fn ports_file(contents: &str) -> PathBuf {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        let dir = std::env::temp_dir().join(format!(
            "muxpipe-ports-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        let path = dir.join(DEFAULT_PORTS_FILE);
        std::fs::write(&path, contents).expect("ports file should be writable");
        path
    }

    #[test]
    fn load_ports_reads_json_array() {
        let path = ports_file("[7001, 7002]");
        assert_eq!(load_ports(&path).unwrap(), vec![7001, 7002]);
    }

    #[test]
    fn load_ports_rejects_negative_and_out_of_range() {
        let path = ports_file("[7001, -1]");
        assert!(matches!(
            load_ports(&path),
            Err(PipesError::Transport(TransportError::InvalidPort(-1)))
        ));

        let path = ports_file("[70000]");
        assert!(matches!(
            load_ports(&path),
            Err(PipesError::Transport(TransportError::InvalidPort(70000)))
        ));

        let path = ports_file("[0]");
        assert!(matches!(
            load_ports(&path),
            Err(PipesError::Transport(TransportError::InvalidPort(0)))
        ));
    }

    #[test]
    fn load_ports_reports_missing_and_malformed_files() {
        let missing = std::env::temp_dir().join("muxpipe-no-such-dir").join("port.json");
        assert!(matches!(load_ports(&missing), Err(PipesError::Read { .. })));

        let path = ports_file("{\"port\": 7001}");
        assert!(matches!(load_ports(&path), Err(PipesError::Parse { .. })));
    }

    #[tokio::test]
    async fn empty_ports_file_is_an_error() {
        let path = ports_file("[]");
        let err = Pipes::from_ports_file(&path, "127.0.0.1", MultiplexerConfig::default())
            .unwrap_err();
        assert!(matches!(err, PipesError::NoPorts(_)));
    }

    #[tokio::test]
    async fn pipes_open_standard_streams() {
        let pipes = Pipes::open(Endpoint::localhost(1), MultiplexerConfig::default())
            .expect("pipes should open");

        assert_eq!(pipes.stdout().stream_id(), STDOUT);
        assert_eq!(pipes.stderr().stream_id(), STDERR);
        assert_eq!(pipes.logger().stream_id(), LOGGER);
        assert_eq!(pipes.metrics().stream_id(), METRICS);
        assert_eq!(pipes.stream(STDOUT).unwrap(), *pipes.stdout());
        assert!(pipes.stream(0).is_err());

        pipes.stdout().write(b"queued").expect("write");
        assert_eq!(pipes.multiplexer().pending(), 1);
        pipes.multiplexer().shutdown();
    }
}
