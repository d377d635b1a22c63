use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use muxpipe_transport::LOCALHOST;
use tracing::{info, warn};

use crate::connection::ConnectionFactory;
use crate::demultiplexer::{DemuxConfig, Demultiplexer};
use crate::error::Result;

/// Demultiplexers keyed by the port they listen on.
#[derive(Debug)]
pub struct Registry {
    host: String,
    config: DemuxConfig,
    receivers: Mutex<HashMap<u16, Demultiplexer>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A registry whose receivers listen on the loopback interface.
    pub fn new() -> Self {
        Self::with_config(LOCALHOST, DemuxConfig::default())
    }

    pub fn with_config(host: impl Into<String>, config: DemuxConfig) -> Self {
        Self {
            host: host.into(),
            config,
            receivers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u16, Demultiplexer>> {
        self.receivers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a receiver on `port` (`0` for ephemeral) and return the bound port.
    pub async fn listen<F>(&self, port: u16, factory: F) -> Result<u16>
    where
        F: ConnectionFactory,
    {
        let demux = Demultiplexer::bind(&self.host, port, factory, self.config.clone()).await?;
        let port = demux.port();
        if let Some(previous) = self.lock().insert(port, demux) {
            previous.close();
        }
        info!(port, "receiver registered");
        Ok(port)
    }

    /// Stop accepting on `port`. Connections already accepted keep running.
    ///
    /// Returns `false` if no receiver is registered on `port`.
    pub fn close(&self, port: u16) -> bool {
        match self.lock().remove(&port) {
            Some(demux) => {
                demux.close();
                info!(port, "receiver closed");
                true
            }
            None => {
                warn!(port, "no receiver registered on port");
                false
            }
        }
    }

    /// Registered ports, ascending.
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.lock().keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Live connections across every receiver.
    pub fn connections(&self) -> usize {
        self.lock().values().map(Demultiplexer::connections).sum()
    }

    /// Close every receiver and disconnect every live connection.
    pub fn shutdown(&self) {
        let receivers: Vec<(u16, Demultiplexer)> = self.lock().drain().collect();
        for (port, demux) in receivers {
            demux.shutdown();
            info!(port, "receiver shut down");
        }
    }
}
