use std::fs;

use muxpipe::pipes::{load_ports, PipesError, DEFAULT_PORTS_FILE};
use muxpipe_frame::METRICS;
use muxpipe_metrics::MetricsRegistry;
use muxpipe_peer::{Multiplexer, MultiplexerConfig, StreamHandle};
use muxpipe_transport::Endpoint;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{
    io_error, metrics_error, peer_error, pipes_error, transport_error, CliError, CliResult,
    SUCCESS, USAGE,
};
use crate::output::{print_send_summary, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let endpoint = resolve_endpoint(&args)?;
    let metrics = parse_metrics(&args.metrics)?;
    let payload = resolve_payload(&args)?;

    let config = MultiplexerConfig {
        dial_timeout: timeout,
        identity: args.identity.to_config(),
        ..MultiplexerConfig::default()
    };
    let mux = Multiplexer::open(endpoint.clone(), config);
    let result = send_all(&mux, &args, payload, &metrics).await;
    let result = match result {
        Ok(()) => mux
            .flush(timeout)
            .await
            .map_err(|err| peer_error("flush failed", err)),
        Err(err) => Err(err),
    };
    let stats = mux.stats();
    mux.shutdown();
    result?;

    debug!(%endpoint, ?stats, "send complete");
    print_send_summary(&endpoint.to_string(), args.stream, stats, format);
    Ok(SUCCESS)
}

async fn send_all(
    mux: &Multiplexer,
    args: &SendArgs,
    payload: Option<Vec<u8>>,
    metrics: &[(String, String)],
) -> CliResult<()> {
    let handle = mux
        .new_writer(args.stream)
        .map_err(|err| peer_error("invalid stream", err))?;

    if args.stdin {
        send_stdin_lines(&handle).await?;
    } else if let Some(payload) = payload {
        handle
            .write(&payload)
            .map_err(|err| peer_error("send failed", err))?;
    }

    if !metrics.is_empty() {
        let sink = mux
            .new_writer(METRICS)
            .map_err(|err| peer_error("invalid stream", err))?;
        publish_metrics(&sink, metrics)?;
    }
    Ok(())
}

async fn send_stdin_lines(handle: &StreamHandle) -> CliResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|err| io_error("failed reading stdin", err))?
    {
        handle
            .write(line.as_bytes())
            .map_err(|err| peer_error("send failed", err))?;
    }
    Ok(())
}

fn publish_metrics(sink: &StreamHandle, metrics: &[(String, String)]) -> CliResult<()> {
    let registry = MetricsRegistry::new();
    for (id, value) in metrics {
        let metric = registry
            .metric(id.as_str(), id.as_str(), "")
            .map_err(|err| metrics_error("invalid metric", err))?;
        metric
            .post(value.as_str())
            .map_err(|err| metrics_error("invalid metric", err))?;
    }
    registry
        .publish(sink, true)
        .map_err(|err| metrics_error("publish failed", err))?;
    Ok(())
}

fn resolve_endpoint(args: &SendArgs) -> CliResult<Endpoint> {
    if let Some(endpoint) = &args.endpoint {
        return endpoint
            .parse()
            .map_err(|err| transport_error("invalid endpoint", err));
    }

    let path = args
        .ports_file
        .clone()
        .unwrap_or_else(|| DEFAULT_PORTS_FILE.into());
    let ports = load_ports(&path).map_err(|err| pipes_error("no collector", err))?;
    let port = ports
        .first()
        .copied()
        .ok_or_else(|| pipes_error("no collector", PipesError::NoPorts(path)))?;
    Ok(Endpoint::new(args.host.as_str(), port))
}

/// `None` when nothing but metrics should be sent.
fn resolve_payload(args: &SendArgs) -> CliResult<Option<Vec<u8>>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(Some(json.as_bytes().to_vec()));
    }
    if let Some(data) = &args.data {
        return Ok(Some(data.as_bytes().to_vec()));
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map(Some)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    if args.stdin || !args.metrics.is_empty() {
        return Ok(None);
    }
    Ok(Some(Vec::new()))
}

fn parse_metrics(specs: &[String]) -> CliResult<Vec<(String, String)>> {
    specs
        .iter()
        .map(|spec| match spec.split_once('=') {
            Some((id, value)) if !id.trim().is_empty() => {
                Ok((id.trim().to_string(), value.to_string()))
            }
            _ => Err(CliError::new(
                USAGE,
                format!("--metric expects ID=VALUE, got {spec:?}"),
            )),
        })
        .collect()
}
