//! # BPP Node
//!
//! Runs one role of the washable video transport over UDP:
//!
//! - `send`: chunk an H.264 SVC Annex-B file into BPP packets
//! - `relay`: trim packets to a bandwidth target and forward them
//! - `receive`: reassemble packets and write the decodable NAL units
//!
//! ## Usage
//!
//! ```bash
//! bpp-node send --input stream.h264 --dest 127.0.0.1:6000 --pace-us 500
//! bpp-node relay --bind 0.0.0.0:6000 --dest 127.0.0.1:7000 --bandwidth 2000000
//! bpp-node receive --bind 0.0.0.0:7000 --output out.h264 --stats-json rx.json
//! ```
//!
//! All roles read stream parameters from `--config <file.toml>`. While the
//! relay runs, `bandwidth <bps>` on stdin retunes its target.

mod transport;

use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bpp_transport::config::BppConfig;
use bpp_transport::nal::AnnexBSource;
use bpp_transport::receiver::Receiver;
use bpp_transport::sender::Sender;
use bpp_transport::trim::{BandwidthControl, Trimmer};
use crossbeam_channel::RecvTimeoutError;
use quanta::Instant;

use crate::transport::{Endpoint, UdpEndpoint};

const STATS_INTERVAL: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const QUEUE_CAPACITY: usize = 4096;

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    // ── Parse CLI ───────────────────────────────────────────────
    let args = parse_args()?;
    let config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            BppConfig::from_toml_str(&text)?
        }
        None => BppConfig::default(),
    };

    tracing::info!(
        mode = ?args.mode,
        bind = %args.bind,
        dest = ?args.dest,
        layers = config.sender.chunker.layers,
        max_packet_size = config.sender.chunker.max_packet_size,
        "bpp-node starting"
    );

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })?;
    }

    let stats = match args.mode {
        Mode::Send => run_send(&args, &config, &running)?,
        Mode::Relay => run_relay(&args, &config, &running)?,
        Mode::Receive => run_receive(&args, &config, &running)?,
    };

    // ── Stats dump ──────────────────────────────────────────────
    let json = serde_json::to_string_pretty(&stats)?;
    match &args.stats_json {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(path = %path.display(), "stats written");
        }
        None => tracing::info!(stats = %json, "final stats"),
    }

    tracing::info!("bpp-node stopped");
    Ok(())
}

// ─── Roles ──────────────────────────────────────────────────────────────────

fn run_send(args: &Args, config: &BppConfig, running: &AtomicBool) -> anyhow::Result<serde_json::Value> {
    let input = args
        .input
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("send requires --input"))?;
    let dest = args.dest.ok_or_else(|| anyhow::anyhow!("send requires --dest"))?;

    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let source = AnnexBSource::from_reader(file)?;
    tracing::info!(nals = source.remaining(), "input loaded");

    let mut endpoint = UdpEndpoint::bind(args.bind, Some(dest), QUEUE_CAPACITY)?;
    let mut sender = Sender::new(source, config.sender.clone());
    let mut last_stats_log = Instant::now();

    while running.load(Ordering::Relaxed) {
        let Some(packet) = sender.next_packet()? else {
            break;
        };
        endpoint.send(packet.data)?;

        if args.pace_us > 0 {
            std::thread::sleep(Duration::from_micros(args.pace_us));
        }

        if Instant::now().duration_since(last_stats_log) >= STATS_INTERVAL {
            let stats = sender.stats();
            tracing::info!(
                packets = stats.packets_sent,
                bytes = stats.bytes_sent,
                video_units = stats.video_units,
                overhead = stats.overhead_ratio(),
                "sender stats"
            );
            last_stats_log = Instant::now();
        }
    }

    endpoint.stop();
    Ok(serde_json::to_value(sender.stats())?)
}

fn run_relay(args: &Args, config: &BppConfig, running: &AtomicBool) -> anyhow::Result<serde_json::Value> {
    let dest = args.dest.ok_or_else(|| anyhow::anyhow!("relay requires --dest"))?;
    let mut endpoint = UdpEndpoint::bind(args.bind, Some(dest), QUEUE_CAPACITY)?;

    let control = BandwidthControl::new(args.bandwidth_bps.unwrap_or(config.trimmer.bandwidth_bps));
    spawn_bandwidth_console(control.clone())?;

    let mut trimmer = Trimmer::new(control, config.trimmer.policy);
    let mut last_stats_log = Instant::now();

    while running.load(Ordering::Relaxed) {
        match endpoint.recv_timeout(POLL_INTERVAL) {
            Ok(data) => match trimmer.process(data.clone()) {
                Ok(decision) => {
                    if let Some(out) = decision.apply(data) {
                        endpoint.send(out)?;
                    }
                }
                Err(e) => tracing::debug!(error = %e, "undecodable packet discarded"),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if Instant::now().duration_since(last_stats_log) >= STATS_INTERVAL {
            let stats = trimmer.stats();
            tracing::info!(
                bandwidth_bps = trimmer.control().bandwidth(),
                packets_in = stats.packets_in,
                trimmed = stats.packets_trimmed,
                dropped = stats.packets_dropped,
                washed_bytes = stats.bytes_washed,
                wash_ratio = stats.wash_ratio(),
                overflow = endpoint.overflow(),
                "relay stats"
            );
            last_stats_log = Instant::now();
        }
    }

    endpoint.stop();
    Ok(serde_json::to_value(trimmer.stats())?)
}

fn run_receive(args: &Args, config: &BppConfig, running: &AtomicBool) -> anyhow::Result<serde_json::Value> {
    let mut endpoint = UdpEndpoint::bind(args.bind, None, QUEUE_CAPACITY)?;
    let mut receiver = Receiver::new(config.receiver.clone());
    let mut sink = match &args.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => None,
    };
    let mut last_stats_log = Instant::now();

    while running.load(Ordering::Relaxed) {
        match endpoint.recv_timeout(POLL_INTERVAL) {
            Ok(data) => {
                if let Err(e) = receiver.receive(data) {
                    tracing::debug!(error = %e, "undecodable packet discarded");
                }
                write_nals(&mut receiver, sink.as_mut())?;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if Instant::now().duration_since(last_stats_log) >= STATS_INTERVAL {
            let stats = receiver.stats();
            tracing::info!(
                packets = stats.packets_received,
                delivered = stats.nals_delivered,
                washed = stats.nals_washed,
                lost = stats.nals_lost,
                suppressed = stats.nals_suppressed,
                missing = stats.missing_events,
                "receiver stats"
            );
            last_stats_log = Instant::now();
        }
    }

    endpoint.stop();
    receiver.finish();
    write_nals(&mut receiver, sink.as_mut())?;
    if let Some(sink) = sink.as_mut() {
        sink.flush()?;
    }
    Ok(serde_json::to_value(receiver.stats())?)
}

fn write_nals(receiver: &mut Receiver, sink: Option<&mut BufWriter<File>>) -> anyhow::Result<()> {
    let nals = receiver.drain_nals();
    if let Some(sink) = sink {
        for nal in &nals {
            sink.write_all(nal.as_bytes())?;
        }
    }
    Ok(())
}

/// Reads `bandwidth <bps>` lines from stdin and retunes the relay.
fn spawn_bandwidth_console(control: BandwidthControl) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("bandwidth-console".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                let mut words = line.split_whitespace();
                match (words.next(), words.next().map(str::parse::<u64>)) {
                    (Some("bandwidth"), Some(Ok(bps))) => {
                        control.adjust_bandwidth(bps);
                    }
                    (None, _) => {}
                    _ => tracing::warn!(%line, "expected `bandwidth <bps>`"),
                }
            }
        })?;
    Ok(())
}

// ─── CLI Parsing ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Send,
    Relay,
    Receive,
}

struct Args {
    mode: Mode,
    config: Option<PathBuf>,
    bind: SocketAddr,
    dest: Option<SocketAddr>,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    bandwidth_bps: Option<u64>,
    pace_us: u64,
    stats_json: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    parse_args_from(std::env::args().skip(1).collect())
}

fn parse_args_from(args: Vec<String>) -> anyhow::Result<Args> {
    let mode = match args.first().map(String::as_str) {
        Some("send") => Mode::Send,
        Some("relay") => Mode::Relay,
        Some("receive") => Mode::Receive,
        Some(other) => anyhow::bail!("unknown mode '{}' (expected send, relay or receive)", other),
        None => anyhow::bail!("usage: bpp-node <send|relay|receive> [options]"),
    };

    let mut parsed = Args {
        mode,
        config: None,
        bind: "0.0.0.0:0".parse()?,
        dest: None,
        input: None,
        output: None,
        bandwidth_bps: None,
        pace_us: 0,
        stats_json: None,
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        i += 1;
        let val = args
            .get(i)
            .ok_or_else(|| anyhow::anyhow!("{} requires a value", flag))?;
        match flag {
            "--config" | "-c" => parsed.config = Some(PathBuf::from(val)),
            "--bind" | "-b" => {
                parsed.bind = val
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid bind address '{}': {}", val, e))?;
            }
            "--dest" | "-d" => {
                parsed.dest = Some(
                    val.parse()
                        .map_err(|e| anyhow::anyhow!("invalid destination '{}': {}", val, e))?,
                );
            }
            "--input" | "-i" => parsed.input = Some(PathBuf::from(val)),
            "--output" | "-o" => parsed.output = Some(PathBuf::from(val)),
            "--bandwidth" => {
                parsed.bandwidth_bps = Some(
                    val.parse()
                        .map_err(|e| anyhow::anyhow!("invalid bandwidth '{}': {}", val, e))?,
                );
            }
            "--pace-us" => {
                parsed.pace_us = val
                    .parse()
                    .map_err(|e| anyhow::anyhow!("invalid pace '{}': {}", val, e))?;
            }
            "--stats-json" => parsed.stats_json = Some(PathBuf::from(val)),
            other => anyhow::bail!("unknown option '{}'", other),
        }
        i += 1;
    }

    Ok(parsed)
}
