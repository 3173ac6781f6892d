// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! roostd: the roost controller daemon.
//!
//! Wires the collaborators into one event loop: a Unix-socket peer
//! transport, the CIB seam, a 100 ms timer tick, and the (stubbed) local
//! executor all feed events into the controller; effects flow back out.
//! All durable state lives in the CIB.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::Result;
use clap::Parser;
use roost_controld::{
    write_with_retry, CibStore, Controller, ControllerConfig, Dispatch, Effect, Event, MemCib,
};
use roost_core::{record_op_history, schedule_cib};
use roost_proto::{decode_frame, encode_frame, PeerMessage, WireError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Exit codes, mirroring sysexits where one fits.
const EXIT_OK: i32 = 0;
const EXIT_USAGE: i32 = 64;
const EXIT_UNAVAILABLE: i32 = 69;
const EXIT_SOFTWARE: i32 = 70;
const EXIT_IO: i32 = 74;

#[derive(Parser, Debug)]
#[command(
    name = "roostd",
    about = "Roost cluster controller daemon",
    disable_version_flag = true
)]
struct Args {
    /// Increase verbosity; repeatable.
    #[arg(short = 'V', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Run a sanity check of the policy engine and exit.
    #[arg(short = 's', long = "sanity")]
    sanity: bool,

    /// Node uuid used for election identity.
    #[arg(long, default_value = "1")]
    node_uuid: String,

    /// Node name used for dispatch identity.
    #[arg(long, default_value = "localnode")]
    node_name: String,

    /// Unix socket path for peer connections.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Milliseconds between timer ticks.
    #[arg(long, default_value_t = 100)]
    tick_interval: u64,
}

/// Daemon settings merged from flags and environment.
#[derive(Debug)]
struct DaemonConfig {
    verbosity: u8,
    logfile: Option<PathBuf>,
    cluster_type: Option<String>,
    fail_fast: bool,
    socket: PathBuf,
    tick_interval: Duration,
}

impl DaemonConfig {
    fn from_args(args: &Args) -> Self {
        let debug_env = std::env::var("HA_debug").map(|v| v == "1").unwrap_or(false);
        Self {
            verbosity: args.verbose + u8::from(debug_env),
            logfile: std::env::var_os("HA_logfile").map(PathBuf::from),
            cluster_type: std::env::var("HA_cluster_type").ok(),
            fail_fast: std::env::var("PCMK_fail_fast")
                .map(|v| v == "yes" || v == "1")
                .unwrap_or(false),
            socket: args.socket.clone().unwrap_or_else(default_socket_path),
            tick_interval: Duration::from_millis(args.tick_interval),
        }
    }

    fn log_level(&self) -> Level {
        match self.verbosity {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

/// Prefers a per-user runtime dir and falls back to `/tmp`.
fn default_socket_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("roostd.sock")
}

/// A minimal self-contained cluster used by `-s`.
const SANITY_CIB: &str = r#"<cib admin_epoch="0" epoch="1" num_updates="0">
  <configuration>
    <nodes><node id="1" uname="localnode"/></nodes>
    <resources>
      <primitive id="sanity" class="ocf" provider="pacemaker" type="Dummy"/>
    </resources>
    <constraints/>
  </configuration>
  <status>
    <node_state id="1" uname="localnode" in_ccm="true" crmd="online" join="member"/>
  </status>
</cib>"#;

fn sanity_check() -> i32 {
    match schedule_cib(SANITY_CIB, 0, SystemTime::now()) {
        Ok(graph) if graph.topological_order().is_some() => {
            info!(synapses = graph.synapses.len(), "sanity check passed");
            EXIT_OK
        }
        Ok(_) => {
            warn!("sanity check produced a cyclic graph");
            EXIT_SOFTWARE
        }
        Err(err) => {
            warn!(%err, "sanity check failed to schedule");
            EXIT_SOFTWARE
        }
    }
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            // clap prints help/usage itself; map failures to EX_USAGE.
            let code = if err.use_stderr() { EXIT_USAGE } else { EXIT_OK };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    let config = DaemonConfig::from_args(&args);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level())
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        std::process::exit(EXIT_SOFTWARE);
    }

    if args.sanity {
        std::process::exit(sanity_check());
    }

    if let Some(logfile) = &config.logfile {
        debug!(path = %logfile.display(), "HA_logfile requested (stdout logging active)");
    }
    if let Some(cluster_type) = &config.cluster_type {
        info!(%cluster_type, "cluster type");
    }

    let code = match run_daemon(&args, &config) {
        Ok(code) => code,
        Err(err) => {
            warn!(%err, "daemon failed");
            EXIT_IO
        }
    };
    std::process::exit(code);
}

#[tokio::main]
async fn run_daemon(args: &Args, config: &DaemonConfig) -> Result<i32> {
    info!(
        uuid = %args.node_uuid,
        name = %args.node_name,
        socket = %config.socket.display(),
        "starting roost controller"
    );

    // The cluster CIB service attaches behind the CibStore seam; until a
    // transport for it is configured the daemon runs against the
    // in-memory store, which is enough for single-node bring-up.
    let cib: Arc<MemCib> = Arc::new(MemCib::new(SANITY_CIB));
    let mut controller_config = ControllerConfig::new(&args.node_uuid, &args.node_name);
    controller_config.fail_fast = config.fail_fast;
    let mut controller = Controller::new(controller_config, cib.clone());

    let (event_tx, mut event_rx) = mpsc::channel::<Event>(256);

    // Peer transport: accept framed connections, forward decoded messages.
    let _ = std::fs::remove_file(&config.socket);
    let listener = match UnixListener::bind(&config.socket) {
        Ok(listener) => listener,
        Err(err) => {
            warn!(%err, "cannot bind peer socket");
            return Ok(EXIT_UNAVAILABLE);
        }
    };
    let (peer_tx, mut peer_rx) = mpsc::channel::<Vec<u8>>(256);
    let accept_events = event_tx.clone();
    tokio::spawn(async move {
        let mut conns: HashMap<u64, mpsc::Sender<Vec<u8>>> = HashMap::new();
        let mut next_conn = 0u64;
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let Ok((stream, _)) = accepted else { break };
                    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(64);
                    conns.insert(next_conn, out_tx);
                    next_conn += 1;
                    tokio::spawn(serve_peer(stream, accept_events.clone(), out_rx));
                }
                outbound = peer_rx.recv() => {
                    let Some(frame) = outbound else { break };
                    conns.retain(|_, tx| tx.try_send(frame.clone()).is_ok());
                }
            }
        }
    });

    // CIB watch: epoch bumps become events.
    let mut cib_watch = cib.watch();
    let cib_events = event_tx.clone();
    tokio::spawn(async move {
        while cib_watch.changed().await.is_ok() {
            let epoch = *cib_watch.borrow();
            if cib_events.send(Event::CibUpdated { epoch }).await.is_err() {
                break;
            }
        }
    });

    // Timer tick.
    let tick_events = event_tx.clone();
    let tick_interval = config.tick_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            if tick_events.send(Event::Tick).await.is_err() {
                break;
            }
        }
    });

    // Operator shutdown.
    let signal_events = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = signal_events.send(Event::Shutdown).await;
        }
    });

    event_tx.send(Event::Startup).await?;

    // The single-threaded cooperative loop: events in arrival order.
    while let Some(event) = event_rx.recv().await {
        let effects = controller.handle_event(event, Instant::now());
        for effect in effects {
            match effect {
                Effect::Send(msg) => match encode_frame(&msg) {
                    Ok(frame) => {
                        let _ = peer_tx.send(frame).await;
                    }
                    Err(err) => warn!(%err, "dropping unencodable peer message"),
                },
                Effect::LocalDispatch(dispatch) => {
                    run_local_action(&dispatch, &event_tx).await;
                }
                Effect::ComputePolicy {
                    epoch,
                    transition_id,
                } => {
                    debug!(?epoch, transition_id, "policy engine invoked");
                    let (_, doc) = cib.snapshot();
                    let events = event_tx.clone();
                    // The policy engine is pure; run it off-loop so the
                    // tick budget is never exceeded.
                    tokio::task::spawn_blocking(move || {
                        match schedule_cib(&doc, transition_id, SystemTime::now()) {
                            Ok(graph) => {
                                let _ = events.blocking_send(Event::PolicyComputed {
                                    graph: Box::new(graph),
                                });
                            }
                            Err(err) => {
                                warn!(%err, "policy computation failed");
                                let _ = events.blocking_send(Event::PolicyFailed {
                                    error: err.to_string(),
                                });
                            }
                        }
                    });
                }
                Effect::PersistCib { records } => {
                    let outcome = write_with_retry(
                        cib.as_ref(),
                        |doc| {
                            record_op_history(doc, &records).unwrap_or_else(|err| {
                                warn!(%err, "cannot patch operation history; leaving document unchanged");
                                doc.to_string()
                            })
                        },
                        8,
                    )
                    .await;
                    match outcome {
                        Ok(epoch) => {
                            debug!(?epoch, records = records.len(), "operation history recorded");
                        }
                        Err(err) => warn!(%err, "operation history write failed"),
                    }
                }
                Effect::Exit { code } => {
                    info!(code, "controller requested exit");
                    return Ok(code);
                }
            }
        }
    }
    Ok(EXIT_OK)
}

/// Local executor seam. The real resource-agent executor attaches here;
/// this build logs the operation and reports success so single-node
/// bring-up can be exercised end to end.
async fn run_local_action(dispatch: &Dispatch, events: &mpsc::Sender<Event>) {
    info!(
        synapse = dispatch.synapse,
        op = %dispatch.action.uuid,
        node = dispatch.action.on_node.as_deref().unwrap_or("-"),
        "executing local action"
    );
    let _ = events
        .send(Event::ActionResult {
            synapse: dispatch.synapse,
            ok: true,
        })
        .await;
}

/// Per-connection read/write pump for one peer.
async fn serve_peer(
    mut stream: UnixStream,
    events: mpsc::Sender<Event>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
) {
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        tokio::select! {
            read = stream.read(&mut chunk) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                buf.extend_from_slice(&chunk[..n]);
                loop {
                    match decode_frame(&buf) {
                        Ok((msg, used)) => {
                            buf.drain(..used);
                            forward_peer_message(msg, &events).await;
                        }
                        Err(WireError::Incomplete { .. }) => break,
                        Err(err) => {
                            warn!(%err, "corrupt peer frame; closing connection");
                            return;
                        }
                    }
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if stream.write_all(&frame).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn forward_peer_message(msg: PeerMessage, events: &mpsc::Sender<Event>) {
    debug!(from = %msg.from, subtype = ?msg.subtype, "peer message");
    let _ = events.send(Event::Peer(msg)).await;
}
