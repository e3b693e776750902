use procbus::arbiter::{
    BreakerArbiter, BreakerCommand, CommandOrigin, RelayArbiter, RelayCommand,
};
use procbus::breaker::{BreakerAgent, BREAKER_CYCLE_MS};
use procbus::control::{ControlHandler, RequestKind, ResponseStatus};
use procbus::goose::{GooseBus, GooseFrame};
use procbus::measurement::SharedMeasurementSource;
use procbus::protection::Measurements;
use procbus::relay::{RelayAgent, RELAY_CYCLE_MS};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time;
use tracing::{error, info, warn};

const RELAY_CONTROL_PORT: u16 = 9102;
const BREAKER_CONTROL_PORT: u16 = 9103;
const RELAY_OPERATOR_PORT: u16 = 9082;
const BREAKER_OPERATOR_PORT: u16 = 9081;
const GOOSE_BUS_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("⚡ Process-Bus Substation Cell Simulator");
    println!("========================================");
    println!("   Protection Relay:  PROT_REL_001");
    println!("   Circuit Breaker:   CB_LINE_01_001");

    // Creation order matters: the bus first, then the devices, then the
    // command channels. Teardown runs the same list in reverse.
    let bus = GooseBus::new(GOOSE_BUS_CAPACITY);
    let measurements = SharedMeasurementSource::default();

    let relay = Arc::new(Mutex::new(RelayAgent::new(
        Box::new(bus.transport()),
        Box::new(measurements.clone()),
    )));
    let breaker = Arc::new(Mutex::new(BreakerAgent::new(Box::new(bus.transport()))));

    let (relay_nudge_tx, relay_nudge_rx) = mpsc::unbounded_channel();
    let (breaker_nudge_tx, breaker_nudge_rx) = mpsc::unbounded_channel();
    let relay_arbiter = RelayArbiter::new(relay.lock().await.shared_state(), relay_nudge_tx);
    let breaker_arbiter =
        BreakerArbiter::new(breaker.lock().await.shared_state(), breaker_nudge_tx);

    let (shutdown_tx, _) = broadcast::channel(1);

    let relay_task = tokio::spawn(run_relay(
        Arc::clone(&relay),
        bus.subscribe(),
        relay_nudge_rx,
        shutdown_tx.subscribe(),
    ));
    let breaker_task = tokio::spawn(run_breaker(
        Arc::clone(&breaker),
        bus.subscribe(),
        breaker_nudge_rx,
        shutdown_tx.subscribe(),
    ));

    let mut servers = Vec::new();
    for (port, origin, target) in [
        (
            RELAY_CONTROL_PORT,
            CommandOrigin::Supervisory,
            ChannelTarget::Relay {
                agent: Arc::clone(&relay),
                arbiter: relay_arbiter.clone(),
                measurements: measurements.clone(),
            },
        ),
        (
            RELAY_OPERATOR_PORT,
            CommandOrigin::Operator,
            ChannelTarget::Relay {
                agent: Arc::clone(&relay),
                arbiter: relay_arbiter.clone(),
                measurements: measurements.clone(),
            },
        ),
        (
            BREAKER_CONTROL_PORT,
            CommandOrigin::Supervisory,
            ChannelTarget::Breaker {
                agent: Arc::clone(&breaker),
                arbiter: breaker_arbiter.clone(),
            },
        ),
        (
            BREAKER_OPERATOR_PORT,
            CommandOrigin::Operator,
            ChannelTarget::Breaker {
                agent: Arc::clone(&breaker),
                arbiter: breaker_arbiter.clone(),
            },
        ),
    ] {
        // A device without its command channel is unusable, so a failed
        // bind is fatal for the whole cell.
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        info!(port, origin = origin.as_str(), "control channel listening");
        servers.push(tokio::spawn(run_control_server(listener, origin, target)));
    }

    println!("✅ Cell running - ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    println!("\n🔌 Stopping cell...");

    // Reverse creation order: command channels, then devices, then the bus
    // (dropped with main).
    for server in servers.into_iter().rev() {
        server.abort();
    }
    let _ = shutdown_tx.send(());
    let _ = relay_task.await;
    let _ = breaker_task.await;

    println!("⚡ Substation cell simulator stopped");
    Ok(())
}

async fn run_relay(
    agent: Arc<Mutex<RelayAgent>>,
    mut frames: broadcast::Receiver<GooseFrame>,
    mut nudge: mpsc::UnboundedReceiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = time::interval(Duration::from_millis(RELAY_CYCLE_MS));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let mut agent = agent.lock().await;
                let now_ms = agent.now_ms();
                agent.step(now_ms).await;
            }
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let mut agent = agent.lock().await;
                    let now_ms = agent.now_ms();
                    agent.handle_frame(&frame, now_ms).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "relay fell behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(()) = nudge.recv() => {
                let mut agent = agent.lock().await;
                let now_ms = agent.now_ms();
                agent.publish_now(now_ms).await;
            }
            _ = shutdown.recv() => break,
        }
    }
}

async fn run_breaker(
    agent: Arc<Mutex<BreakerAgent>>,
    mut frames: broadcast::Receiver<GooseFrame>,
    mut nudge: mpsc::UnboundedReceiver<()>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = time::interval(Duration::from_millis(BREAKER_CYCLE_MS));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let mut agent = agent.lock().await;
                let now_ms = agent.now_ms();
                agent.step(now_ms).await;
            }
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    let mut agent = agent.lock().await;
                    let now_ms = agent.now_ms();
                    agent.handle_frame(&frame, now_ms).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "breaker fell behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(()) = nudge.recv() => {
                let mut agent = agent.lock().await;
                let now_ms = agent.now_ms();
                agent.publish_now(now_ms).await;
            }
            _ = shutdown.recv() => break,
        }
    }
}

#[derive(Clone)]
enum ChannelTarget {
    Relay {
        agent: Arc<Mutex<RelayAgent>>,
        arbiter: RelayArbiter,
        measurements: SharedMeasurementSource,
    },
    Breaker {
        agent: Arc<Mutex<BreakerAgent>>,
        arbiter: BreakerArbiter,
    },
}

async fn run_control_server(listener: TcpListener, origin: CommandOrigin, target: ChannelTarget) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!(%addr, origin = origin.as_str(), "client connected");
                let target = target.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, origin, target).await {
                        warn!(error = %e, "client session error");
                    }
                    info!(%addr, "client disconnected");
                });
            }
            Err(e) => {
                error!(error = %e, "failed to accept connection");
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    origin: CommandOrigin,
    target: ChannelTarget,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut handler = ControlHandler::new();

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = dispatch(&mut handler, trimmed, origin, &target).await;
        let json = handler.serialize_response(&response)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }

    Ok(())
}

async fn dispatch(
    handler: &mut ControlHandler,
    raw: &str,
    origin: CommandOrigin,
    target: &ChannelTarget,
) -> procbus::control::ControlResponse {
    let now_ms = match target {
        ChannelTarget::Relay { agent, .. } => agent.lock().await.now_ms(),
        ChannelTarget::Breaker { agent, .. } => agent.lock().await.now_ms(),
    };

    let request = match handler.parse_request(raw) {
        Ok(request) => request,
        Err(e) => {
            return handler.create_response(
                0,
                now_ms,
                ResponseStatus::InvalidRequest,
                Some(&e.to_string()),
            );
        }
    };
    let id = request.id;

    match (&request.kind, target) {
        (RequestKind::Ping, _) => handler.accepted(id, now_ms),

        (RequestKind::Status, ChannelTarget::Relay { agent, .. }) => {
            let snapshot = agent.lock().await.snapshot(now_ms);
            handler.status_reply(id, now_ms, snapshot)
        }
        (RequestKind::Status, ChannelTarget::Breaker { agent, .. }) => {
            let snapshot = agent.lock().await.snapshot(now_ms);
            handler.status_reply(id, now_ms, snapshot)
        }

        (RequestKind::Operate { value }, ChannelTarget::Relay { arbiter, .. })
            if origin == CommandOrigin::Supervisory =>
        {
            let command = if *value {
                RelayCommand::Trip
            } else {
                RelayCommand::Reset
            };
            command_reply(handler, id, now_ms, arbiter.apply(origin, command))
        }
        (RequestKind::Operate { value }, ChannelTarget::Breaker { arbiter, .. })
            if origin == CommandOrigin::Supervisory =>
        {
            let command = if *value {
                BreakerCommand::Open
            } else {
                BreakerCommand::Close
            };
            command_reply(handler, id, now_ms, arbiter.apply(origin, command))
        }

        (RequestKind::ManualTrip, ChannelTarget::Relay { arbiter, .. })
            if origin == CommandOrigin::Operator =>
        {
            command_reply(handler, id, now_ms, arbiter.apply(origin, RelayCommand::Trip))
        }
        (RequestKind::ManualReset, ChannelTarget::Relay { arbiter, .. })
            if origin == CommandOrigin::Operator =>
        {
            command_reply(handler, id, now_ms, arbiter.apply(origin, RelayCommand::Reset))
        }
        (RequestKind::ManualOpen, ChannelTarget::Breaker { arbiter, .. })
            if origin == CommandOrigin::Operator =>
        {
            command_reply(handler, id, now_ms, arbiter.apply(origin, BreakerCommand::Open))
        }
        (RequestKind::ManualClose, ChannelTarget::Breaker { arbiter, .. })
            if origin == CommandOrigin::Operator =>
        {
            command_reply(
                handler,
                id,
                now_ms,
                arbiter.apply(origin, BreakerCommand::Close),
            )
        }

        (
            RequestKind::InjectMeasurements {
                voltage,
                current,
                frequency,
                fault_current,
            },
            ChannelTarget::Relay { measurements, .. },
        ) if origin == CommandOrigin::Operator => {
            measurements.set(Measurements {
                voltage: *voltage,
                current: *current,
                frequency: *frequency,
                fault_current: *fault_current,
            });
            info!(
                "measurement injection applied: I={} f={} If={}",
                current, frequency, fault_current
            );
            handler.accepted(id, now_ms)
        }

        _ => handler.create_response(
            id,
            now_ms,
            ResponseStatus::InvalidRequest,
            Some("request not supported on this channel"),
        ),
    }
}

fn command_reply(
    handler: &ControlHandler,
    id: u32,
    now_ms: u64,
    outcome: Result<(), procbus::arbiter::CommandRejected>,
) -> procbus::control::ControlResponse {
    match outcome {
        Ok(()) => handler.accepted(id, now_ms),
        Err(e) => handler.rejected(id, now_ms, &e.to_string()),
    }
}
