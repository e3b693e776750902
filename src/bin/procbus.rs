use clap::{App, Arg, SubCommand};
use colored::*;
use procbus::control::{ControlRequest, ControlResponse, RequestKind, ResponseStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";

const RELAY_CONTROL_PORT: u16 = 9102;
const BREAKER_CONTROL_PORT: u16 = 9103;
const RELAY_OPERATOR_PORT: u16 = 9082;
const BREAKER_OPERATOR_PORT: u16 = 9081;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("procbus")
        .version("0.1.0")
        .author("Grid Automation Engineering Team")
        .about("⚡ Process-bus substation cell observer and command client")
        .arg(
            Arg::with_name("host")
                .short("H")
                .long("host")
                .value_name("HOST")
                .help("Simulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("device")
                .short("d")
                .long("device")
                .value_name("DEVICE")
                .help("Target device")
                .takes_value(true)
                .possible_values(&["relay", "breaker"])
                .default_value("relay")
                .global(true),
        )
        .arg(
            Arg::with_name("channel")
                .short("c")
                .long("channel")
                .value_name("CHANNEL")
                .help("Command channel (supervisory control or local operator)")
                .takes_value(true)
                .possible_values(&["control", "operator"])
                .default_value("operator")
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(SubCommand::with_name("ping").about("🏓 Test the device's command channel"))
        .subcommand(
            SubCommand::with_name("status")
                .about("📊 Read the device's status snapshot with link supervision"),
        )
        .subcommand(
            SubCommand::with_name("trip")
                .about("🔴 Manual trip on the relay's operator channel"),
        )
        .subcommand(
            SubCommand::with_name("reset")
                .about("🟢 Manual reset on the relay's operator channel"),
        )
        .subcommand(
            SubCommand::with_name("open").about("🔴 Manual open on the breaker's operator channel"),
        )
        .subcommand(
            SubCommand::with_name("close")
                .about("🟢 Manual close on the breaker's operator channel"),
        )
        .subcommand(
            SubCommand::with_name("operate")
                .about("🎛️  Supervisory select/operate on the device's control point")
                .arg(
                    Arg::with_name("value")
                        .help("Operate value (relay: on=trip/off=reset, breaker: on=open/off=close)")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("inject")
                .about("🧪 Inject simulated measurements into the relay feed")
                .arg(
                    Arg::with_name("voltage")
                        .long("voltage")
                        .value_name("KV")
                        .takes_value(true)
                        .default_value("132.0"),
                )
                .arg(
                    Arg::with_name("current")
                        .long("current")
                        .value_name("A")
                        .takes_value(true)
                        .default_value("450.0"),
                )
                .arg(
                    Arg::with_name("frequency")
                        .long("frequency")
                        .value_name("HZ")
                        .takes_value(true)
                        .default_value("50.0"),
                )
                .arg(
                    Arg::with_name("fault-current")
                        .long("fault-current")
                        .value_name("A")
                        .takes_value(true)
                        .default_value("0.0"),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap();
    let device = matches.value_of("device").unwrap();
    let channel = matches.value_of("channel").unwrap();
    let format = matches.value_of("format").unwrap();

    let (kind, channel) = match matches.subcommand() {
        ("ping", _) => (RequestKind::Ping, channel),
        ("status", _) => (RequestKind::Status, channel),
        ("trip", _) => (RequestKind::ManualTrip, "operator"),
        ("reset", _) => (RequestKind::ManualReset, "operator"),
        ("open", _) => (RequestKind::ManualOpen, "operator"),
        ("close", _) => (RequestKind::ManualClose, "operator"),
        ("operate", Some(sub)) => (
            RequestKind::Operate {
                value: sub.value_of("value").unwrap() == "on",
            },
            "control",
        ),
        ("inject", Some(sub)) => (
            RequestKind::InjectMeasurements {
                voltage: sub.value_of("voltage").unwrap().parse()?,
                current: sub.value_of("current").unwrap().parse()?,
                frequency: sub.value_of("frequency").unwrap().parse()?,
                fault_current: sub.value_of("fault-current").unwrap().parse()?,
            },
            "operator",
        ),
        _ => {
            println!(
                "{}",
                "No command specified. Use --help for usage information.".yellow()
            );
            println!("{}", "Quick start:".bright_green());
            println!(
                "  {} Start the cell",
                "cargo run --bin procbus-simulator".bright_cyan()
            );
            println!("  {} Check the relay", "procbus status".bright_cyan());
            println!(
                "  {} Drive a fault",
                "procbus inject --current 3000".bright_cyan()
            );
            return Ok(());
        }
    };

    // Trip/reset land on the relay, open/close on the breaker, regardless of
    // the --device default.
    let device = match kind {
        RequestKind::ManualTrip | RequestKind::ManualReset | RequestKind::InjectMeasurements { .. } => "relay",
        RequestKind::ManualOpen | RequestKind::ManualClose => "breaker",
        _ => device,
    };

    let port = match (device, channel) {
        ("relay", "control") => RELAY_CONTROL_PORT,
        ("relay", _) => RELAY_OPERATOR_PORT,
        (_, "control") => BREAKER_CONTROL_PORT,
        _ => BREAKER_OPERATOR_PORT,
    };

    let request = ControlRequest {
        id: 1,
        timestamp: unix_ms(),
        kind,
    };

    let response = send_request(host, port, &request).await?;
    print_response(&response, device, format);

    Ok(())
}

fn unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

async fn send_request(
    host: &str,
    port: u16,
    request: &ControlRequest,
) -> Result<ControlResponse, Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    let mut stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!(
                "{} Failed to connect to the cell simulator at {}",
                "❌".red(),
                addr.bright_white()
            );
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Simulator is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin procbus-simulator".bright_cyan());
            }
            return Err(e.into());
        }
    };

    let payload = serde_json::to_string(request)?;

    let raw = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        stream.write_all(payload.as_bytes()).await?;
        stream.write_all(b"\n").await?;

        let mut buffer = vec![0; 4096];
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Server closed connection",
            ));
        }
        Ok(String::from_utf8_lossy(&buffer[..n]).to_string())
    })
    .await??;

    Ok(serde_json::from_str(raw.trim())?)
}

fn print_response(response: &ControlResponse, device: &str, format: &str) {
    if format == "json" {
        match serde_json::to_string_pretty(response) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{:?}", response),
        }
        return;
    }

    match response.status {
        ResponseStatus::Accepted => {
            println!("{} {}", "✅".green(), "Accepted".bright_green());
        }
        ResponseStatus::Rejected => {
            println!(
                "{} {} {}",
                "🚫".red(),
                "Rejected:".bright_red(),
                response.message.as_deref().unwrap_or("no transition")
            );
        }
        ResponseStatus::InvalidRequest => {
            println!(
                "{} {} {}",
                "❌".red(),
                "Invalid request:".bright_red(),
                response.message.as_deref().unwrap_or("unsupported")
            );
        }
        ResponseStatus::Error => {
            println!(
                "{} {} {}",
                "❌".red(),
                "Error:".bright_red(),
                response.message.as_deref().unwrap_or("unknown")
            );
        }
    }

    if let Some(snapshot) = &response.snapshot {
        let title = if device == "relay" {
            "Protection Relay"
        } else {
            "Circuit Breaker"
        };
        println!();
        println!("{} {}", "📊".bright_blue(), title.bright_blue().bold());
        println!(
            "   {} {}",
            "Trip:".bright_white(),
            on_off(snapshot.trip_active, "ACTIVE", "normal")
        );
        println!(
            "   {} {}",
            "Breaker:".bright_white(),
            on_off(snapshot.breaker_open, "OPEN", "closed")
        );
        println!(
            "   {} {}",
            "Pickup:".bright_white(),
            on_off(snapshot.pickup_any, "ARMED", "idle")
        );
        println!(
            "   {} {}",
            "Reason:".bright_white(),
            snapshot.trip_reason.as_str()
        );
        if let Some(m) = &snapshot.measurements {
            println!(
                "   {} V={:.1}kV I={:.0}A f={:.3}Hz If={:.0}A",
                "Measured:".bright_white(),
                m.voltage,
                m.current,
                m.frequency,
                m.fault_current
            );
        }
        println!(
            "   {} rx={} ({}) tx={} ({})",
            "Link:".bright_white(),
            snapshot.link.rx_count,
            health(snapshot.link.rx_ok),
            snapshot.link.tx_count,
            health(snapshot.link.tx_ok)
        );
    }
}

fn on_off(value: bool, on: &str, off: &str) -> ColoredString {
    if value {
        on.bright_red().bold()
    } else {
        off.bright_green()
    }
}

fn health(ok: bool) -> ColoredString {
    if ok {
        "OK".bright_green()
    } else {
        "STALE".bright_red().bold()
    }
}
