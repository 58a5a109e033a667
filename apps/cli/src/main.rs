use clap::Parser;
use firmata_core::{
    FinderConfig, FirmataSession, SerialTransport, SessionConfig, SessionFinder,
    available_port_names,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "firmata",
    author,
    version,
    about = "Firmata host tool (Pure Rust)",
    long_about = "Discovers Firmata devices on serial ports, prints board information, and monitors pin telemetry."
)]
struct Args {
    /// Serial port to use (e.g. /dev/ttyACM0 or COM3); auto-discover if omitted
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate when --port is given
    #[arg(short, long, default_value_t = 57_600)]
    baud: u32,

    /// Reply timeout in milliseconds
    #[arg(long, default_value_t = 2_000)]
    timeout_ms: u64,

    /// Delay after opening the port, for boards that reset on open
    #[arg(long, default_value_t = 0)]
    startup_delay_ms: u64,

    /// List candidate serial ports and exit
    #[arg(short, long)]
    list: bool,

    /// Stream analog and digital events after connecting
    #[arg(short, long)]
    monitor: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing subscriber
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::WARN.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if args.list {
        for name in available_port_names() {
            println!("{name}");
        }
        return Ok(());
    }

    let session = connect(&args)?;
    print_board_info(&session)?;

    if args.monitor {
        monitor(&session)?;
    }

    Ok(())
}

fn connect(args: &Args) -> anyhow::Result<FirmataSession> {
    if let Some(port) = &args.port {
        info!(port = %port, baud = args.baud, "connecting");
        let transport = Arc::new(SerialTransport::new(port, args.baud));
        if args.startup_delay_ms > 0 {
            use firmata_core::Transport;
            transport.open()?;
            std::thread::sleep(std::time::Duration::from_millis(args.startup_delay_ms));
        }
        return Ok(FirmataSession::open(
            transport,
            SessionConfig::with_timeout_ms(args.timeout_ms),
        )?);
    }

    eprintln!("Probing serial ports for a Firmata device...");
    let finder = SessionFinder::new(FinderConfig {
        attempt_timeout_ms: args.timeout_ms,
        startup_delay_ms: args.startup_delay_ms,
        ..Default::default()
    });
    finder
        .find()
        .ok_or_else(|| anyhow::anyhow!("no Firmata device found on any serial port"))
}

fn print_board_info(session: &FirmataSession) -> anyhow::Result<()> {
    let firmware = session.query_firmware()?;
    println!("Firmware:  {firmware}");

    let version = session.query_protocol_version()?;
    println!("Protocol:  {version}");

    let capability = session.query_capability()?;
    println!("Pins:      {}", capability.pins.len());
    for pin in &capability.pins {
        let modes: Vec<String> = pin
            .modes
            .iter()
            .map(|(mode, resolution)| format!("{mode}({resolution})"))
            .collect();
        println!("  pin {:>3}: {}", pin.pin, modes.join(", "));
    }

    let mapping = session.query_analog_mapping()?;
    for (pin, channel) in &mapping.channels {
        println!("  A{channel} -> pin {pin}");
    }

    Ok(())
}

fn monitor(session: &FirmataSession) -> anyhow::Result<()> {
    // Ask the board for everything it can report.
    for channel in 0..16 {
        session.report_analog(channel, true)?;
    }
    for port in 0..16 {
        session.report_digital(port, true)?;
    }

    let analog = session.analog_events();
    let digital = session.digital_events();

    std::thread::scope(|scope| {
        scope.spawn(move || {
            for state in digital.iter() {
                println!("digital port {} = {:08b}", state.port, state.pins);
            }
        });
        eprintln!("Monitoring (ctrl-c to stop)...");
        for state in analog.iter() {
            println!("analog A{} = {}", state.channel, state.level);
        }
    });

    Ok(())
}
