//! # Labelfeed CLI
//!
//! Command-line interface for the serial label printing station.
//!
//! ## Usage
//!
//! ```bash
//! # Run the station with the operator console
//! labelfeed run --port /dev/ttyUSB0 --start
//!
//! # Hold records for review instead of printing them immediately
//! labelfeed run --mode queue
//!
//! # Check how a line from the fixture is parsed
//! labelfeed parse '##ATS542912923728|866988074133496|286019876543210|8991101200003204510|AA:BB:CC:DD:EE:FF##'
//!
//! # List serial ports
//! labelfeed ports
//!
//! # Print an archived label again
//! labelfeed reprint save/zpl_outputs/ATS542912923728_20251014_091201.zpl
//!
//! # Show the primary label for the next tracking number
//! labelfeed template
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use labelfeed::{
    LabelfeedError, ModeController, Station, StationHandle,
    audit,
    config::{BackendConfig, Config},
    console::{self, ConsoleCommand},
    controller::{CommandReply, Mode, OperatorCommand},
    dispatch::Dispatcher,
    ingest::ByteSource,
    logging,
    parser,
    protocol::{tspl, zpl},
    record::{DeviceRecord, Fragment},
    template::{LabelFormat, LabelTemplate, PlaceholderRenderer, Renderer},
    tracking::TrackingAllocator,
    transport::{self, SerialSource},
};

/// Fragment used to preview templates
const SAMPLE_FRAGMENT: &str =
    "##ATS542912923728|866988074133496|286019876543210|8991101200003204510|AA:BB:CC:DD:EE:FF##";

/// Labelfeed - serial-to-label printing station
#[derive(Parser, Debug)]
#[command(name = "labelfeed")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the station with an operator console on stdin
    Run {
        /// Serial port of the test fixture
        #[arg(long)]
        port: Option<String>,

        /// Serial baud rate
        #[arg(long)]
        baud: Option<u32>,

        /// Start in auto or queue mode
        #[arg(long)]
        mode: Option<Mode>,

        /// Primary printer device path
        #[arg(long, value_name = "DEVICE")]
        primary: Option<PathBuf>,

        /// Secondary (serial label) printer device path
        #[arg(long, value_name = "DEVICE")]
        secondary: Option<PathBuf>,

        /// Do not print serial labels
        #[arg(long)]
        no_secondary: bool,

        /// Start reading the serial port right away
        #[arg(long)]
        start: bool,
    },

    /// Parse one fragment and print the fields as JSON
    Parse {
        fragment: String,

        /// Canonical serial prefix
        #[arg(long)]
        prefix: Option<String>,
    },

    /// List serial ports
    Ports,

    /// Send an archived label payload to the primary printer again
    Reprint {
        file: PathBuf,

        /// Primary printer device path
        #[arg(long, value_name = "DEVICE")]
        primary: Option<PathBuf>,
    },

    /// Show the primary label rendered for the next tracking number
    Template,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), LabelfeedError> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            port,
            baud,
            mode,
            primary,
            secondary,
            no_secondary,
            start,
        } => {
            if let Some(port) = port {
                config.serial.port = port;
            }
            if let Some(baud) = baud {
                config.serial.baud_rate = baud;
            }
            if let Some(mode) = mode {
                config.run.mode = mode;
            }
            if let Some(path) = primary {
                config.print.primary = BackendConfig::Device { path };
            }
            if let Some(path) = secondary {
                config.print.secondary = Some(BackendConfig::Device { path });
            }
            if no_secondary {
                config.print.secondary_enabled = false;
            }
            config.validate()?;
            run_station(config, start).await
        }

        Commands::Parse { fragment, prefix } => {
            if let Some(prefix) = prefix {
                config.parser.serial_prefix = prefix;
            }
            let parser = config.parser.parser();
            let fields = parser.parse(&fragment)?;
            let json = serde_json::to_string_pretty(&fields).map_err(std::io::Error::from)?;
            println!("{}", json);
            if let Some(name) = parser.matched_by(&fragment) {
                println!("matched by: {}", name);
            }
            Ok(())
        }

        Commands::Ports => {
            let ports = transport::list_ports()?;
            if ports.is_empty() {
                println!("No serial ports found.");
            }
            for port in ports {
                println!("  {:<20} {}", port.name, port.description);
            }
            Ok(())
        }

        Commands::Reprint { file, primary } => {
            if let Some(path) = primary {
                config.print.primary = BackendConfig::Device { path };
            }
            reprint(&config, file).await
        }

        Commands::Template => show_template(&config),
    }
}

// ============================================================================
// RUN
// ============================================================================

fn build_dispatcher(config: &Config) -> Result<Dispatcher, LabelfeedError> {
    let mut dispatcher = Dispatcher::new(
        config.print.primary.build(&config.audit.archive_extension)?,
        Arc::new(PlaceholderRenderer),
        config.print.template()?,
    );
    if let Some(secondary) = &config.print.secondary {
        dispatcher = dispatcher.with_secondary(secondary.build("tspl")?, config.print.stock()?);
        dispatcher.set_secondary_enabled(config.print.secondary_enabled);
    }
    Ok(dispatcher)
}

async fn run_station(config: Config, start: bool) -> Result<(), LabelfeedError> {
    let parser = config.parser.parser();
    let history = audit::scan(&config.audit.csv_path, &parser)?;
    let last_tracking = history.max_tracking_number();
    let allocator = Arc::new(TrackingAllocator::seeded(
        history.tracking_numbers.iter().copied(),
        config.tracking.base,
    ));
    let core = ModeController::new(build_dispatcher(&config)?, config.audit.open()?, allocator)
        .with_mode(config.run.mode)
        .with_duplicate_policy(config.run.duplicate_policy, history.serial_numbers);

    let serial = config.serial.clone();
    let station = Station::spawn(
        core,
        parser,
        serial.reader_settings(),
        move || {
            SerialSource::open(&serial.port, serial.baud_rate, serial.read_timeout())
                .map(|source| Box::new(source) as Box<dyn ByteSource>)
        },
    )?;
    let handle = station.handle();

    println!(
        "labelfeed: {} rows in {}, mode {}, port {}",
        history.rows,
        config.audit.csv_path.display(),
        config.run.mode,
        config.serial.port
    );
    if let Some(last) = last_tracking {
        println!("last tracking number in log: {}", last);
    }
    println!("type 'help' for commands");

    let mut events = station.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = console::format_event(&event) {
                        println!("{}", line);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "console fell behind on events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if start {
        report(handle.send(OperatorCommand::Start).await);
    }
    console_loop(&handle).await?;

    if let Ok(CommandReply::Snapshot(snapshot)) = handle.send(OperatorCommand::Snapshot).await {
        println!("{}", console::format_stats(&snapshot));
    }
    let discarded = tokio::task::spawn_blocking(move || station.shutdown())
        .await
        .map_err(std::io::Error::other)?;
    printer.abort();
    if discarded > 0 {
        println!("{} queued record(s) logged as discarded", discarded);
    }
    Ok(())
}

/// Read console commands until `quit`, end of input or Ctrl-C.
async fn console_loop(handle: &StationHandle) -> Result<(), LabelfeedError> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };

        let command = match console::parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        match command {
            ConsoleCommand::Station(command) => report(handle.send(command).await),
            ConsoleCommand::ShowQueue => {
                if let Ok(CommandReply::Snapshot(snapshot)) = handle.send(OperatorCommand::Snapshot).await {
                    println!("{}", console::format_queue(&snapshot.queue));
                }
            }
            ConsoleCommand::ShowStats => {
                if let Ok(CommandReply::Snapshot(snapshot)) = handle.send(OperatorCommand::Snapshot).await {
                    println!("{}", console::format_stats(&snapshot));
                }
            }
            ConsoleCommand::Help => println!("{}", console::HELP),
            ConsoleCommand::Quit => break,
        }
    }
    Ok(())
}

fn report(result: Result<CommandReply, LabelfeedError>) {
    match result {
        Ok(reply) => {
            if let Some(text) = console::format_reply(&reply) {
                println!("{}", text);
            }
        }
        Err(e) => println!("error: {}", e),
    }
}

// ============================================================================
// REPRINT & TEMPLATE
// ============================================================================

async fn reprint(config: &Config, file: PathBuf) -> Result<(), LabelfeedError> {
    let payload = std::fs::read_to_string(&file)?;
    if LabelFormat::from_path(&file) == LabelFormat::Zpl && !zpl::is_complete_label(&payload) {
        tracing::warn!(file = %file.display(), "archived payload is not a complete ZPL label");
    }

    let dispatcher = build_dispatcher(config)?;
    println!("Reprinting {}...", file.display());
    let outcome = tokio::task::spawn_blocking(move || dispatcher.resubmit(payload))
        .await
        .map_err(std::io::Error::other)?;

    if outcome.is_success() {
        println!("Printed successfully!");
        Ok(())
    } else {
        Err(LabelfeedError::PrintFailed {
            backend: outcome.backend_id,
            detail: outcome.error_detail.unwrap_or_default(),
        })
    }
}

fn show_template(config: &Config) -> Result<(), LabelfeedError> {
    let template: LabelTemplate = config.print.template()?;
    let history = audit::scan(&config.audit.csv_path, &config.parser.parser())?;
    let next = TrackingAllocator::seeded(history.tracking_numbers, config.tracking.base).peek();

    let fields = parser::parse(SAMPLE_FRAGMENT)?;
    let record = DeviceRecord::new(next, fields, &Fragment::new(SAMPLE_FRAGMENT));
    let payload = PlaceholderRenderer.render(&record, &template)?;

    let placeholders: Vec<&str> = template.placeholders().iter().map(|p| p.name()).collect();
    println!("template: {} ({:?})", template.name(), template.format());
    println!("placeholders: {}", placeholders.join(", "));
    println!();
    println!("{}", payload);

    if config.print.secondary.is_some() {
        println!();
        println!("secondary ({}):", config.print.secondary_stock);
        print!("{}", tspl::serial_label(config.print.stock()?, record.serial_number()));
    }
    Ok(())
}
