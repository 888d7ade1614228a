//! # Operator Console
//!
//! Line-oriented command grammar for the `run` command and the text the
//! console prints back.
//!
//! | Input | Action |
//! |-------|--------|
//! | `start` / `stop` | start or stop reading the serial port |
//! | `mode auto` / `mode queue` | switch mode (only while stopped) |
//! | `queue` | list held records |
//! | `print <id>` / `print all` | print held records |
//! | `edit <id> <number>` | change a held record's tracking number |
//! | `discard <id>` / `discard all` | drop held records (logged) |
//! | `secondary on` / `secondary off` | toggle the serial-label printer |
//! | `stats` | run statistics |
//! | `help` | this table |
//! | `quit` | stop and exit |

use std::fmt::Write;

use crate::controller::{CommandReply, Mode, OperatorCommand, QueueItem, Snapshot, StationEvent};

pub const HELP: &str = "\
commands:
  start | stop                 start or stop reading the serial port
  mode auto|queue              switch mode (while stopped)
  queue                        list held records
  print <id>|all               print held records
  edit <id> <number>           change a held record's tracking number
  discard <id>|all             drop held records
  secondary on|off             toggle the serial-label printer
  stats                        run statistics
  quit                         stop and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Station(OperatorCommand),
    ShowQueue,
    ShowStats,
    Help,
    Quit,
}

/// Parse one console line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let words: Vec<String> = line.split_whitespace().map(str::to_ascii_lowercase).collect();
    let words: Vec<&str> = words.iter().map(String::as_str).collect();

    let command = match words.as_slice() {
        [] => return Ok(None),
        ["start"] => ConsoleCommand::Station(OperatorCommand::Start),
        ["stop"] => ConsoleCommand::Station(OperatorCommand::Stop),
        ["mode", mode] => ConsoleCommand::Station(OperatorCommand::SetMode(mode.parse::<Mode>()?)),
        ["queue"] => ConsoleCommand::ShowQueue,
        ["print", "all"] => ConsoleCommand::Station(OperatorCommand::PrintAll),
        ["print", id] => ConsoleCommand::Station(OperatorCommand::PrintOne(number(id, "item id")?)),
        ["edit", id, tracking] => ConsoleCommand::Station(OperatorCommand::EditTrackingNumber {
            id: number(id, "item id")?,
            tracking_number: number(tracking, "tracking number")?,
        }),
        ["discard", "all"] => ConsoleCommand::Station(OperatorCommand::DiscardAll),
        ["discard", id] => ConsoleCommand::Station(OperatorCommand::Discard(number(id, "item id")?)),
        ["secondary", "on"] => ConsoleCommand::Station(OperatorCommand::SetSecondaryEnabled(true)),
        ["secondary", "off"] => ConsoleCommand::Station(OperatorCommand::SetSecondaryEnabled(false)),
        ["stats"] => ConsoleCommand::ShowStats,
        ["help"] | ["?"] => ConsoleCommand::Help,
        ["quit"] | ["exit"] => ConsoleCommand::Quit,
        _ => return Err(format!("unrecognized command '{}' (type 'help')", line.trim())),
    };
    Ok(Some(command))
}

fn number(word: &str, what: &str) -> Result<u64, String> {
    word.parse()
        .map_err(|_| format!("{} must be a number, got '{}'", what, word))
}

// ============================================================================
// OUTPUT
// ============================================================================

pub fn format_queue(items: &[QueueItem]) -> String {
    if items.is_empty() {
        return "queue is empty".to_string();
    }
    let mut out = format!(
        "{:>4}  {:>9}  {:<20}  {:>8}  {}\n",
        "id", "tracking", "serial", "attempts", "last"
    );
    for item in items {
        let _ = writeln!(
            out,
            "{:>4}  {:>9}  {:<20}  {:>8}  {}",
            item.id,
            item.record.tracking_number,
            item.record.serial_number(),
            item.attempts,
            item.last_status.map_or("-", |s| s.as_str())
        );
    }
    out.pop();
    out
}

pub fn format_stats(snapshot: &Snapshot) -> String {
    let s = &snapshot.stats;
    let mut out = format!(
        "mode: {}  ingesting: {}  secondary: {}  next tracking number: {}\n",
        snapshot.mode,
        if snapshot.ingesting { "yes" } else { "no" },
        if snapshot.secondary_enabled { "on" } else { "off" },
        snapshot.next_tracking_number
    );
    let _ = write!(
        out,
        "fragments: {}  parsed: {}  parse errors: {}  printed: {}  print failures: {}  \
         secondary failures: {}  queued: {} (held {})  discarded: {}  duplicates: {}  audit failures: {}",
        s.fragments,
        s.parsed,
        s.parse_errors,
        s.printed,
        s.print_failures,
        s.secondary_failures,
        s.queued,
        snapshot.queue.len(),
        s.discarded,
        s.duplicates,
        s.audit_failures
    );
    if let Some(error) = &snapshot.last_connection_error {
        let _ = write!(out, "\nlast connection error: {}", error);
    }
    out
}

/// Text for a command reply; `None` when there is nothing worth printing.
pub fn format_reply(reply: &CommandReply) -> Option<String> {
    match reply {
        CommandReply::Ack => Some("ok".to_string()),
        CommandReply::Committed(commits) if commits.is_empty() => {
            Some("nothing to print".to_string())
        }
        CommandReply::Committed(commits) => Some(
            commits
                .iter()
                .map(|c| {
                    format!(
                        "#{} tracking {}: {}{}",
                        c.item_id,
                        c.tracking_number,
                        c.status,
                        if c.requeued { " (still queued)" } else { "" }
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        CommandReply::Discarded(numbers) if numbers.is_empty() => {
            Some("nothing to discard".to_string())
        }
        CommandReply::Discarded(numbers) => Some(format!(
            "discarded {}",
            numbers
                .iter()
                .map(u64::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        )),
        CommandReply::Snapshot(_) => None,
    }
}

/// One console line per noteworthy event.
pub fn format_event(event: &StationEvent) -> Option<String> {
    match event {
        StationEvent::IngestStarted { source } => Some(format!("reading {}", source)),
        StationEvent::IngestStopped => Some("reading stopped".to_string()),
        StationEvent::ConnectionLost { error } => {
            Some(format!("connection lost: {} (type 'start' to reconnect)", error))
        }
        StationEvent::ModeChanged(mode) => Some(format!("mode: {}", mode)),
        StationEvent::Logged {
            entry,
            archive_file,
        } => {
            let mut line = match (entry.tracking_number, entry.serial_number()) {
                (Some(tracking), Some(serial)) => {
                    format!("{} {} {}", tracking, serial, entry.status)
                }
                (None, Some(serial)) => format!("{} {}", serial, entry.status),
                _ => format!("{}: {:?}", entry.status, entry.raw_fragment),
            };
            if let Some(detail) = &entry.detail {
                let _ = write!(line, " ({})", detail);
            }
            if let Some(file) = archive_file {
                let _ = write!(line, " -> {}", file);
            }
            Some(line)
        }
        StationEvent::Queued(item) => Some(format!(
            "queued #{} tracking {} {}",
            item.id,
            item.record.tracking_number,
            item.record.serial_number()
        )),
        StationEvent::Duplicate { serial, policy } => {
            Some(format!("duplicate serial {} ({:?})", serial, policy))
        }
        StationEvent::AuditFailed { error } => Some(format!("AUDIT FAILURE: {}", error)),
        StationEvent::Shutdown { discarded: 0 } => None,
        StationEvent::Shutdown { discarded } => {
            Some(format!("{} queued record(s) logged as discarded", discarded))
        }
    }
}
