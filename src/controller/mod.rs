//! # Mode Controller
//!
//! Decides what happens to every parsed fragment and executes operator
//! commands. One [`ModeController`] lives on the controller thread (see
//! [`station`]) and exclusively owns the queue, the dispatcher and the audit
//! log writer; nothing else mutates them.
//!
//! ## Modes
//!
//! | Mode | On a parsed record |
//! |------|--------------------|
//! | `AutoPrint` | allocate tracking number → print → log row |
//! | `QueueHold` | allocate tracking number → hold as [`QueueItem`] for the operator |
//!
//! The mode can only change while ingestion is stopped.
//!
//! ## Accounting
//!
//! Every fragment and every operator commit or discard produces exactly one
//! audit row. A queued item that fails to print stays queued with its
//! tracking number; the retry writes another row. Items still queued at
//! shutdown are logged as `Discarded`.

pub mod station;

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::audit::{AuditLog, LogEntry};
use crate::dispatch::{CombinedStatus, Dispatcher};
use crate::error::{LabelfeedError, ParseError};
use crate::record::{DeviceFields, DeviceRecord, Fragment};
use crate::tracking::{RunStats, TrackingAllocator};

pub use station::{SourceFactory, Station, StationHandle};

/// Buffered events per observer before it starts lagging.
pub const EVENT_CAPACITY: usize = 256;

// ============================================================================
// MODE & POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    #[serde(rename = "auto", alias = "AutoPrint")]
    AutoPrint,
    #[serde(rename = "queue", alias = "QueueHold")]
    QueueHold,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoPrint => "auto",
            Self::QueueHold => "queue",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" | "autoprint" => Ok(Self::AutoPrint),
            "queue" | "queuehold" | "hold" => Ok(Self::QueueHold),
            other => Err(format!("unknown mode '{}' (expected auto or queue)", other)),
        }
    }
}

/// What to do with a serial number whose label already printed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Process it like any other record
    Allow,
    /// Process it, but log a warning and count it
    #[default]
    Warn,
    /// Log a `DuplicateRejected` row and skip it; no tracking number is drawn
    Reject,
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "warn" => Ok(Self::Warn),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "unknown duplicate policy '{}' (expected allow, warn or reject)",
                other
            )),
        }
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

/// A record held for the operator in `QueueHold` mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueItem {
    pub id: u64,
    /// The record; its tracking number changes when the operator edits it
    pub record: DeviceRecord,
    /// The number drawn when the item was queued
    pub allocated_tracking_number: u64,
    pub attempts: u32,
    pub last_status: Option<CombinedStatus>,
}

/// Operator actions, delivered as messages to the controller thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Start,
    Stop,
    SetMode(Mode),
    PrintOne(u64),
    PrintAll,
    EditTrackingNumber { id: u64, tracking_number: u64 },
    Discard(u64),
    DiscardAll,
    SetSecondaryEnabled(bool),
    Snapshot,
}

/// Result of printing one queued item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
    pub item_id: u64,
    pub tracking_number: u64,
    pub status: CombinedStatus,
    /// The print failed and the item is still queued
    pub requeued: bool,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub mode: Mode,
    pub ingesting: bool,
    pub secondary_enabled: bool,
    pub queue: Vec<QueueItem>,
    pub stats: RunStats,
    pub next_tracking_number: u64,
    pub last_connection_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReply {
    Ack,
    Committed(Vec<Commit>),
    /// Tracking numbers of the discarded items
    Discarded(Vec<u64>),
    Snapshot(Box<Snapshot>),
}

/// Broadcast to every observer of the station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StationEvent {
    IngestStarted { source: String },
    IngestStopped,
    ConnectionLost { error: String },
    ModeChanged(Mode),
    /// An audit row was written (or attempted)
    Logged {
        entry: Box<LogEntry>,
        archive_file: Option<String>,
    },
    Queued(Box<QueueItem>),
    Duplicate { serial: String, policy: DuplicatePolicy },
    AuditFailed { error: String },
    Shutdown { discarded: usize },
}

// ============================================================================
// CONTROLLER
// ============================================================================

pub struct ModeController {
    mode: Mode,
    ingesting: bool,
    queue: Vec<QueueItem>,
    next_item_id: u64,
    allocator: Arc<TrackingAllocator>,
    dispatcher: Dispatcher,
    audit: AuditLog,
    duplicate_policy: DuplicatePolicy,
    seen_serials: HashSet<String>,
    last_connection_error: Option<String>,
    events: broadcast::Sender<StationEvent>,
}

impl ModeController {
    pub fn new(dispatcher: Dispatcher, audit: AuditLog, allocator: Arc<TrackingAllocator>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            mode: Mode::default(),
            ingesting: false,
            queue: Vec::new(),
            next_item_id: 1,
            allocator,
            dispatcher,
            audit,
            duplicate_policy: DuplicatePolicy::default(),
            seen_serials: HashSet::new(),
            last_connection_error: None,
            events,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the duplicate policy and the serials whose labels printed in earlier
    /// runs (see [`crate::audit::scan`]).
    pub fn with_duplicate_policy(
        mut self,
        policy: DuplicatePolicy,
        seen: impl IntoIterator<Item = String>,
    ) -> Self {
        self.duplicate_policy = policy;
        self.seen_serials.extend(seen);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<StationEvent> {
        self.events.clone()
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ingesting(&self) -> bool {
        self.ingesting
    }

    pub fn queue(&self) -> &[QueueItem] {
        &self.queue
    }

    pub fn stats(&self) -> RunStats {
        self.allocator.stats()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            mode: self.mode,
            ingesting: self.ingesting,
            secondary_enabled: self.dispatcher.secondary_enabled(),
            queue: self.queue.clone(),
            stats: self.allocator.stats(),
            next_tracking_number: self.allocator.peek(),
            last_connection_error: self.last_connection_error.clone(),
        }
    }

    // ========================================================================
    // INGESTION
    // ========================================================================

    /// Handle one flushed fragment and its parse result.
    pub fn handle_fragment(&mut self, fragment: Fragment, parsed: Result<DeviceFields, ParseError>) {
        self.allocator.record(|s| s.fragments += 1);

        let fields = match parsed {
            Ok(fields) => fields,
            Err(error) => {
                self.allocator.record(|s| s.parse_errors += 1);
                tracing::warn!(kind = %error.kind, detail = %error.detail, "fragment not parsed");
                self.audit(LogEntry::parse_error(&fragment, &error));
                return;
            }
        };
        self.allocator.record(|s| s.parsed += 1);

        if self.seen_serials.contains(&fields.serial_number)
            && self.duplicate_policy != DuplicatePolicy::Allow
        {
            self.allocator.record(|s| s.duplicates += 1);
            tracing::warn!(serial = %fields.serial_number, policy = ?self.duplicate_policy, "duplicate serial");
            self.emit(StationEvent::Duplicate {
                serial: fields.serial_number.clone(),
                policy: self.duplicate_policy,
            });
            if self.duplicate_policy == DuplicatePolicy::Reject {
                self.audit(LogEntry::duplicate_rejected(&fragment, fields));
                return;
            }
        }

        let record = DeviceRecord::new(self.allocator.next(), fields, &fragment);
        match self.mode {
            Mode::AutoPrint => {
                self.print_record(&record);
            }
            Mode::QueueHold => self.enqueue(record),
        }
    }

    /// The reader stopped on a transport error.
    pub fn connection_lost(&mut self, error: String) {
        tracing::error!(%error, "ingestion halted");
        self.ingesting = false;
        self.last_connection_error = Some(error.clone());
        self.emit(StationEvent::ConnectionLost { error });
    }

    fn enqueue(&mut self, record: DeviceRecord) {
        let item = QueueItem {
            id: self.next_item_id,
            allocated_tracking_number: record.tracking_number,
            record,
            attempts: 0,
            last_status: None,
        };
        self.next_item_id += 1;
        self.allocator.record(|s| s.queued += 1);
        tracing::info!(
            id = item.id,
            tracking = item.record.tracking_number,
            serial = %item.record.serial_number(),
            "record queued"
        );
        self.emit(StationEvent::Queued(Box::new(item.clone())));
        self.queue.push(item);
    }

    fn print_record(&mut self, record: &DeviceRecord) -> CombinedStatus {
        let dispatch = self.dispatcher.dispatch(record);
        let status = dispatch.status;
        // A unit only counts as seen once its label is on paper
        if status.primary_printed() {
            self.seen_serials.insert(record.serial_number().to_string());
        }
        self.allocator.record(|s| match status {
            CombinedStatus::PrintFailed => s.print_failures += 1,
            CombinedStatus::SuccessSecondaryFailed => {
                s.printed += 1;
                s.secondary_failures += 1;
            }
            _ => s.printed += 1,
        });
        self.audit(LogEntry::dispatched(record, dispatch));
        status
    }

    fn audit(&mut self, entry: LogEntry) {
        let archive_file = match self.audit.append(&entry) {
            Ok(archived) => archived.archive_file,
            Err(failure) => {
                self.allocator.record(|s| s.audit_failures += 1);
                self.emit(StationEvent::AuditFailed {
                    error: failure.to_string(),
                });
                None
            }
        };
        self.emit(StationEvent::Logged {
            entry: Box::new(entry),
            archive_file,
        });
    }

    fn emit(&self, event: StationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ========================================================================
    // OPERATOR COMMANDS
    // ========================================================================

    /// Execute one command.
    ///
    /// `Start` and `Stop` only flip the ingesting state here; the station
    /// owns the reader thread around them.
    pub fn execute(&mut self, command: OperatorCommand) -> Result<CommandReply, LabelfeedError> {
        match command {
            OperatorCommand::Start => self.start_ingest().map(|()| CommandReply::Ack),
            OperatorCommand::Stop => self.stop_ingest().map(|()| CommandReply::Ack),
            OperatorCommand::SetMode(mode) => self.set_mode(mode).map(|()| CommandReply::Ack),
            OperatorCommand::PrintOne(id) => {
                self.print_one(id).map(|commit| CommandReply::Committed(vec![commit]))
            }
            OperatorCommand::PrintAll => Ok(CommandReply::Committed(self.print_all())),
            OperatorCommand::EditTrackingNumber {
                id,
                tracking_number,
            } => self
                .edit_tracking_number(id, tracking_number)
                .map(|()| CommandReply::Ack),
            OperatorCommand::Discard(id) => self
                .discard(id)
                .map(|tracking| CommandReply::Discarded(vec![tracking])),
            OperatorCommand::DiscardAll => Ok(CommandReply::Discarded(self.discard_all())),
            OperatorCommand::SetSecondaryEnabled(enabled) => {
                self.dispatcher.set_secondary_enabled(enabled);
                tracing::info!(enabled, "secondary printer toggled");
                Ok(CommandReply::Ack)
            }
            OperatorCommand::Snapshot => Ok(CommandReply::Snapshot(Box::new(self.snapshot()))),
        }
    }

    pub fn start_ingest(&mut self) -> Result<(), LabelfeedError> {
        if self.ingesting {
            return Err(LabelfeedError::InvalidStateTransition(
                "ingestion is already running".to_string(),
            ));
        }
        self.ingesting = true;
        self.last_connection_error = None;
        Ok(())
    }

    pub fn stop_ingest(&mut self) -> Result<(), LabelfeedError> {
        if !self.ingesting {
            return Err(LabelfeedError::InvalidStateTransition(
                "ingestion is not running".to_string(),
            ));
        }
        self.ingesting = false;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: Mode) -> Result<(), LabelfeedError> {
        if self.ingesting {
            return Err(LabelfeedError::InvalidStateTransition(format!(
                "cannot switch to {} mode while ingesting; stop first",
                mode
            )));
        }
        if self.mode != mode {
            self.mode = mode;
            tracing::info!(%mode, "mode changed");
            self.emit(StationEvent::ModeChanged(mode));
        }
        Ok(())
    }

    fn position(&self, id: u64) -> Result<usize, LabelfeedError> {
        self.queue
            .iter()
            .position(|item| item.id == id)
            .ok_or(LabelfeedError::QueueItemNotFound(id))
    }

    /// Print one queued item. A failed print keeps the item queued.
    pub fn print_one(&mut self, id: u64) -> Result<Commit, LabelfeedError> {
        let index = self.position(id)?;
        let record = self.queue[index].record.clone();
        let status = self.print_record(&record);

        let item = &mut self.queue[index];
        item.attempts += 1;
        item.last_status = Some(status);
        let requeued = !status.primary_printed();
        if !requeued {
            self.queue.remove(index);
        }

        Ok(Commit {
            item_id: id,
            tracking_number: record.tracking_number,
            status,
            requeued,
        })
    }

    /// Print every queued item, oldest first; one attempt each.
    pub fn print_all(&mut self) -> Vec<Commit> {
        let ids: Vec<u64> = self.queue.iter().map(|item| item.id).collect();
        ids.into_iter()
            .filter_map(|id| self.print_one(id).ok())
            .collect()
    }

    /// Give a queued item an operator-chosen tracking number.
    ///
    /// The original number stays issued and is never handed out again.
    ///
    /// ## Errors
    ///
    /// - `QueueItemNotFound` for an unknown id
    /// - `TrackingCollision` if the number was already issued or claimed
    pub fn edit_tracking_number(&mut self, id: u64, tracking_number: u64) -> Result<(), LabelfeedError> {
        let index = self.position(id)?;
        let current = self.queue[index].record.tracking_number;
        if current == tracking_number {
            return Ok(());
        }
        self.allocator.claim(tracking_number)?;
        self.queue[index].record.tracking_number = tracking_number;
        tracing::info!(id, from = current, to = tracking_number, "tracking number edited");
        Ok(())
    }

    /// Drop a queued item, logging it as `Discarded`. Returns its tracking number.
    pub fn discard(&mut self, id: u64) -> Result<u64, LabelfeedError> {
        let index = self.position(id)?;
        Ok(self.discard_at(index, "discarded by operator"))
    }

    pub fn discard_all(&mut self) -> Vec<u64> {
        self.discard_remaining("discarded by operator")
    }

    /// Log every item still queued as `Discarded` and announce shutdown.
    pub fn shutdown(&mut self) -> usize {
        let discarded = self.discard_remaining("discarded at shutdown").len();
        if discarded > 0 {
            tracing::warn!(discarded, "queued records discarded at shutdown");
        }
        self.emit(StationEvent::Shutdown { discarded });
        discarded
    }

    fn discard_remaining(&mut self, reason: &str) -> Vec<u64> {
        let mut discarded = Vec::with_capacity(self.queue.len());
        while !self.queue.is_empty() {
            discarded.push(self.discard_at(0, reason));
        }
        discarded
    }

    fn discard_at(&mut self, index: usize, reason: &str) -> u64 {
        let item = self.queue.remove(index);
        self.allocator.record(|s| s.discarded += 1);
        tracing::info!(id = item.id, tracking = item.record.tracking_number, reason, "record discarded");
        self.audit(LogEntry::discarded(&item.record, reason));
        item.record.tracking_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit;
    use crate::dispatch::testing::RecordingBackend;
    use crate::parser::Parser;
    use crate::printer::LabelStock;
    use crate::template::{LabelTemplate, PlaceholderRenderer};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const RECORD_A: &str =
        "##ATS542912923728|866988074133496|286019876543210|8991101200003204510|AA:BB:CC:DD:EE:FF##";
    const RECORD_B: &str =
        "#612165404520|866988074133497|286019876543211|8991101200003204511|AA:BB:CC:DD:EE:00";

    struct Fixture {
        dir: TempDir,
        primary: Arc<RecordingBackend>,
        controller: ModeController,
    }

    impl Fixture {
        fn with_primary(primary: Arc<RecordingBackend>) -> Self {
            Self::build(primary, DuplicatePolicy::Warn, Vec::new())
        }

        fn build(primary: Arc<RecordingBackend>, policy: DuplicatePolicy, seen: Vec<String>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let audit = AuditLog::open(dir.path().join("log.csv"), dir.path().join("zpl"), "zpl")
                .unwrap();
            let dispatcher = Dispatcher::new(
                primary.clone(),
                Arc::new(PlaceholderRenderer),
                LabelTemplate::device_label(),
            )
            .with_secondary(RecordingBackend::ok("pcb"), LabelStock::PCB_40X20);
            let controller =
                ModeController::new(dispatcher, audit, Arc::new(TrackingAllocator::new(60000)))
                    .with_duplicate_policy(policy, seen);
            Self {
                dir,
                primary,
                controller,
            }
        }

        fn new() -> Self {
            Self::with_primary(RecordingBackend::ok("zebra"))
        }

        fn feed(&mut self, text: &str) {
            let parsed = Parser::default().parse(text);
            self.controller.handle_fragment(Fragment::new(text), parsed);
        }

        fn log(&self) -> audit::LogScan {
            audit::scan(&self.dir.path().join("log.csv"), &Parser::default()).unwrap()
        }

        fn statuses(&self) -> Vec<String> {
            let mut reader = csv::Reader::from_path(self.dir.path().join("log.csv")).unwrap();
            reader
                .records()
                .map(|r| r.unwrap()[7].to_string())
                .collect()
        }

        fn archive_count(&self) -> usize {
            std::fs::read_dir(self.dir.path().join("zpl"))
                .unwrap()
                .count()
        }
    }

    #[test]
    fn test_auto_print_assigns_and_logs() {
        let mut fx = Fixture::new();
        fx.feed(RECORD_A);
        fx.feed(RECORD_B);

        assert_eq!(fx.log().tracking_numbers, vec![60000, 60001]);
        assert_eq!(fx.statuses(), vec!["SuccessWithSecondary", "SuccessWithSecondary"]);
        assert_eq!(fx.primary.job_count(), 2);
        assert_eq!(fx.archive_count(), 2);

        let stats = fx.controller.stats();
        assert_eq!(stats.fragments, 2);
        assert_eq!(stats.printed, 2);
    }

    #[test]
    fn test_parse_error_does_not_allocate() {
        let mut fx = Fixture::new();
        fx.feed("garbage");
        fx.feed(RECORD_A);

        assert_eq!(fx.statuses(), vec!["ParseError", "SuccessWithSecondary"]);
        assert_eq!(fx.log().tracking_numbers, vec![60000]);
        assert_eq!(fx.controller.stats().parse_errors, 1);
    }

    #[test]
    fn test_primary_failure_consumes_tracking_number() {
        let mut fx = Fixture::with_primary(RecordingBackend::failing("zebra"));
        fx.feed(RECORD_A);
        fx.feed(RECORD_B);

        assert_eq!(fx.statuses(), vec!["PrintFailed", "PrintFailed"]);
        assert_eq!(fx.log().tracking_numbers, vec![60000, 60001]);
        assert_eq!(fx.archive_count(), 0);
        assert_eq!(fx.controller.stats().print_failures, 2);
    }

    #[test]
    fn test_queue_hold_then_print_all() {
        let mut fx = Fixture::new();
        fx.controller.set_mode(Mode::QueueHold).unwrap();
        fx.feed(RECORD_A);
        fx.feed(RECORD_B);

        assert_eq!(fx.primary.job_count(), 0);
        assert_eq!(fx.controller.queue().len(), 2);
        assert_eq!(fx.controller.queue()[0].record.tracking_number, 60000);
        assert_eq!(fx.log().rows, 0);

        let commits = fx.controller.print_all();
        assert_eq!(commits.len(), 2);
        assert!(commits.iter().all(|c| !c.requeued));
        assert!(fx.controller.queue().is_empty());
        assert_eq!(fx.log().tracking_numbers, vec![60000, 60001]);
    }

    #[test]
    fn test_failed_commit_stays_queued_with_same_number() {
        let mut fx = Fixture::with_primary(RecordingBackend::failing("zebra"));
        fx.controller.set_mode(Mode::QueueHold).unwrap();
        fx.feed(RECORD_A);

        let id = fx.controller.queue()[0].id;
        let first = fx.controller.print_one(id).unwrap();
        let second = fx.controller.print_one(id).unwrap();
        assert!(first.requeued && second.requeued);
        assert_eq!(first.tracking_number, second.tracking_number);

        let item = &fx.controller.queue()[0];
        assert_eq!(item.attempts, 2);
        assert_eq!(item.last_status, Some(CombinedStatus::PrintFailed));
        assert_eq!(fx.statuses(), vec!["PrintFailed", "PrintFailed"]);
    }

    #[test]
    fn test_edit_claims_new_number_and_rejects_collisions() {
        let mut fx = Fixture::new();
        fx.controller.set_mode(Mode::QueueHold).unwrap();
        fx.feed(RECORD_A);
        fx.feed(RECORD_B);
        let (first, second) = (fx.controller.queue()[0].id, fx.controller.queue()[1].id);

        let err = fx.controller.edit_tracking_number(second, 60000).unwrap_err();
        assert!(matches!(err, LabelfeedError::TrackingCollision(60000)));

        fx.controller.edit_tracking_number(first, 70000).unwrap();
        let item = &fx.controller.queue()[0];
        assert_eq!(item.record.tracking_number, 70000);
        assert_eq!(item.allocated_tracking_number, 60000);

        // 60000 is not recycled
        fx.controller.set_mode(Mode::AutoPrint).unwrap();
        fx.feed("##ATS1|2|3|4|AA:BB:CC:DD:EE:11##");
        fx.controller.print_all();
        let mut numbers = fx.log().tracking_numbers;
        numbers.sort();
        assert_eq!(numbers, vec![60001, 60002, 70000]);
    }

    #[test]
    fn test_unknown_queue_item() {
        let mut fx = Fixture::new();
        assert!(matches!(
            fx.controller.print_one(42),
            Err(LabelfeedError::QueueItemNotFound(42))
        ));
        assert!(matches!(
            fx.controller.discard(42),
            Err(LabelfeedError::QueueItemNotFound(42))
        ));
    }

    #[test]
    fn test_discard_and_shutdown_are_logged() {
        let mut fx = Fixture::new();
        fx.controller.set_mode(Mode::QueueHold).unwrap();
        fx.feed(RECORD_A);
        fx.feed(RECORD_B);

        let id = fx.controller.queue()[0].id;
        assert_eq!(fx.controller.discard(id).unwrap(), 60000);
        assert_eq!(fx.controller.shutdown(), 1);

        assert_eq!(fx.statuses(), vec!["Discarded", "Discarded"]);
        assert_eq!(fx.controller.stats().discarded, 2);
        assert_eq!(fx.primary.job_count(), 0);
    }

    #[test]
    fn test_mode_switch_rejected_while_ingesting() {
        let mut fx = Fixture::new();
        fx.controller.start_ingest().unwrap();
        let err = fx.controller.set_mode(Mode::QueueHold).unwrap_err();
        assert!(matches!(err, LabelfeedError::InvalidStateTransition(_)));
        assert_eq!(fx.controller.mode(), Mode::AutoPrint);

        assert!(fx.controller.start_ingest().is_err());
        fx.controller.stop_ingest().unwrap();
        assert!(fx.controller.stop_ingest().is_err());
        fx.controller.set_mode(Mode::QueueHold).unwrap();
    }

    #[test]
    fn test_duplicate_policies() {
        let mut fx = Fixture::build(
            RecordingBackend::ok("zebra"),
            DuplicatePolicy::Reject,
            vec!["ATS612165404520".to_string()],
        );

        fx.feed(RECORD_A);
        fx.feed(RECORD_A);
        fx.feed(RECORD_B);

        assert_eq!(
            fx.statuses(),
            vec!["SuccessWithSecondary", "DuplicateRejected", "DuplicateRejected"]
        );
        assert_eq!(fx.log().tracking_numbers, vec![60000]);
        assert_eq!(fx.controller.stats().duplicates, 2);
    }

    #[test]
    fn test_reject_allows_rescan_after_failed_print() {
        let mut fx = Fixture::build(
            RecordingBackend::failing("zebra"),
            DuplicatePolicy::Reject,
            Vec::new(),
        );
        fx.feed(RECORD_A);
        fx.feed(RECORD_A);

        assert_eq!(fx.statuses(), vec!["PrintFailed", "PrintFailed"]);
        assert_eq!(fx.controller.stats().duplicates, 0);
        assert_eq!(fx.primary.job_count(), 0);
    }

    #[test]
    fn test_reject_allows_rescan_after_discard() {
        let mut fx = Fixture::build(
            RecordingBackend::ok("zebra"),
            DuplicatePolicy::Reject,
            Vec::new(),
        );
        fx.controller.set_mode(Mode::QueueHold).unwrap();
        fx.feed(RECORD_A);
        let id = fx.controller.queue()[0].id;
        fx.controller.discard(id).unwrap();
        fx.feed(RECORD_A);

        assert_eq!(fx.statuses(), vec!["Discarded"]);
        assert_eq!(fx.controller.queue().len(), 1);
        assert_eq!(fx.controller.queue()[0].record.tracking_number, 60001);

        // Once printed, the serial is rejected
        fx.controller.print_all();
        fx.feed(RECORD_A);
        assert_eq!(
            fx.statuses(),
            vec!["Discarded", "SuccessWithSecondary", "DuplicateRejected"]
        );
    }

    #[test]
    fn test_duplicate_warn_still_prints() {
        let mut fx = Fixture::new();
        let mut events = fx.controller.subscribe();
        fx.feed(RECORD_A);
        fx.feed(RECORD_A);

        assert_eq!(fx.log().tracking_numbers, vec![60000, 60001]);
        assert_eq!(fx.controller.stats().duplicates, 1);

        let mut saw_duplicate = false;
        while let Ok(event) = events.try_recv() {
            if let StationEvent::Duplicate { policy, .. } = event {
                assert_eq!(policy, DuplicatePolicy::Warn);
                saw_duplicate = true;
            }
        }
        assert!(saw_duplicate);
    }

    #[test]
    fn test_execute_snapshot_and_secondary_toggle() {
        let mut fx = Fixture::new();
        fx.controller
            .execute(OperatorCommand::SetSecondaryEnabled(false))
            .unwrap();
        fx.feed(RECORD_A);

        let CommandReply::Snapshot(snapshot) = fx.controller.execute(OperatorCommand::Snapshot).unwrap()
        else {
            panic!("expected snapshot");
        };
        assert!(!snapshot.secondary_enabled);
        assert_eq!(snapshot.next_tracking_number, 60001);
        assert_eq!(snapshot.stats.printed, 1);
        assert_eq!(fx.statuses(), vec!["Success"]);
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("auto".parse::<Mode>(), Ok(Mode::AutoPrint));
        assert_eq!("QUEUE".parse::<Mode>(), Ok(Mode::QueueHold));
        assert!("later".parse::<Mode>().is_err());
        assert_eq!("reject".parse::<DuplicatePolicy>(), Ok(DuplicatePolicy::Reject));
    }
}
