//! # Print Dispatcher
//!
//! Renders the payloads for one record and submits them to the primary and,
//! when configured and enabled, the secondary printer.
//!
//! ## Independence
//!
//! The two submissions run on their own scoped threads. A failure on one side
//! is recorded in that side's [`PrintOutcome`] and never rolls back or skips
//! the other. A side that hangs only holds up the return of [`Dispatcher::dispatch`],
//! never the other side's submission; no timeout is applied beyond whatever
//! the transport itself enforces.
//!
//! ## Combined Status
//!
//! | Primary | Secondary enabled | Secondary | Combined |
//! |---------|-------------------|-----------|----------|
//! | Success | no | - | `Success` |
//! | Success | yes | Success | `SuccessWithSecondary` |
//! | Success | yes | Failed | `SuccessSecondaryFailed` |
//! | Failed | any | any | `PrintFailed` |
//!
//! `dispatch` never returns an error: render and backend failures become
//! `Failed` outcomes so the audit log always gets its row.

use std::fmt;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::error::LabelfeedError;
use crate::printer::LabelStock;
use crate::protocol::tspl;
use crate::record::DeviceRecord;
use crate::template::{LabelTemplate, Renderer};

/// A printer that accepts raw payloads.
///
/// Implementations must be callable from several threads; one call is one
/// attempt, retries are the caller's business.
pub trait PrintBackend: Send + Sync {
    /// Identifier written into outcomes and logs (e.g. a device path)
    fn id(&self) -> &str;

    /// Send one payload to the printer.
    fn submit(&self, payload: &[u8]) -> Result<(), LabelfeedError>;
}

/// Result of one backend submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OutcomeStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintOutcome {
    pub backend_id: String,
    pub status: OutcomeStatus,
    /// Exactly what was (or would have been) sent to the backend
    pub rendered_payload: String,
    pub completed_at: DateTime<Local>,
    pub error_detail: Option<String>,
}

impl PrintOutcome {
    fn new(backend_id: &str, status: OutcomeStatus, payload: String, error: Option<String>) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            status,
            rendered_payload: payload,
            completed_at: Local::now(),
            error_detail: error,
        }
    }

    pub fn skipped(backend_id: &str) -> Self {
        Self::new(backend_id, OutcomeStatus::Skipped, String::new(), None)
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// The single status recorded for a log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CombinedStatus {
    Success,
    SuccessWithSecondary,
    SuccessSecondaryFailed,
    PrintFailed,
    ParseError,
    Discarded,
    DuplicateRejected,
}

impl CombinedStatus {
    /// Derive the combined status of a dispatch from the table above.
    pub fn derive(primary: &PrintOutcome, secondary: Option<&PrintOutcome>) -> Self {
        if !primary.is_success() {
            return Self::PrintFailed;
        }
        match secondary.map(|s| s.status) {
            None | Some(OutcomeStatus::Skipped) => Self::Success,
            Some(OutcomeStatus::Success) => Self::SuccessWithSecondary,
            Some(OutcomeStatus::Failed) => Self::SuccessSecondaryFailed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::SuccessWithSecondary => "SuccessWithSecondary",
            Self::SuccessSecondaryFailed => "SuccessSecondaryFailed",
            Self::PrintFailed => "PrintFailed",
            Self::ParseError => "ParseError",
            Self::Discarded => "Discarded",
            Self::DuplicateRejected => "DuplicateRejected",
        }
    }

    /// Whether the primary label made it onto paper.
    pub fn primary_printed(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::SuccessWithSecondary | Self::SuccessSecondaryFailed
        )
    }
}

impl fmt::Display for CombinedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one dispatch produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatch {
    pub primary: PrintOutcome,
    /// `None` when no secondary printer is configured
    pub secondary: Option<PrintOutcome>,
    pub status: CombinedStatus,
}

struct Secondary {
    backend: Arc<dyn PrintBackend>,
    stock: LabelStock,
    enabled: bool,
}

/// Sends each record to the configured printers.
pub struct Dispatcher {
    primary: Arc<dyn PrintBackend>,
    secondary: Option<Secondary>,
    renderer: Arc<dyn Renderer>,
    template: LabelTemplate,
}

impl Dispatcher {
    pub fn new(
        primary: Arc<dyn PrintBackend>,
        renderer: Arc<dyn Renderer>,
        template: LabelTemplate,
    ) -> Self {
        Self {
            primary,
            secondary: None,
            renderer,
            template,
        }
    }

    /// Attach the serial-label printer.
    pub fn with_secondary(mut self, backend: Arc<dyn PrintBackend>, stock: LabelStock) -> Self {
        self.secondary = Some(Secondary {
            backend,
            stock,
            enabled: true,
        });
        self
    }

    /// Turn the secondary printer on or off without detaching it.
    pub fn set_secondary_enabled(&mut self, enabled: bool) {
        if let Some(secondary) = &mut self.secondary {
            secondary.enabled = enabled;
        }
    }

    pub fn secondary_enabled(&self) -> bool {
        self.secondary.as_ref().is_some_and(|s| s.enabled)
    }

    pub fn template(&self) -> &LabelTemplate {
        &self.template
    }

    /// Render the primary payload without submitting it.
    pub fn render_primary(&self, record: &DeviceRecord) -> Result<String, LabelfeedError> {
        self.renderer.render(record, &self.template)
    }

    /// Print one record: exactly one attempt per backend.
    pub fn dispatch(&self, record: &DeviceRecord) -> Dispatch {
        let (primary, secondary) = thread::scope(|scope| {
            let secondary = self.secondary.as_ref().map(|secondary| {
                if secondary.enabled {
                    let payload = tspl::serial_label(secondary.stock, record.serial_number());
                    let backend = secondary.backend.as_ref();
                    Ok(scope.spawn(move || submit(backend, payload)))
                } else {
                    Err(PrintOutcome::skipped(secondary.backend.id()))
                }
            });

            let primary = scope.spawn(|| match self.render_primary(record) {
                Ok(payload) => submit(self.primary.as_ref(), payload),
                Err(e) => PrintOutcome::new(
                    self.primary.id(),
                    OutcomeStatus::Failed,
                    String::new(),
                    Some(e.to_string()),
                ),
            });
            let primary = primary.join().unwrap_or_else(|_| {
                PrintOutcome::new(
                    self.primary.id(),
                    OutcomeStatus::Failed,
                    String::new(),
                    Some("primary backend panicked".to_string()),
                )
            });

            let secondary = secondary.map(|pending| match pending {
                Ok(handle) => handle.join().unwrap_or_else(|_| {
                    PrintOutcome::new(
                        self.secondary_id(),
                        OutcomeStatus::Failed,
                        String::new(),
                        Some("secondary backend panicked".to_string()),
                    )
                }),
                Err(skipped) => skipped,
            });
            (primary, secondary)
        });

        let status = CombinedStatus::derive(&primary, secondary.as_ref());
        match status {
            CombinedStatus::PrintFailed => tracing::warn!(
                serial = %record.serial_number(),
                tracking = record.tracking_number,
                error = primary.error_detail.as_deref().unwrap_or(""),
                "primary label failed"
            ),
            CombinedStatus::SuccessSecondaryFailed => tracing::warn!(
                serial = %record.serial_number(),
                tracking = record.tracking_number,
                error = secondary.as_ref().and_then(|s| s.error_detail.as_deref()).unwrap_or(""),
                "secondary label failed"
            ),
            _ => tracing::info!(
                serial = %record.serial_number(),
                tracking = record.tracking_number,
                %status,
                "label printed"
            ),
        }

        Dispatch {
            primary,
            secondary,
            status,
        }
    }

    /// Send an archived primary payload again.
    pub fn resubmit(&self, payload: String) -> PrintOutcome {
        submit(self.primary.as_ref(), payload)
    }

    fn secondary_id(&self) -> &str {
        self.secondary
            .as_ref()
            .map_or("secondary", |s| s.backend.id())
    }
}

/// One attempt on one backend; every error becomes a `Failed` outcome.
fn submit(backend: &dyn PrintBackend, payload: String) -> PrintOutcome {
    match backend.submit(payload.as_bytes()) {
        Ok(()) => PrintOutcome::new(backend.id(), OutcomeStatus::Success, payload, None),
        Err(e) => PrintOutcome::new(backend.id(), OutcomeStatus::Failed, payload, Some(e.to_string())),
    }
}

// ============================================================================
// TEST BACKENDS
// ============================================================================

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc::Receiver;

    /// Backend that records payloads and can be told to fail or block.
    pub struct RecordingBackend {
        id: String,
        fail: bool,
        gate: Option<Mutex<Receiver<()>>>,
        pub jobs: Mutex<Vec<String>>,
    }

    impl RecordingBackend {
        pub fn ok(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                fail: false,
                gate: None,
                jobs: Mutex::new(Vec::new()),
            })
        }

        pub fn failing(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                fail: true,
                gate: None,
                jobs: Mutex::new(Vec::new()),
            })
        }

        /// Blocks every submission until the paired sender sends `()` or drops.
        pub fn gated(id: &str, gate: Receiver<()>) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                fail: false,
                gate: Some(Mutex::new(gate)),
                jobs: Mutex::new(Vec::new()),
            })
        }

        pub fn job_count(&self) -> usize {
            self.jobs.lock().unwrap().len()
        }
    }

    impl PrintBackend for RecordingBackend {
        fn id(&self) -> &str {
            &self.id
        }

        fn submit(&self, payload: &[u8]) -> Result<(), LabelfeedError> {
            if let Some(gate) = &self.gate {
                let _ = gate.lock().unwrap().recv();
            }
            if self.fail {
                return Err(LabelfeedError::Transport(format!("{} unreachable", self.id)));
            }
            self.jobs
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(payload).into_owned());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingBackend;
    use super::*;
    use crate::record::fixtures::sample_record;
    use crate::template::PlaceholderRenderer;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;
    use std::time::Duration;

    fn dispatcher(primary: Arc<RecordingBackend>) -> Dispatcher {
        Dispatcher::new(
            primary,
            Arc::new(PlaceholderRenderer),
            LabelTemplate::device_label(),
        )
    }

    #[test]
    fn test_primary_only_success() {
        let primary = RecordingBackend::ok("zebra");
        let result = dispatcher(primary.clone()).dispatch(&sample_record(60000));
        assert_eq!(result.status, CombinedStatus::Success);
        assert_eq!(result.secondary, None);
        assert_eq!(primary.job_count(), 1);
        assert!(result.primary.rendered_payload.contains("^FD60000^FS"));
    }

    #[test]
    fn test_both_printers_succeed() {
        let primary = RecordingBackend::ok("zebra");
        let secondary = RecordingBackend::ok("pcb");
        let result = dispatcher(primary)
            .with_secondary(secondary.clone(), LabelStock::PCB_40X20)
            .dispatch(&sample_record(60000));
        assert_eq!(result.status, CombinedStatus::SuccessWithSecondary);

        let jobs = secondary.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].contains("ATS542912923728"));
        assert!(!jobs[0].contains("60000"));
    }

    #[test]
    fn test_secondary_failure_keeps_primary() {
        let primary = RecordingBackend::ok("zebra");
        let result = dispatcher(primary.clone())
            .with_secondary(RecordingBackend::failing("pcb"), LabelStock::PCB_40X20)
            .dispatch(&sample_record(60000));
        assert_eq!(result.status, CombinedStatus::SuccessSecondaryFailed);
        assert_eq!(primary.job_count(), 1);
        let secondary = result.secondary.unwrap();
        assert_eq!(secondary.status, OutcomeStatus::Failed);
        assert_eq!(secondary.error_detail.as_deref(), Some("Transport error: pcb unreachable"));
    }

    #[test]
    fn test_primary_failure_still_prints_secondary() {
        let secondary = RecordingBackend::ok("pcb");
        let result = dispatcher(RecordingBackend::failing("zebra"))
            .with_secondary(secondary.clone(), LabelStock::PCB_40X20)
            .dispatch(&sample_record(60000));
        assert_eq!(result.status, CombinedStatus::PrintFailed);
        assert_eq!(secondary.job_count(), 1);
    }

    #[test]
    fn test_primary_unreachable_without_secondary() {
        let result = dispatcher(RecordingBackend::failing("zebra")).dispatch(&sample_record(1));
        assert_eq!(result.status, CombinedStatus::PrintFailed);
        assert_eq!(result.primary.status, OutcomeStatus::Failed);
        assert!(result.primary.error_detail.is_some());
    }

    #[test]
    fn test_disabled_secondary_is_skipped() {
        let secondary = RecordingBackend::ok("pcb");
        let mut dispatcher = dispatcher(RecordingBackend::ok("zebra"))
            .with_secondary(secondary.clone(), LabelStock::PCB_40X20);
        dispatcher.set_secondary_enabled(false);
        assert!(!dispatcher.secondary_enabled());

        let result = dispatcher.dispatch(&sample_record(1));
        assert_eq!(result.status, CombinedStatus::Success);
        assert_eq!(result.secondary.unwrap().status, OutcomeStatus::Skipped);
        assert_eq!(secondary.job_count(), 0);
    }

    #[test]
    fn test_hung_secondary_does_not_block_primary_submission() {
        let (release, gate) = mpsc::channel();
        let primary = RecordingBackend::ok("zebra");
        let dispatcher = Arc::new(
            dispatcher(primary.clone())
                .with_secondary(RecordingBackend::gated("pcb", gate), LabelStock::PCB_40X20),
        );

        let worker = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.dispatch(&sample_record(1)))
        };

        // The primary job lands while the secondary is still stuck
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while primary.job_count() == 0 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(primary.job_count(), 1);
        assert!(!worker.is_finished());

        release.send(()).unwrap();
        let result = worker.join().unwrap();
        assert_eq!(result.status, CombinedStatus::SuccessWithSecondary);
    }

    #[test]
    fn test_hung_primary_holds_dispatch_until_released() {
        let (release, gate) = mpsc::channel();
        let dispatcher = Arc::new(dispatcher(RecordingBackend::gated("zebra", gate)));
        let worker = {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.dispatch(&sample_record(1)))
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!worker.is_finished());

        drop(release);
        let result = worker.join().unwrap();
        assert_eq!(result.status, CombinedStatus::Success);
    }

    #[test]
    fn test_derive_table() {
        let ok = PrintOutcome::new("a", OutcomeStatus::Success, String::new(), None);
        let failed = PrintOutcome::new("a", OutcomeStatus::Failed, String::new(), None);
        let skipped = PrintOutcome::skipped("b");

        assert_eq!(CombinedStatus::derive(&ok, None), CombinedStatus::Success);
        assert_eq!(CombinedStatus::derive(&ok, Some(&skipped)), CombinedStatus::Success);
        assert_eq!(CombinedStatus::derive(&ok, Some(&ok)), CombinedStatus::SuccessWithSecondary);
        assert_eq!(
            CombinedStatus::derive(&ok, Some(&failed)),
            CombinedStatus::SuccessSecondaryFailed
        );
        for secondary in [None, Some(&ok), Some(&failed), Some(&skipped)] {
            assert_eq!(CombinedStatus::derive(&failed, secondary), CombinedStatus::PrintFailed);
        }
    }

    #[test]
    fn test_resubmit_sends_payload_verbatim() {
        let primary = RecordingBackend::ok("zebra");
        let outcome = dispatcher(primary.clone()).resubmit("^XA^XZ".to_string());
        assert!(outcome.is_success());
        assert_eq!(primary.jobs.lock().unwrap().as_slice(), &["^XA^XZ".to_string()]);
    }

    struct PanickingBackend;

    impl PrintBackend for PanickingBackend {
        fn id(&self) -> &str {
            "broken"
        }

        fn submit(&self, _payload: &[u8]) -> Result<(), LabelfeedError> {
            panic!("driver bug")
        }
    }

    #[test]
    fn test_primary_panic_becomes_failed_outcome() {
        let secondary = RecordingBackend::ok("pcb");
        let result = Dispatcher::new(
            Arc::new(PanickingBackend),
            Arc::new(PlaceholderRenderer),
            LabelTemplate::device_label(),
        )
        .with_secondary(secondary.clone(), LabelStock::PCB_40X20)
        .dispatch(&sample_record(60000));

        assert_eq!(result.status, CombinedStatus::PrintFailed);
        assert_eq!(result.primary.backend_id, "broken");
        assert_eq!(result.primary.error_detail.as_deref(), Some("primary backend panicked"));
        assert_eq!(secondary.job_count(), 1);
    }
}
