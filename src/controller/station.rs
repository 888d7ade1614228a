//! # Station
//!
//! Wires the reader, the controller and observers together.
//!
//! ## Threads
//!
//! ```text
//!  ┌──────────────┐  Ingested   ┌──────────────────┐  StationEvent
//!  │ "ingest"     │────────────▶│ "controller"     │──────────────▶ observers
//!  │ reader+parser│             │ ModeController   │  (broadcast)
//!  └──────────────┘   Command   │ dispatch + audit │
//!  StationHandle ──────────────▶│                  │
//!        ▲         oneshot reply└────────┬─────────┘
//!        └───────────────────────────────┘
//! ```
//!
//! The ingest thread only reads, parses and forwards; it never waits on a
//! printer or the log. The controller thread is the single consumer of the
//! inbox, so operator commands and ingested fragments are handled strictly
//! one at a time and the queue needs no lock.
//!
//! ## Stop
//!
//! `Stop` raises the reader's stop flag, joins the ingest thread (the serial
//! port is closed when the join returns), then processes every fragment that
//! was already forwarded, in the current mode, before replying.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tokio::sync::{broadcast, mpsc, oneshot};

use super::{CommandReply, ModeController, OperatorCommand, StationEvent};
use crate::error::{LabelfeedError, ParseError};
use crate::ingest::{ByteSource, ReaderSettings, StreamReader};
use crate::parser::Parser;
use crate::record::{DeviceFields, Fragment};

/// Opens a fresh byte source every time ingestion starts.
pub trait SourceFactory: Send + 'static {
    fn open(&mut self) -> Result<Box<dyn ByteSource>, LabelfeedError>;
}

impl<F> SourceFactory for F
where
    F: FnMut() -> Result<Box<dyn ByteSource>, LabelfeedError> + Send + 'static,
{
    fn open(&mut self) -> Result<Box<dyn ByteSource>, LabelfeedError> {
        self()
    }
}

type Reply = oneshot::Sender<Result<CommandReply, LabelfeedError>>;

enum Ingested {
    Fragment {
        fragment: Fragment,
        parsed: Result<DeviceFields, ParseError>,
    },
    Halted {
        error: String,
    },
}

enum Inbox {
    Ingested(Ingested),
    Command(OperatorCommand, Reply),
    Shutdown,
}

// ============================================================================
// HANDLE
// ============================================================================

/// Cheap, cloneable access to a running station.
#[derive(Clone)]
pub struct StationHandle {
    inbox: mpsc::UnboundedSender<Inbox>,
    events: broadcast::Sender<StationEvent>,
}

impl StationHandle {
    /// Send a command and wait for its reply.
    pub async fn send(&self, command: OperatorCommand) -> Result<CommandReply, LabelfeedError> {
        let (reply, response) = oneshot::channel();
        self.post(command, reply)?;
        response.await.map_err(|_| stopped())?
    }

    /// Blocking variant of [`StationHandle::send`] for non-async callers.
    ///
    /// Must not be called from within an async runtime thread.
    pub fn send_blocking(&self, command: OperatorCommand) -> Result<CommandReply, LabelfeedError> {
        let (reply, response) = oneshot::channel();
        self.post(command, reply)?;
        response.blocking_recv().map_err(|_| stopped())?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.events.subscribe()
    }

    fn post(&self, command: OperatorCommand, reply: Reply) -> Result<(), LabelfeedError> {
        self.inbox
            .send(Inbox::Command(command, reply))
            .map_err(|_| stopped())
    }
}

fn stopped() -> LabelfeedError {
    LabelfeedError::InvalidStateTransition("station has shut down".to_string())
}

// ============================================================================
// STATION
// ============================================================================

/// Owner of the controller thread.
pub struct Station {
    handle: StationHandle,
    controller: Option<JoinHandle<usize>>,
}

impl Station {
    /// Start the controller thread. Ingestion starts on the first `Start`.
    pub fn spawn(
        core: ModeController,
        parser: Parser,
        reader: ReaderSettings,
        sources: impl SourceFactory,
    ) -> Result<Self, LabelfeedError> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let handle = StationHandle {
            inbox: inbox_tx.clone(),
            events: core.event_sender(),
        };

        let controller = ControllerLoop {
            core,
            inbox: inbox_rx,
            sender: inbox_tx,
            deferred: VecDeque::new(),
            worker: None,
            sources: Box::new(sources),
            parser,
            reader,
        };
        let join = thread::Builder::new()
            .name("controller".to_string())
            .spawn(move || controller.run())?;

        Ok(Self {
            handle,
            controller: Some(join),
        })
    }

    pub fn handle(&self) -> StationHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StationEvent> {
        self.handle.subscribe()
    }

    /// Stop ingestion, log leftover queue items as discarded and join the
    /// controller thread. Returns how many items were discarded.
    pub fn shutdown(mut self) -> usize {
        self.finish()
    }

    fn finish(&mut self) -> usize {
        let Some(join) = self.controller.take() else {
            return 0;
        };
        let _ = self.handle.inbox.send(Inbox::Shutdown);
        join.join().unwrap_or_else(|_| {
            tracing::error!("controller thread panicked");
            0
        })
    }
}

impl Drop for Station {
    fn drop(&mut self) {
        self.finish();
    }
}

// ============================================================================
// CONTROLLER THREAD
// ============================================================================

struct IngestWorker {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl IngestWorker {
    fn halt(self) {
        self.stop.store(true, Ordering::Release);
        if self.join.join().is_err() {
            tracing::error!("ingest thread panicked");
        }
    }
}

struct ControllerLoop {
    core: ModeController,
    inbox: mpsc::UnboundedReceiver<Inbox>,
    sender: mpsc::UnboundedSender<Inbox>,
    /// Commands that arrived while a stop was draining
    deferred: VecDeque<Inbox>,
    worker: Option<IngestWorker>,
    sources: Box<dyn SourceFactory>,
    parser: Parser,
    reader: ReaderSettings,
}

impl ControllerLoop {
    fn run(mut self) -> usize {
        loop {
            let message = match self.deferred.pop_front() {
                Some(message) => message,
                None => match self.inbox.blocking_recv() {
                    Some(message) => message,
                    None => break,
                },
            };
            match message {
                Inbox::Ingested(ingested) => self.ingested(ingested),
                Inbox::Command(command, reply) => {
                    let _ = reply.send(self.command(command));
                }
                Inbox::Shutdown => break,
            }
        }

        if self.core.ingesting() {
            let _ = self.stop();
        } else if let Some(worker) = self.worker.take() {
            worker.halt();
        }
        self.core.shutdown()
    }

    fn ingested(&mut self, ingested: Ingested) {
        match ingested {
            Ingested::Fragment { fragment, parsed } => self.core.handle_fragment(fragment, parsed),
            Ingested::Halted { error } => {
                if let Some(worker) = self.worker.take() {
                    worker.halt();
                }
                self.core.connection_lost(error);
            }
        }
    }

    fn command(&mut self, command: OperatorCommand) -> Result<CommandReply, LabelfeedError> {
        match command {
            OperatorCommand::Start => self.start(),
            OperatorCommand::Stop => self.stop(),
            other => self.core.execute(other),
        }
    }

    fn start(&mut self) -> Result<CommandReply, LabelfeedError> {
        self.core.start_ingest()?;

        let source = match self.sources.open() {
            Ok(source) => source,
            Err(e) => {
                let _ = self.core.stop_ingest();
                return Err(e);
            }
        };
        let name = source.describe();

        let stop = Arc::new(AtomicBool::new(false));
        let spawned = {
            let stop = Arc::clone(&stop);
            let inbox = self.sender.clone();
            let parser = self.parser.clone();
            let reader = StreamReader::new(source, self.reader);
            thread::Builder::new()
                .name("ingest".to_string())
                .spawn(move || ingest(reader, &stop, &parser, &inbox))
        };
        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                let _ = self.core.stop_ingest();
                return Err(e.into());
            }
        };

        self.worker = Some(IngestWorker { stop, join });
        tracing::info!(source = %name, "ingestion started");
        let _ = self.core.event_sender().send(StationEvent::IngestStarted { source: name });
        Ok(CommandReply::Ack)
    }

    fn stop(&mut self) -> Result<CommandReply, LabelfeedError> {
        self.core.stop_ingest()?;
        if let Some(worker) = self.worker.take() {
            worker.halt();
        }
        self.drain();
        tracing::info!("ingestion stopped");
        let _ = self.core.event_sender().send(StationEvent::IngestStopped);
        Ok(CommandReply::Ack)
    }

    /// Process fragments already in the inbox; park everything else.
    fn drain(&mut self) {
        while let Ok(message) = self.inbox.try_recv() {
            match message {
                Inbox::Ingested(Ingested::Fragment { fragment, parsed }) => {
                    self.core.handle_fragment(fragment, parsed)
                }
                // The worker is already joined; only record the error
                Inbox::Ingested(Ingested::Halted { error }) => self.core.connection_lost(error),
                other => self.deferred.push_back(other),
            }
        }
    }
}

/// Body of the ingest thread.
fn ingest(
    reader: StreamReader<Box<dyn ByteSource>>,
    stop: &AtomicBool,
    parser: &Parser,
    inbox: &mpsc::UnboundedSender<Inbox>,
) {
    let result = reader.run(stop, |fragment| {
        let parsed = parser.parse(&fragment.text);
        let _ = inbox.send(Inbox::Ingested(Ingested::Fragment { fragment, parsed }));
    });
    if let Err(e) = result {
        let _ = inbox.send(Inbox::Ingested(Ingested::Halted {
            error: e.to_string(),
        }));
    }
}
