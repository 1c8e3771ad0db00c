//! Transport-agnostic streaming execution protocol
//!
//! Defines the tagged message types exchanged with a peer running a job in
//! streaming mode, plus the combined output budget shared across stdout and
//! stderr for the lifetime of a stage. [`crate::job::Job::run_streaming`]
//! drives the actual event loop; this module only owns the wire vocabulary
//! and the budget primitive, so that a transport adapter (WebSocket, raw
//! TCP, an in-process channel) can plug in its own [`EventSink`] and
//! [`ClientMessageSource`] without this crate knowing about it.

use tokio::sync::Mutex;

/// Which stage of the compile→run pipeline a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compile,
    Run,
}

/// Which I/O stream a chunk of data belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioStream {
    Stdin,
    Stdout,
    Stderr,
}

/// Signals a peer may forward to the sandboxed process root. Isolate only
/// exposes SIGKILL unconditionally; INT and TERM are delivered via `kill`
/// against the reported PID (see [`crate::isolate::IsolateProcess::signal`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardableSignal {
    Int,
    Term,
    Kill,
}

impl ForwardableSignal {
    /// Signal name as accepted by `kill -<name>`, without the `SIG` prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "INT",
            Self::Term => "TERM",
            Self::Kill => "KILL",
        }
    }
}

/// A message a client sends while a job is running.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// stdin bytes for the currently running stage.
    Data { stream: StdioStream, data: Vec<u8> },
    /// Forward a signal to the sandboxed process root.
    Signal(ForwardableSignal),
}

/// A message the engine sends while driving a job.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    /// Resolved runtime, sent once immediately after init.
    Runtime { language: String, version: String },
    /// Acknowledges a successful init; the pipeline is about to start.
    InitAck,
    /// A stage (compile or run) is starting.
    StageStart { stage: Stage },
    /// A chunk of stdout or stderr produced by the running stage.
    Data { stream: StdioStream, data: Vec<u8> },
    /// A stage finished, with its process exit code (128+signal if killed).
    StageEnd { stage: Stage, code: i32 },
    /// A non-fatal or fatal protocol/execution error.
    Error { message: String },
}

/// Destination for server-to-client messages. Implemented by whatever
/// transport adapter embeds this crate (WebSocket frame writer, SSE
/// encoder, in-process channel, ...).
pub trait EventSink: Send {
    type Error: std::fmt::Display + Send + 'static;

    /// Deliver one message, in order, to the peer.
    async fn send(&mut self, message: ServerMessage) -> Result<(), Self::Error>;
}

/// Source of client-to-server messages. `recv` returning `None` means the
/// peer has disconnected; the job keeps draining output but stops accepting
/// further stdin or signals.
pub trait ClientMessageSource: Send {
    async fn recv(&mut self) -> Option<ClientMessage>;
}

/// Combined stdout+stderr byte budget shared by both streams of one stage.
///
/// Mirrors the batch-mode truncation rule (§ see [`crate::job`]): once the
/// running total would exceed `max`, the overflowing chunk is trimmed to
/// exactly reach the ceiling and every call after that returns an empty
/// chunk. The caller is responsible for emitting the overflow error and
/// killing the process exactly once, triggered by the first call whose
/// `exceeded` flag comes back `true`.
#[derive(Debug)]
pub struct OutputBudget {
    max: u64,
    used: Mutex<u64>,
    exceeded: std::sync::atomic::AtomicBool,
}

impl OutputBudget {
    pub fn new(max: u64) -> Self {
        Self {
            max,
            used: Mutex::new(0),
            exceeded: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Admit `chunk` against the shared budget. Returns the (possibly
    /// truncated) bytes to forward, and whether this call is the one that
    /// first pushed the budget over its ceiling.
    pub async fn admit(&self, chunk: &[u8]) -> (Vec<u8>, bool) {
        use std::sync::atomic::Ordering;

        if self.exceeded.load(Ordering::Acquire) {
            return (Vec::new(), false);
        }

        let mut used = self.used.lock().await;
        let remaining = self.max.saturating_sub(*used);
        if (chunk.len() as u64) <= remaining {
            *used += chunk.len() as u64;
            (chunk.to_vec(), false)
        } else {
            let take = remaining as usize;
            *used = self.max;
            let first_time = !self.exceeded.swap(true, Ordering::AcqRel);
            (chunk[..take].to_vec(), first_time)
        }
    }
}
