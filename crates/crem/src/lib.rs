//! Sandboxed multi-language code execution engine.
//!
//! `crem` provides an async Rust API for running untrusted code in isolated
//! sandboxes built on top of IOI Isolate. It layers a runtime registry and
//! package installer over the sandbox driver so that supported languages are
//! discovered from an on-disk install tree rather than compiled into the
//! binary, and wraps the whole pipeline in a concurrency-gated job core with
//! both batch and streaming execution contracts.
//!
//! # Features
//!
//! - **Sandboxed execution** — pool-based lifecycle for running untrusted code safely using Isolate.
//! - **Runtime registry** — discovers installed language runtimes from a data directory, with alias and semver resolution.
//! - **Package installer** — fetches, verifies, and unpacks language runtimes from a remote index.
//! - **Job core** — orchestrates the compile→run pipeline with an explicit state machine and per-request limit validation.
//! - **Concurrency gate** — bounds how many jobs run at once and tracks live jobs for cancellation.
//! - **Streaming protocol** — transport-agnostic tagged event stream for interactive execution.
//! - **Resource limits** — enforce CPU time, memory, wall time, processes, and output constraints.
//! - **cgroup v2 support** — memory limiting in container environments.

pub use concurrency::{ConcurrencyGate, GateError, JobId, JobPermit};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG, Language};
pub use isolate::{BoxPool, IsolateBox, IsolateError, prepare_cgroup};
pub use job::{Encoding, Job, JobError, JobOutcome, JobState, RunRequest, SourceFile, StageResult};
pub use package::{InstallError, Installer, PackageIndexEntry};
pub use runner::{
    CompileAndRunError, CompileAndRunRequest, CompileError, CompileResult, ExecuteError,
    InteractiveError, InteractiveEvent, InteractiveEventStream, InteractiveSession,
    InteractiveSessionHandle, Runner,
};
pub use runtime::{PackageInfo, RegistryError, Runtime, RuntimeRegistry};
pub use streaming::{
    ClientMessage, ClientMessageSource, EventSink, ForwardableSignal, OutputBudget, ServerMessage,
    Stage, StdioStream,
};
pub use types::{ExecutionResult, ExecutionStatus, LimitExceeded, MountConfig, ResourceLimits};

pub mod concurrency;
pub mod config;
pub mod isolate;
pub mod job;
pub mod package;
pub mod runner;
pub mod runtime;
pub mod streaming;
pub mod types;
