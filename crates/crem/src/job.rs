//! Job core
//!
//! A `Job` owns one execution request end to end: it resolves a runtime,
//! decodes and validates the submitted files, clamps per-request resource
//! overrides against the runtime's configured ceilings, and drives the
//! compile→run pipeline across one or two Isolate boxes (one per stage for
//! compiled languages, so a miscompiled binary never shares a sandbox with
//! the process that runs it). This generalizes [`crate::runner`]'s single
//! free-function calls, which operate on one caller-supplied box, into the
//! full `Ready -> Primed -> Executed` state machine with package-driven
//! (rather than statically configured) compile/run commands.
//!
//! Validation always happens before any box is allocated: [`Job::new`]
//! eagerly resolves and checks both stages' limits, so a request that asks
//! for more than its runtime allows never touches the sandbox.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{instrument, warn};

use crate::concurrency::{ConcurrencyGate, GateError};
use crate::config::Config;
use crate::isolate::{
    self, IsolateAction, IsolateBox, IsolateCommand, IsolateError, IsolateProcess,
    run_batch as isolate_run_batch,
};
use crate::runtime::Runtime;
use crate::streaming::{
    ClientMessage, ClientMessageSource, EventSink, ForwardableSignal, OutputBudget,
    ServerMessage, Stage, StdioStream,
};
use crate::types::{ExecutionResult, MountConfig, ResourceLimits};

/// How a submitted file's `content` field is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Base64,
    Hex,
}

/// One file submitted as part of a run request. The first file (by
/// submission order) is the program's entry point.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Name inside the sandbox's `submission/` directory. Defaults to
    /// `main.<extension>` for the first file when absent.
    pub name: Option<String>,
    pub content: String,
    pub encoding: Encoding,
}

impl SourceFile {
    fn decode(&self) -> Result<Vec<u8>, JobError> {
        match self.encoding {
            Encoding::Utf8 => Ok(self.content.clone().into_bytes()),
            Encoding::Base64 => base64::engine::general_purpose::STANDARD
                .decode(&self.content)
                .map_err(|e| JobError::Validation(format!("invalid base64 file content: {e}"))),
            Encoding::Hex => decode_hex(&self.content)
                .map_err(|e| JobError::Validation(format!("invalid hex file content: {e}"))),
        }
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, String> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return Err("odd number of hex digits".to_owned());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| e.to_string()))
        .collect()
}

/// A request to run (and, if the language is compiled, first compile) a
/// submission against one installed runtime.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub files: Vec<SourceFile>,
    pub args: Vec<String>,
    pub stdin: Vec<u8>,
    pub compile_timeout_ms: Option<i64>,
    pub compile_cpu_time_ms: Option<i64>,
    pub compile_memory_limit_bytes: Option<i64>,
    pub run_timeout_ms: Option<i64>,
    pub run_cpu_time_ms: Option<i64>,
    pub run_memory_limit_bytes: Option<i64>,
}

/// Lifecycle state of a [`Job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Constructed and validated, no sandbox allocated yet.
    Ready,
    /// Files have been written into a box's `submission/` directory.
    Primed,
    /// The pipeline ran to completion (successfully or not).
    Executed,
    /// The pipeline was aborted by an error or cancellation.
    Terminated,
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Isolate(#[from] IsolateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event sink error: {0}")]
    Sink(String),

    #[error("concurrency gate error: {0}")]
    Gate(#[from] GateError),
}

/// Outcome of a stage (compile or run), in a transport-friendly shape.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Combined stdout+stderr, in capture order, capped at the same budget
    /// as the individual streams.
    pub output: Vec<u8>,
    pub exit_code: Option<i32>,
    pub signal: Option<String>,
    pub memory_bytes: u64,
    pub cpu_time_ms: u64,
    pub wall_time_ms: u64,
    pub status: &'static str,
    pub message: Option<String>,
}

impl StageResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && self.signal.is_none()
    }

    fn from_execution(result: ExecutionResult, budget: u64) -> Self {
        let stdout = result.stdout.unwrap_or_default();
        let stderr = result.stderr.unwrap_or_default();
        let output = combine_capped(&stdout, &stderr, budget);

        Self {
            stdout: cap(&stdout, budget),
            stderr: cap(&stderr, budget),
            output,
            exit_code: result.exit_code,
            signal: result.signal.map(isolate::signal_name),
            memory_bytes: result.memory.saturating_mul(1000),
            cpu_time_ms: (result.time * 1000.0).round() as u64,
            wall_time_ms: (result.wall_time * 1000.0).round() as u64,
            status: result.status.code(),
            message: result.message,
        }
    }
}

fn cap(data: &[u8], budget: u64) -> Vec<u8> {
    let n = (budget as usize).min(data.len());
    data[..n].to_vec()
}

fn combine_capped(stdout: &[u8], stderr: &[u8], budget: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity((budget as usize).min(stdout.len() + stderr.len()));
    for chunk in [stdout, stderr] {
        let remaining = (budget as usize).saturating_sub(out.len());
        if remaining == 0 {
            break;
        }
        let take = remaining.min(chunk.len());
        out.extend_from_slice(&chunk[..take]);
    }
    out
}

/// Outcome of a whole job: the compile stage (if the language has one) and
/// the run stage (absent if compilation failed).
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub language: String,
    pub version: String,
    pub compile: Option<StageResult>,
    pub run: Option<StageResult>,
}

/// Orchestrates one [`RunRequest`] against one resolved [`Runtime`].
pub struct Job {
    runtime: Arc<Runtime>,
    request: RunRequest,
    isolate_path: std::path::PathBuf,
    cgroup: bool,
    share_net: bool,
    sandbox_mounts: Vec<MountConfig>,
    process_limit_overrides: HashMap<String, ResourceLimits>,
    process_default_limits: ResourceLimits,
    output_max_bytes: u64,
    state: JobState,
}

impl Job {
    /// Construct and eagerly validate a job. Limit overrides that exceed
    /// the runtime's configured ceiling are rejected here, before any
    /// sandbox is allocated.
    pub fn new(runtime: Arc<Runtime>, request: RunRequest, config: &Config) -> Result<Self, JobError> {
        if request.files.is_empty() {
            return Err(JobError::Validation(
                "at least one source file is required".to_owned(),
            ));
        }
        for file in &request.files {
            if let Some(name) = &file.name
                && (name.contains("..") || name.starts_with('/'))
            {
                return Err(JobError::Validation(format!("invalid file name: {name}")));
            }
        }

        let output_max_bytes = runtime.output_max_bytes(config.output_max_bytes);

        let job = Self {
            runtime,
            request,
            isolate_path: config.isolate_binary(),
            cgroup: config.cgroup,
            share_net: !config.disable_networking,
            sandbox_mounts: config.sandbox_mounts.clone(),
            process_limit_overrides: config.limit_overrides.clone(),
            process_default_limits: config.default_limits.clone(),
            output_max_bytes,
            state: JobState::Ready,
        };

        job.effective_limits("compile")?;
        job.effective_limits("run")?;

        Ok(job)
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    fn effective_limits(&self, stage: &str) -> Result<ResourceLimits, JobError> {
        let ceiling = self.runtime.resolve_limits(
            stage,
            &self.process_limit_overrides,
            &self.process_default_limits,
        );
        match self.request_limits_for_stage(stage) {
            Some(requested) => {
                requested
                    .validate_against(&ceiling)
                    .map_err(JobError::Validation)?;
                Ok(ceiling.with_overrides(&requested))
            }
            None => Ok(ceiling),
        }
    }

    fn request_limits_for_stage(&self, stage: &str) -> Option<ResourceLimits> {
        let (wall_ms, cpu_ms, mem_bytes) = match stage {
            "compile" => (
                self.request.compile_timeout_ms,
                self.request.compile_cpu_time_ms,
                self.request.compile_memory_limit_bytes,
            ),
            _ => (
                self.request.run_timeout_ms,
                self.request.run_cpu_time_ms,
                self.request.run_memory_limit_bytes,
            ),
        };
        if wall_ms.is_none() && cpu_ms.is_none() && mem_bytes.is_none() {
            return None;
        }
        Some(ResourceLimits {
            wall_time_limit: wall_ms.and_then(ms_to_seconds),
            time_limit: cpu_ms.and_then(ms_to_seconds),
            memory_limit: mem_bytes.and_then(bytes_to_kb),
            stack_limit: None,
            max_processes: None,
            max_output: None,
            max_open_files: None,
            extra_time: None,
        })
    }

    fn resolved_file_name(&self, index: usize, file: &SourceFile) -> String {
        if let Some(name) = &file.name {
            return name.clone();
        }
        if index == 0 {
            format!("main.{}", self.runtime.language_config().extension)
        } else {
            format!("file{index}")
        }
    }

    async fn prime(&self, sandbox: &IsolateBox) -> Result<Vec<String>, JobError> {
        let mut names = Vec::with_capacity(self.request.files.len());
        for (index, file) in self.request.files.iter().enumerate() {
            let name = self.resolved_file_name(index, file);
            let bytes = file.decode()?;
            sandbox
                .write_file(&format!("submission/{name}"), &bytes)
                .await?;
            names.push(name);
        }
        Ok(names)
    }

    fn build_command(&self, box_id: u32, limits: ResourceLimits, argv: Vec<String>) -> IsolateCommand {
        let mut sandbox_limits = limits;
        sandbox_limits.wall_time_limit = sandbox_limits.wall_time_limit.map(ceil_seconds);
        sandbox_limits.time_limit = sandbox_limits.time_limit.map(ceil_seconds);
        sandbox_limits.extra_time = Some(0.0);

        let install_dir = self.runtime.install_dir().display().to_string();

        let mut command = IsolateCommand::new(&self.isolate_path, box_id)
            .action(IsolateAction::Run)
            .cgroup(self.cgroup)
            .silent(true)
            .share_net(self.share_net)
            .limits(sandbox_limits)
            .working_dir("/box/submission")
            .env("HOME", "/tmp")
            .env("LANGUAGE", self.runtime.language())
            .mount(MountConfig {
                source: install_dir.clone(),
                target: install_dir,
                writable: false,
                optional: false,
                noexec: false,
            })
            .mount(MountConfig {
                source: "/etc".to_owned(),
                target: "/etc".to_owned(),
                writable: false,
                optional: false,
                noexec: true,
            })
            .mounts(self.sandbox_mounts.iter().cloned())
            .command(argv);

        for (key, value) in self.runtime.env() {
            command = command.env(key, value);
        }
        command
    }

    fn stage_argv(&self, stage: &str, file_names: &[String]) -> Vec<String> {
        let script = format!("{}/{stage}", self.runtime.install_dir().display());
        let mut argv = vec!["/bin/bash".to_owned(), script];
        match stage {
            "compile" => argv.extend(file_names.iter().cloned()),
            _ => {
                argv.push(file_names[0].clone());
                argv.extend(self.request.args.iter().cloned());
            }
        }
        argv
    }

    /// Run the job to completion without any live interaction: compile (if
    /// applicable), then run, returning both stages' outcomes.
    #[instrument(skip(self, gate), fields(language = self.runtime.language()))]
    pub async fn run_batch(mut self, gate: &ConcurrencyGate) -> Result<JobOutcome, JobError> {
        let _permit = gate.acquire().await?;

        let compile_limits = self.effective_limits("compile")?;
        let run_limits = self.effective_limits("run")?;

        let mut boxes = vec![IsolateBox::init(gate.alloc_box_id(), &self.isolate_path, self.cgroup).await?];

        let file_names = match self.prime(&boxes[0]).await {
            Ok(names) => names,
            Err(e) => {
                cleanup_all(&mut boxes).await;
                self.state = JobState::Terminated;
                return Err(e);
            }
        };
        self.state = JobState::Primed;

        let language = self.runtime.language().to_owned();
        let version = self.runtime.version().to_string();

        if self.runtime.has_compile_stage() {
            let argv = self.stage_argv("compile", &file_names);
            let command = self.build_command(boxes[0].id(), compile_limits, argv);
            let compile_result = match isolate_run_batch(&boxes[0], command, None).await {
                Ok(r) => r,
                Err(e) => {
                    cleanup_all(&mut boxes).await;
                    self.state = JobState::Terminated;
                    return Err(e.into());
                }
            };
            let compile_stage = StageResult::from_execution(compile_result, self.output_max_bytes);

            if !compile_stage.succeeded() {
                cleanup_all(&mut boxes).await;
                self.state = JobState::Executed;
                return Ok(JobOutcome {
                    language,
                    version,
                    compile: Some(compile_stage),
                    run: None,
                });
            }

            let box_b = match IsolateBox::init(gate.alloc_box_id(), &self.isolate_path, self.cgroup).await {
                Ok(b) => b,
                Err(e) => {
                    cleanup_all(&mut boxes).await;
                    self.state = JobState::Terminated;
                    return Err(e.into());
                }
            };
            if let Err(e) = move_submission(&boxes[0], &box_b).await {
                boxes.push(box_b);
                cleanup_all(&mut boxes).await;
                self.state = JobState::Terminated;
                return Err(e);
            }
            if let Err(e) = boxes[0].cleanup().await {
                warn!(error = %e, "box cleanup failed");
            }
            boxes = vec![box_b];

            let argv = self.stage_argv("run", &file_names);
            let command = self.build_command(boxes[0].id(), run_limits, argv);
            let run_result = match isolate_run_batch(&boxes[0], command, Some(self.request.stdin.as_slice())).await {
                Ok(r) => r,
                Err(e) => {
                    cleanup_all(&mut boxes).await;
                    self.state = JobState::Terminated;
                    return Err(e.into());
                }
            };
            cleanup_all(&mut boxes).await;
            self.state = JobState::Executed;
            Ok(JobOutcome {
                language,
                version,
                compile: Some(compile_stage),
                run: Some(StageResult::from_execution(run_result, self.output_max_bytes)),
            })
        } else {
            let argv = self.stage_argv("run", &file_names);
            let command = self.build_command(boxes[0].id(), run_limits, argv);
            let run_result = match isolate_run_batch(&boxes[0], command, Some(self.request.stdin.as_slice())).await {
                Ok(r) => r,
                Err(e) => {
                    cleanup_all(&mut boxes).await;
                    self.state = JobState::Terminated;
                    return Err(e.into());
                }
            };
            cleanup_all(&mut boxes).await;
            self.state = JobState::Executed;
            Ok(JobOutcome {
                language,
                version,
                compile: None,
                run: Some(StageResult::from_execution(run_result, self.output_max_bytes)),
            })
        }
    }

    /// Run the job interactively: emits `Runtime`/`InitAck`, then drives each
    /// stage live, forwarding stdin and signals from `source` and streaming
    /// stdout/stderr to `sink` under a shared combined output budget.
    #[instrument(skip_all, fields(language = self.runtime.language()))]
    pub async fn run_streaming<S, C>(
        mut self,
        gate: &ConcurrencyGate,
        sink: &mut S,
        source: &mut C,
    ) -> Result<(), JobError>
    where
        S: EventSink,
        C: ClientMessageSource,
    {
        let _permit = gate.acquire().await?;

        let compile_limits = self.effective_limits("compile")?;
        let run_limits = self.effective_limits("run")?;

        emit(
            sink,
            ServerMessage::Runtime {
                language: self.runtime.language().to_owned(),
                version: self.runtime.version().to_string(),
            },
        )
        .await?;
        emit(sink, ServerMessage::InitAck).await?;

        let budget = OutputBudget::new(self.output_max_bytes);

        let mut boxes = vec![IsolateBox::init(gate.alloc_box_id(), &self.isolate_path, self.cgroup).await?];

        let file_names = match self.prime(&boxes[0]).await {
            Ok(names) => names,
            Err(e) => {
                cleanup_all(&mut boxes).await;
                self.state = JobState::Terminated;
                let _ = emit(sink, ServerMessage::Error { message: e.to_string() }).await;
                return Err(e);
            }
        };
        self.state = JobState::Primed;

        if self.runtime.has_compile_stage() {
            let argv = self.stage_argv("compile", &file_names);
            let command = self.build_command(boxes[0].id(), compile_limits, argv);
            let compile_result = self
                .run_stage_streaming(&boxes[0], Stage::Compile, command, &[], &budget, sink, source)
                .await;
            let compile_result = match compile_result {
                Ok(r) => r,
                Err(e) => {
                    cleanup_all(&mut boxes).await;
                    self.state = JobState::Terminated;
                    return Err(e);
                }
            };

            if compile_result.exit_code != Some(0) || compile_result.signal.is_some() {
                cleanup_all(&mut boxes).await;
                self.state = JobState::Executed;
                return Ok(());
            }

            let box_b = match IsolateBox::init(gate.alloc_box_id(), &self.isolate_path, self.cgroup).await {
                Ok(b) => b,
                Err(e) => {
                    cleanup_all(&mut boxes).await;
                    self.state = JobState::Terminated;
                    return Err(e.into());
                }
            };
            if let Err(e) = move_submission(&boxes[0], &box_b).await {
                boxes.push(box_b);
                cleanup_all(&mut boxes).await;
                self.state = JobState::Terminated;
                return Err(e);
            }
            if let Err(e) = boxes[0].cleanup().await {
                warn!(error = %e, "box cleanup failed");
            }
            boxes = vec![box_b];
        }

        let argv = self.stage_argv("run", &file_names);
        let command = self.build_command(boxes[0].id(), run_limits, argv);
        let run_result = self
            .run_stage_streaming(&boxes[0], Stage::Run, command, &self.request.stdin, &budget, sink, source)
            .await;
        cleanup_all(&mut boxes).await;
        self.state = JobState::Executed;
        run_result.map(|_| ())
    }

    async fn run_stage_streaming<S, C>(
        &self,
        sandbox: &IsolateBox,
        stage: Stage,
        command: IsolateCommand,
        initial_stdin: &[u8],
        budget: &OutputBudget,
        sink: &mut S,
        source: &mut C,
    ) -> Result<ExecutionResult, JobError>
    where
        S: EventSink,
        C: ClientMessageSource,
    {
        emit(sink, ServerMessage::StageStart { stage }).await?;

        let mut process = IsolateProcess::spawn(sandbox, command).await?;
        if !initial_stdin.is_empty() {
            let _ = process.write(initial_stdin).await;
        }

        let mut stdout = process
            .take_stdout()
            .ok_or_else(|| JobError::Validation("stdout not piped".to_owned()))?;
        let mut stderr = process
            .take_stderr()
            .ok_or_else(|| JobError::Validation("stderr not piped".to_owned()))?;

        let mut stdout_closed = false;
        let mut stderr_closed = false;
        let mut recv_open = true;
        let mut killed_for_output = false;
        let mut stdout_buf = [0u8; 8192];
        let mut stderr_buf = [0u8; 8192];

        while !(stdout_closed && stderr_closed) {
            tokio::select! {
                biased;

                result = stdout.read(&mut stdout_buf), if !stdout_closed => {
                    match result {
                        Ok(0) | Err(_) => stdout_closed = true,
                        Ok(n) => {
                            forward_chunk(StdioStream::Stdout, &stdout_buf[..n], budget, &mut process, &mut killed_for_output, sink).await?;
                        }
                    }
                }

                result = stderr.read(&mut stderr_buf), if !stderr_closed => {
                    match result {
                        Ok(0) | Err(_) => stderr_closed = true,
                        Ok(n) => {
                            forward_chunk(StdioStream::Stderr, &stderr_buf[..n], budget, &mut process, &mut killed_for_output, sink).await?;
                        }
                    }
                }

                incoming = source.recv(), if recv_open => {
                    match incoming {
                        Some(ClientMessage::Data { stream: StdioStream::Stdin, data }) => {
                            let _ = process.write(&data).await;
                        }
                        Some(ClientMessage::Data { .. }) => {}
                        Some(ClientMessage::Signal(signal)) => {
                            if signal == ForwardableSignal::Kill {
                                let _ = process.kill().await;
                            } else {
                                let _ = process.signal(signal.as_str()).await;
                            }
                        }
                        None => recv_open = false,
                    }
                }
            }
        }

        let result = process.wait().await?;
        let code = result
            .exit_code
            .unwrap_or_else(|| 128 + result.signal.unwrap_or(0));
        emit(sink, ServerMessage::StageEnd { stage, code }).await?;
        Ok(result)
    }
}

async fn forward_chunk<S: EventSink>(
    stream: StdioStream,
    chunk: &[u8],
    budget: &OutputBudget,
    process: &mut IsolateProcess,
    killed_for_output: &mut bool,
    sink: &mut S,
) -> Result<(), JobError> {
    let (bytes, first_exceeded) = budget.admit(chunk).await;
    if !bytes.is_empty() {
        emit(sink, ServerMessage::Data { stream, data: bytes }).await?;
    }
    if first_exceeded && !*killed_for_output {
        *killed_for_output = true;
        emit(
            sink,
            ServerMessage::Error {
                message: "output limit exceeded".to_owned(),
            },
        )
        .await?;
        let _ = process.kill().await;
    }
    Ok(())
}

async fn emit<S: EventSink>(sink: &mut S, message: ServerMessage) -> Result<(), JobError> {
    sink.send(message).await.map_err(|e| JobError::Sink(e.to_string()))
}

async fn cleanup_all(boxes: &mut [IsolateBox]) {
    for sandbox in boxes.iter_mut() {
        if let Err(e) = sandbox.cleanup().await {
            warn!(box_id = sandbox.id(), error = %e, "box cleanup failed");
        }
    }
}

async fn move_submission(from: &IsolateBox, to: &IsolateBox) -> Result<(), JobError> {
    let src = from.file_path("submission")?;
    let dst = to.file_path("submission")?;
    tokio::fs::rename(&src, &dst).await?;
    Ok(())
}

fn ceil_seconds(seconds: f64) -> f64 {
    seconds.max(0.0).ceil().max(1.0)
}

/// Wire-boundary conversion: non-positive or absent milliseconds mean
/// "unlimited" (omit the override); positive values round up to whole
/// seconds here so `ceil_seconds` never has to round a second time.
fn ms_to_seconds(ms: i64) -> Option<f64> {
    if ms <= 0 { None } else { Some((ms as f64 / 1000.0).max(1.0 / 1000.0)) }
}

fn bytes_to_kb(bytes: i64) -> Option<u64> {
    if bytes < 0 { None } else { Some((bytes as u64) / 1000) }
}
