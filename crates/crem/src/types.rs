use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU time limit in seconds
    #[serde(default)]
    pub time_limit: Option<f64>,

    /// Wall clock time limit in seconds
    #[serde(default)]
    pub wall_time_limit: Option<f64>,

    /// Memory limit in kilobytes
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Stack size limit in kilobytes
    #[serde(default)]
    pub stack_limit: Option<u64>,

    /// Maximum number of processes/threads
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Maximum output size in kilobytes
    #[serde(default)]
    pub max_output: Option<u64>,

    /// Maximum open files
    #[serde(default)]
    pub max_open_files: Option<u32>,

    /// Extra time before killing (grace period) in seconds
    #[serde(default)]
    pub extra_time: Option<f64>,
}

impl ResourceLimits {
    /// 1 kilobyte in bytes
    pub const KB: u64 = 1;
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;
    /// 1 gigabyte in kilobytes
    pub const GB: u64 = 1024 * 1024;

    /// Create new resource limits with all fields set to None
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the CPU time limit in seconds
    pub fn with_time_limit(mut self, seconds: f64) -> Self {
        self.time_limit = Some(seconds);
        self
    }

    /// Set the wall clock time limit in seconds
    pub fn with_wall_time_limit(mut self, seconds: f64) -> Self {
        self.wall_time_limit = Some(seconds);
        self
    }

    /// Set the memory limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the stack size limit in kilobytes
    pub fn with_stack_limit(mut self, kb: u64) -> Self {
        self.stack_limit = Some(kb);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the maximum output size in kilobytes
    pub fn with_max_output(mut self, kb: u64) -> Self {
        self.max_output = Some(kb);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    ///
    /// Returns a new ResourceLimits with values from `overrides` taking precedence
    /// over values from `self` when both are present.
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            time_limit: overrides.time_limit.or(self.time_limit),
            wall_time_limit: overrides.wall_time_limit.or(self.wall_time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            stack_limit: overrides.stack_limit.or(self.stack_limit),
            max_processes: overrides.max_processes.or(self.max_processes),
            max_output: overrides.max_output.or(self.max_output),
            max_open_files: overrides.max_open_files.or(self.max_open_files),
            extra_time: overrides.extra_time.or(self.extra_time),
        }
    }

    /// Check that every field set on `self` stays within the corresponding
    /// ceiling in `max`. A `None` ceiling means "unlimited" and always passes.
    ///
    /// Used to reject caller-supplied overrides before a box is ever
    /// allocated, so a request that asks for more than a runtime allows
    /// fails as a validation error rather than reaching the sandbox.
    pub fn validate_against(&self, max: &ResourceLimits) -> Result<(), String> {
        fn check<T: PartialOrd + std::fmt::Display>(
            name: &str,
            requested: Option<T>,
            ceiling: Option<T>,
        ) -> Result<(), String> {
            if let (Some(requested), Some(ceiling)) = (&requested, &ceiling)
                && requested > ceiling
            {
                return Err(format!(
                    "{name} {requested} exceeds maximum allowed {ceiling}"
                ));
            }
            Ok(())
        }

        check("time_limit", self.time_limit, max.time_limit)?;
        check("wall_time_limit", self.wall_time_limit, max.wall_time_limit)?;
        check("memory_limit", self.memory_limit, max.memory_limit)?;
        check("stack_limit", self.stack_limit, max.stack_limit)?;
        check("max_processes", self.max_processes, max.max_processes)?;
        check("max_output", self.max_output, max.max_output)?;
        check("max_open_files", self.max_open_files, max.max_open_files)?;
        check("extra_time", self.extra_time, max.extra_time)?;
        Ok(())
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            time_limit: Some(2.0),
            wall_time_limit: Some(5.0),
            memory_limit: Some(262144), // 256 MB
            stack_limit: Some(262144),  // 256 MB
            max_processes: Some(1),
            max_output: Some(65536), // 64 MB
            max_open_files: Some(64),
            extra_time: Some(0.5),
        }
    }
}

/// Result of an execution
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Execution status (matches IOI Isolate status codes)
    pub status: ExecutionStatus,

    /// Secondary status indicating which limit was exceeded (if any)
    pub limit_exceeded: LimitExceeded,

    /// CPU time used in seconds
    pub time: f64,

    /// Wall clock time used in seconds
    pub wall_time: f64,

    /// Peak memory usage in kilobytes (cg-mem preferred, fallback to max-rss)
    pub memory: u64,

    /// cgroup memory in kilobytes (includes page cache).
    /// None if isolate didn't report cg-mem.
    pub cg_memory: Option<u64>,

    /// Peak resident set size in kilobytes (process-only).
    /// None if isolate didn't report max-rss.
    pub max_rss: Option<u64>,

    /// Exit code if the program exited normally
    pub exit_code: Option<i32>,

    /// Signal number if the program was killed by a signal
    pub signal: Option<i32>,

    /// Additional message from isolate
    pub message: Option<String>,

    /// Standard output (if captured)
    pub stdout: Option<Vec<u8>>,

    /// Standard error (if captured)
    pub stderr: Option<Vec<u8>>,
}

impl ExecutionResult {
    /// Check if the execution was successful (exited with code 0)
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, ExecutionStatus::Ok) && self.exit_code == Some(0)
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            status: ExecutionStatus::Ok,
            limit_exceeded: LimitExceeded::NotExceeded,
            time: 0.0,
            wall_time: 0.0,
            memory: 0,
            cg_memory: None,
            max_rss: None,
            exit_code: None,
            signal: None,
            message: None,
            stdout: None,
            stderr: None,
        }
    }
}

/// Status of an execution
/// Corresponds to IOI Isolate two-letter status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Program exited normally
    #[serde(rename = "OK")]
    Ok,

    /// Runtime error (non-zero exit code)
    #[serde(rename = "RE")]
    RuntimeError,

    /// Time limit exceeded
    #[serde(rename = "TO")]
    TimeLimitExceeded,

    /// Program was killed by a signal
    #[serde(rename = "SG")]
    Signaled,

    /// Output limit exceeded (stdout/stderr capture over budget)
    #[serde(rename = "OL")]
    OutputLimitExceeded,

    /// Execution limit exceeded (other box-level limit, e.g. mem/proc ceiling)
    #[serde(rename = "EL")]
    ExecutionLimitExceeded,

    /// Internal error in Isolate
    #[serde(rename = "XX")]
    InternalError,
}

impl ExecutionStatus {
    /// Parse status from isolate meta file status string
    pub fn from_isolate_status(status: &str) -> Self {
        match status {
            "OK" => ExecutionStatus::Ok,
            "RE" => ExecutionStatus::RuntimeError,
            "TO" => ExecutionStatus::TimeLimitExceeded,
            "SG" => ExecutionStatus::Signaled,
            "OL" => ExecutionStatus::OutputLimitExceeded,
            "EL" => ExecutionStatus::ExecutionLimitExceeded,
            "XX" => ExecutionStatus::InternalError,
            _ => ExecutionStatus::InternalError,
        }
    }

    /// Whether isolate forces a SIGKILL on this status regardless of what
    /// `exitsig` reports (time, output and execution limit kills).
    pub fn forces_sigkill(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::TimeLimitExceeded
                | ExecutionStatus::OutputLimitExceeded
                | ExecutionStatus::ExecutionLimitExceeded
        )
    }

    /// Two-letter isolate status code, the inverse of [`Self::from_isolate_status`].
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionStatus::Ok => "OK",
            ExecutionStatus::RuntimeError => "RE",
            ExecutionStatus::TimeLimitExceeded => "TO",
            ExecutionStatus::Signaled => "SG",
            ExecutionStatus::OutputLimitExceeded => "OL",
            ExecutionStatus::ExecutionLimitExceeded => "EL",
            ExecutionStatus::InternalError => "XX",
        }
    }
}

/// Signal number isolate reports for a forced kill on a limit-exceeded status.
pub const SIGKILL: i32 = 9;

/// Secondary status indicating which resource limit was exceeded.
/// This provides more detail beyond the basic ExecutionStatus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LimitExceeded {
    /// No limit was exceeded
    #[default]
    #[serde(rename = "none")]
    NotExceeded,

    /// CPU time limit exceeded (TLE)
    #[serde(rename = "time")]
    Time,

    /// Wall clock time limit exceeded
    #[serde(rename = "wall_time")]
    WallTime,

    /// Memory limit exceeded (MLE)
    #[serde(rename = "memory")]
    Memory,

    /// Output limit exceeded (OLE)
    #[serde(rename = "output")]
    Output,
}

impl LimitExceeded {
    /// Infer which limit was exceeded from isolate's message field
    pub fn from_message(message: Option<&str>) -> Self {
        let Some(msg) = message else {
            return LimitExceeded::NotExceeded;
        };

        let msg_lower = msg.to_lowercase();

        if msg_lower.contains("time limit") {
            if msg_lower.contains("wall") {
                LimitExceeded::WallTime
            } else {
                LimitExceeded::Time
            }
        } else if msg_lower.contains("memory") || msg_lower.contains("out of memory") {
            LimitExceeded::Memory
        } else if msg_lower.contains("output") {
            LimitExceeded::Output
        } else {
            LimitExceeded::NotExceeded
        }
    }

    /// Check if any limit was exceeded
    #[must_use]
    pub fn is_exceeded(&self) -> bool {
        !matches!(self, LimitExceeded::NotExceeded)
    }
}

/// Configuration for a directory mount in Isolate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Source path on the host
    pub source: String,

    /// Target path in the sandbox
    pub target: String,

    /// Whether the mount is read-write (default: read-only)
    #[serde(default)]
    pub writable: bool,

    /// Whether this mount is optional (don't fail if source doesn't exist)
    /// Maps to isolate's `:maybe` flag
    #[serde(default)]
    pub optional: bool,

    /// Disallow executing binaries from this mount.
    /// Maps to isolate's `:noexec` flag.
    #[serde(default)]
    pub noexec: bool,
}
