//! Meta file parsing for isolate
//!
//! Parses the meta file produced by isolate after execution to extract
//! execution results like time used, memory used, and exit status.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use crate::isolate::IsolateError;
use crate::types::{ExecutionResult, ExecutionStatus, LimitExceeded};

/// Error that occurs during meta file parsing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("meta file parse error at line {line_number}: {message} (line: {line:?})")]
pub struct MetaParseError {
    /// Line number (1-indexed) where the error occurred
    pub line_number: usize,
    /// The problematic line content
    pub line: String,
    /// Description of the error
    pub message: String,
}

/// Parsed meta file from Isolate
#[derive(Debug, Clone, Default)]
pub struct MetaFile {
    /// Raw key-value pairs from the meta file
    pub entries: HashMap<String, String>,
}

impl MetaFile {
    /// Parse meta file content from a string
    ///
    /// This is a lenient parser that skips malformed lines. For strict parsing
    /// that reports errors, use [`try_parse`](Self::try_parse).
    pub fn parse(content: &str) -> Self {
        let mut entries = HashMap::new();

        // Meta-file entries are key-value pairs separated by colons
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                let key = key.trim();
                // Handle values that may contain colons (e.g., timestamps)
                // The value is everything after the first colon
                let value = value.trim();
                if !key.is_empty() {
                    entries.insert(key.to_string(), value.to_string());
                }
            }
        }

        Self { entries }
    }

    /// Parse meta file content with strict error handling
    ///
    /// Returns an error if any line is malformed (non-empty but missing colon).
    /// Empty lines are ignored.
    pub fn try_parse(content: &str) -> Result<Self, MetaParseError> {
        let mut entries = HashMap::new();

        for (line_idx, line) in content.lines().enumerate() {
            let line_number = line_idx + 1;
            let trimmed = line.trim();

            if trimmed.is_empty() {
                continue;
            }

            match trimmed.split_once(':') {
                Some((key, value)) => {
                    let key = key.trim();
                    let value = value.trim();

                    if key.is_empty() {
                        return Err(MetaParseError {
                            line_number,
                            line: line.to_string(),
                            message: "empty key before colon".to_string(),
                        });
                    }

                    entries.insert(key.to_string(), value.to_string());
                }
                None => {
                    return Err(MetaParseError {
                        line_number,
                        line: line.to_string(),
                        message: "missing colon separator".to_string(),
                    });
                }
            }
        }

        Ok(Self { entries })
    }

    /// Load and parse a meta file from disk
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IsolateError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(Self::parse(&content))
    }

    /// Load and parse a meta file from disk with strict error handling
    pub async fn try_load(path: impl AsRef<Path>) -> Result<Self, IsolateError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Self::try_parse(&content).map_err(|e| IsolateError::MetaParseFailed(e.to_string()))
    }

    /// Get a string value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Get a float value
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Get an integer value
    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Get an unsigned integer value
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    /// Get the execution status
    pub fn status(&self) -> ExecutionStatus {
        self.get("status")
            .map(ExecutionStatus::from_isolate_status)
            .unwrap_or(ExecutionStatus::Ok)
    }

    /// Get the CPU time used in seconds
    pub fn time(&self) -> f64 {
        self.get_f64("time").unwrap_or(0.0)
    }

    /// Get the wall clock time used in seconds
    pub fn wall_time(&self) -> f64 {
        self.get_f64("time-wall").unwrap_or(0.0)
    }

    /// Get the peak memory usage in kilobytes
    pub fn memory(&self) -> u64 {
        // Try cg-mem first (cgroup memory), then max-rss
        self.get_u64("cg-mem")
            .or_else(|| self.get_u64("max-rss"))
            .unwrap_or(0)
    }

    /// Get cgroup memory usage in kilobytes (cg-mem from isolate meta).
    /// Includes RSS + page cache + file-mapped memory for the entire cgroup.
    pub fn cg_memory(&self) -> Option<u64> {
        self.get_u64("cg-mem")
    }

    /// Get peak resident set size in kilobytes (max-rss from isolate meta).
    /// Measures only the process's own resident memory.
    pub fn max_rss(&self) -> Option<u64> {
        self.get_u64("max-rss")
    }

    /// Get the exit code
    pub fn exit_code(&self) -> Option<i32> {
        self.get_i32("exitcode")
    }

    /// Get the signal that killed the process
    pub fn signal(&self) -> Option<i32> {
        self.get_i32("exitsig")
    }

    /// Get the message from isolate
    pub fn message(&self) -> Option<String> {
        self.get("message").map(String::from)
    }

    /// Get whether the process was killed
    pub fn killed(&self) -> bool {
        self.get("killed").is_some()
    }

    /// Determine which limit was exceeded based on status and message
    pub fn limit_exceeded(&self) -> LimitExceeded {
        let status = self.status();
        let message = self.message();

        // First try to infer from the message
        let from_message = LimitExceeded::from_message(message.as_deref());
        if from_message.is_exceeded() {
            return from_message;
        }

        // If status is TO (timeout), it's a time limit issue
        match status {
            ExecutionStatus::TimeLimitExceeded => return LimitExceeded::Time,
            ExecutionStatus::OutputLimitExceeded => return LimitExceeded::Output,
            _ => {}
        }

        LimitExceeded::NotExceeded
    }

    /// Convert to an ExecutionResult
    ///
    /// Isolate always kills a box with SIGKILL on a TO/OL/EL status even when
    /// `exitsig` wasn't reported for that run, and never reports a meaningful
    /// exit code in that case.
    pub fn to_execution_result(&self) -> ExecutionResult {
        let status = self.status();
        let (exit_code, signal) = if status.forces_sigkill() {
            (None, Some(crate::types::SIGKILL))
        } else {
            (self.exit_code(), self.signal())
        };

        ExecutionResult {
            status,
            limit_exceeded: self.limit_exceeded(),
            time: self.time(),
            wall_time: self.wall_time(),
            memory: self.memory(),
            cg_memory: self.cg_memory(),
            max_rss: self.max_rss(),
            exit_code,
            signal,
            message: self.message(),
            stdout: None,
            stderr: None,
        }
    }
}
