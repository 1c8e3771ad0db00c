//! Command builder for the Isolate CLI
//!
//! Builds command-line arguments for the Isolate sandbox tool.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::{MountConfig, ResourceLimits};

/// Builder for Isolate command-line arguments
#[derive(Debug)]
pub struct IsolateCommand {
    /// Path to Isolate binary
    isolate_path: PathBuf,
    /// One of --init, --run, --cleanup
    action: IsolateAction,
    /// -b, --box-id
    box_id: u32,
    /// Resource limits
    limits: ResourceLimits,
    mounts: Vec<MountConfig>,
    /// -E, --env
    env: HashMap<String, String>,
    env_inherit: Vec<String>,
    /// -e, --full-env
    full_env: bool,
    /// -M, --meta
    meta_file: Option<PathBuf>,
    /// -i, --stdin
    stdin: Option<PathBuf>,
    /// -o, --stdout
    stdout: Option<PathBuf>,
    /// -r, --stderr
    stderr: Option<PathBuf>,
    working_dir: Option<String>,
    command: Vec<String>,
    cgroup: bool,
    /// --share-net
    share_net: bool,
    /// -s, --silent
    silent: bool,
}

impl IsolateCommand {
    /// Create a new isolate command builder
    pub fn new(isolate_path: impl Into<PathBuf>, box_id: u32) -> Self {
        Self {
            isolate_path: isolate_path.into(),
            action: IsolateAction::Run,
            box_id,
            limits: ResourceLimits::default(),
            mounts: Vec::new(),
            env: HashMap::new(),
            env_inherit: Vec::new(),
            full_env: false,
            meta_file: None,
            stdin: None,
            stdout: None,
            stderr: None,
            working_dir: None,
            command: Vec::new(),
            cgroup: false,
            share_net: false,
            silent: false,
        }
    }

    /// Set the action to perform
    pub fn action(mut self, action: IsolateAction) -> Self {
        self.action = action;
        self
    }

    /// Set resource limits
    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Add a directory mount
    pub fn mount(mut self, mount: MountConfig) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Add multiple directory mounts
    pub fn mounts(mut self, mounts: impl IntoIterator<Item = MountConfig>) -> Self {
        self.mounts.extend(mounts);
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Inherit an environment variable from the parent process
    pub fn env_inherit(mut self, key: impl Into<String>) -> Self {
        self.env_inherit.push(key.into());
        self
    }

    /// Set the meta file path for execution results
    pub fn meta_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.meta_file = Some(path.into());
        self
    }

    /// Set stdin file path
    pub fn stdin(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Set stdout file path
    pub fn stdout(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    /// Set stderr file path
    pub fn stderr(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr = Some(path.into());
        self
    }

    /// Set the working directory inside the sandbox
    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set the command to run
    pub fn command(mut self, cmd: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.command = cmd.into_iter().map(Into::into).collect();
        self
    }

    /// Enable full environment (inherit all env vars)
    pub fn full_env(mut self, enable: bool) -> Self {
        self.full_env = enable;
        self
    }

    /// Enable cgroup support for memory limiting
    pub fn cgroup(mut self, enable: bool) -> Self {
        self.cgroup = enable;
        self
    }

    /// Give the sandboxed process access to the host network namespace
    pub fn share_net(mut self, enable: bool) -> Self {
        self.share_net = enable;
        self
    }

    /// Suppress isolate's own diagnostic output on stderr.
    pub fn silent(mut self, enable: bool) -> Self {
        self.silent = enable;
        self
    }

    /// Build the command-line arguments
    ///
    /// Consumes self to avoid cloning the command vector.
    pub fn build(self) -> Vec<String> {
        let mut args = vec![self.isolate_path.to_string_lossy().into_owned()];

        // Box ID
        args.push(format!("--box-id={}", self.box_id));

        // Cgroup support
        if self.cgroup {
            args.push("--cg".to_string());
        }

        match self.action {
            IsolateAction::Init => {
                args.push("--init".to_string());
            }
            IsolateAction::Cleanup => {
                args.push("--cleanup".to_string());
            }
            IsolateAction::Run => {
                args.push("--run".to_string());

                if self.share_net {
                    args.push("--share-net".to_string());
                }
                if self.silent {
                    args.push("-s".to_string());
                }

                // Resource limits
                if let Some(time) = self.limits.time_limit {
                    args.push(format!("--time={time}"));
                }
                if let Some(wall_time) = self.limits.wall_time_limit {
                    args.push(format!("--wall-time={wall_time}"));
                }
                if let Some(extra_time) = self.limits.extra_time {
                    args.push(format!("--extra-time={extra_time}"));
                }
                if let Some(memory) = self.limits.memory_limit {
                    if self.cgroup {
                        args.push(format!("--cg-mem={memory}"));
                    } else {
                        args.push(format!("--mem={memory}"));
                    }
                }
                if let Some(stack) = self.limits.stack_limit {
                    args.push(format!("--stack={stack}"));
                }
                if let Some(procs) = self.limits.max_processes {
                    args.push(format!("--processes={procs}"));
                }
                if let Some(fsize) = self.limits.max_output {
                    args.push(format!("--fsize={fsize}"));
                }
                if let Some(open_files) = self.limits.max_open_files {
                    args.push(format!("--open-files={open_files}"));
                }

                // Mounts
                for mount in &self.mounts {
                    // Skip optional mounts whose source doesn't exist
                    if mount.optional && !std::path::Path::new(&mount.source).exists() {
                        continue;
                    }
                    let mut opts = String::new();
                    if mount.writable {
                        opts.push_str(":rw");
                    }
                    if mount.optional {
                        opts.push_str(":maybe");
                    }
                    if mount.noexec {
                        opts.push_str(":noexec");
                    }
                    args.push(format!("--dir={}={}{}", mount.target, mount.source, opts));
                }

                // Environment
                if self.full_env {
                    args.push("--full-env".to_string());
                }
                for (key, value) in &self.env {
                    args.push(format!("--env={key}={value}"));
                }
                for key in &self.env_inherit {
                    args.push(format!("--env={key}"));
                }

                // Meta file
                if let Some(ref meta) = self.meta_file {
                    args.push(format!("--meta={}", meta.display()));
                }

                // I/O redirection
                if let Some(ref stdin) = self.stdin {
                    args.push(format!("--stdin={}", stdin.display()));
                }
                if let Some(ref stdout) = self.stdout {
                    args.push(format!("--stdout={}", stdout.display()));
                }
                if let Some(ref stderr) = self.stderr {
                    args.push(format!("--stderr={}", stderr.display()));
                }

                // Working directory
                if let Some(ref dir) = self.working_dir {
                    args.push(format!("--chdir={dir}"));
                }

                // Separator and command
                args.push("--".to_string());
                args.extend(self.command);
            }
        }

        args
    }

    /// Get the isolate binary path
    pub fn isolate_path(&self) -> &Path {
        &self.isolate_path
    }

    /// Get the box ID
    pub fn box_id(&self) -> u32 {
        self.box_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolateAction {
    /// Initialize a new box
    Init,
    /// Run a command in the box
    Run,
    /// Clean up a box
    Cleanup,
}
