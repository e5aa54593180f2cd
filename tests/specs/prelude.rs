// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for behavioral specs.
//!
//! Specs here are black-box: they spawn the real `rigd` and `rig-agent`
//! binaries against throwaway state directories and drive them with the
//! `rig` CLI, asserting on stdout, stderr, and exit codes only.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// Aggressive timeouts so specs fail fast instead of hanging.
// Do NOT change these to make a flaky spec pass.
const RIG_TIMEOUT_CONNECT_MS: &str = "2000";
const RIG_TIMEOUT_IPC_MS: &str = "2000";

/// Poll cadence for condition waits.
pub const SPEC_POLL_INTERVAL_MS: u64 = 25;
/// Ceiling for condition waits. Spec jobs run short phases; anything
/// slower than this is a hang, not a slow machine.
pub const SPEC_WAIT_MAX_MS: u64 = 30_000;

/// Returns the path to a workspace binary, preferring the llvm-cov
/// target directory when coverage is collecting.
fn binary_path(name: &str) -> PathBuf {
    let cov = PathBuf::from(format!("target/llvm-cov-target/debug/{name}"));
    if cov.exists() {
        return cov;
    }
    let debug = PathBuf::from(format!("target/debug/{name}"));
    if debug.exists() {
        return debug;
    }
    // Fall back to the directory holding the test executable itself
    // (target/debug/deps/.. -> target/debug).
    let mut path = std::env::current_exe().expect("current_exe");
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.join(name)
}

pub fn rig_binary() -> PathBuf {
    binary_path("rig")
}

pub fn rigd_binary() -> PathBuf {
    binary_path("rigd")
}

pub fn rig_agent_binary() -> PathBuf {
    binary_path("rig-agent")
}

/// Poll `condition` every [`SPEC_POLL_INTERVAL_MS`] until it returns
/// true or `timeout_ms` elapses. Returns whether it became true.
pub fn wait_for(timeout_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(SPEC_POLL_INTERVAL_MS));
    }
}

/// Entry point for CLI assertions: `cli().args(&["jobs"]).passes()`.
pub fn cli() -> CliBuilder {
    CliBuilder::new()
}

pub struct CliBuilder {
    args: Vec<String>,
    envs: Vec<(String, String)>,
    stdin: Option<String>,
}

impl CliBuilder {
    fn new() -> Self {
        Self {
            args: Vec::new(),
            envs: vec![
                ("RIG_TIMEOUT_CONNECT_MS".into(), RIG_TIMEOUT_CONNECT_MS.into()),
                ("RIG_TIMEOUT_IPC_MS".into(), RIG_TIMEOUT_IPC_MS.into()),
            ],
            stdin: None,
        }
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn env(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.envs.push((key.into(), value.as_ref().into()));
        self
    }

    /// Feed `content` to the command on stdin (for `rig submit -`).
    pub fn stdin(mut self, content: &str) -> Self {
        self.stdin = Some(content.to_string());
        self
    }

    fn run(self) -> Output {
        let mut cmd = Command::new(rig_binary());
        cmd.args(&self.args);
        // The parent environment must not steer specs to a shared broker.
        cmd.env_remove("RIG_BROKER");
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        match self.stdin {
            Some(content) => {
                cmd.stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
                let mut child = cmd.spawn().expect("rig should spawn");
                child
                    .stdin
                    .take()
                    .expect("piped stdin")
                    .write_all(content.as_bytes())
                    .expect("write stdin");
                child.wait_with_output().expect("rig should run")
            }
            None => cmd.output().expect("rig should run"),
        }
    }

    /// Run and assert exit code 0.
    pub fn passes(self) -> RunAssert {
        let args = self.args.clone();
        let output = self.run();
        assert!(
            output.status.success(),
            "expected `rig {}` to pass\nstdout:\n{}\nstderr:\n{}",
            args.join(" "),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
        RunAssert { output }
    }

    /// Run and assert a non-zero exit code.
    pub fn fails(self) -> RunAssert {
        let args = self.args.clone();
        let output = self.run();
        assert!(
            !output.status.success(),
            "expected `rig {}` to fail\nstdout:\n{}\nstderr:\n{}",
            args.join(" "),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
        RunAssert { output }
    }

    /// Run without asserting; for `wait_for` conditions.
    pub fn succeeds(self) -> bool {
        self.run().status.success()
    }

    /// Run without asserting and return stdout; for `wait_for` conditions.
    pub fn stdout_of(self) -> String {
        String::from_utf8_lossy(&self.run().stdout).into_owned()
    }
}

pub struct RunAssert {
    output: Output,
}

impl RunAssert {
    pub fn stdout(&self) -> String {
        String::from_utf8_lossy(&self.output.stdout).into_owned()
    }

    pub fn stderr(&self) -> String {
        String::from_utf8_lossy(&self.output.stderr).into_owned()
    }

    pub fn stdout_eq(self, expected: &str) -> Self {
        similar_asserts::assert_eq!(self.stdout(), expected);
        self
    }

    pub fn stderr_eq(self, expected: &str) -> Self {
        similar_asserts::assert_eq!(self.stderr(), expected);
        self
    }

    pub fn stdout_has(self, needle: &str) -> Self {
        assert!(
            self.stdout().contains(needle),
            "stdout missing '{needle}':\n{}",
            self.stdout()
        );
        self
    }

    pub fn stdout_lacks(self, needle: &str) -> Self {
        assert!(
            !self.stdout().contains(needle),
            "stdout unexpectedly contains '{needle}':\n{}",
            self.stdout()
        );
        self
    }

    pub fn stderr_has(self, needle: &str) -> Self {
        assert!(
            self.stderr().contains(needle),
            "stderr missing '{needle}':\n{}",
            self.stderr()
        );
        self
    }

    pub fn stderr_lacks(self, needle: &str) -> Self {
        assert!(
            !self.stderr().contains(needle),
            "stderr unexpectedly contains '{needle}':\n{}",
            self.stderr()
        );
        self
    }
}

/// One-shot run of the `rigd` binary. Only safe for invocations that
/// exit on their own (info flags, startup refusals); a bare start with
/// a free state dir would serve forever.
pub fn rigd_run(state_dir: &Path, args: &[&str]) -> Output {
    Command::new(rigd_binary())
        .args(args)
        .env("RIG_STATE_DIR", state_dir)
        .output()
        .expect("rigd should run")
}

/// One-shot run of the `rig-agent` binary, same caveat as [`rigd_run`].
pub fn rig_agent_run(state_dir: &Path, args: &[&str]) -> Output {
    Command::new(rig_agent_binary())
        .args(args)
        .env("RIG_STATE_DIR", state_dir)
        .output()
        .expect("rig-agent should run")
}

pub fn stdout_lossy(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

pub fn stderr_lossy(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

// =============================================================================
// Fleet
// =============================================================================

static DOC_SEQ: AtomicUsize = AtomicUsize::new(0);

/// A live broker plus its agents, each on an isolated state directory.
///
/// The broker listens on an ephemeral port so specs parallelize without
/// address collisions. Dropping the fleet kills every spawned process;
/// phase subprocesses are the agents' own problem (kill_on_drop), except
/// after SIGKILL, so spec phases must terminate on their own.
pub struct Fleet {
    broker_state: tempfile::TempDir,
    docs: tempfile::TempDir,
    broker: Option<Child>,
    agents: Vec<AgentHandle>,
    pub addr: String,
}

struct AgentHandle {
    id: String,
    state: tempfile::TempDir,
    child: Option<Child>,
}

impl Fleet {
    /// Start a broker with default settings on an ephemeral port.
    pub fn start() -> Self {
        Self::start_with("")
    }

    /// Start a broker with extra `broker.toml` lines (queue rules,
    /// lease TTL) below the ephemeral listen address.
    pub fn start_with(extra_toml: &str) -> Self {
        let broker_state = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            broker_state.path().join("broker.toml"),
            format!("listen = \"127.0.0.1:0\"\n{extra_toml}"),
        )
        .expect("write broker.toml");

        let child = Command::new(rigd_binary())
            .env("RIG_STATE_DIR", broker_state.path())
            .env_remove("RIG_BROKER")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("rigd should spawn");

        let addr_path = broker_state.path().join("broker.addr");
        assert!(
            wait_for(SPEC_WAIT_MAX_MS, || addr_path.exists()),
            "broker never wrote broker.addr"
        );
        let addr = std::fs::read_to_string(&addr_path)
            .expect("read broker.addr")
            .trim()
            .to_string();

        let fleet = Self {
            broker_state,
            docs: tempfile::tempdir().expect("tempdir"),
            broker: Some(child),
            agents: Vec::new(),
            addr,
        };
        // The addr file lands just before the accept loop starts; make
        // sure the broker answers before handing it to a spec.
        assert!(
            wait_for(SPEC_WAIT_MAX_MS, || fleet.rig().args(&["ping"]).succeeds()),
            "broker never answered ping"
        );
        fleet
    }

    /// The broker's state directory (lock, addr, journal).
    pub fn broker_state(&self) -> &Path {
        self.broker_state.path()
    }

    /// SIGKILL the broker, keeping its state directory. The journal's
    /// group-commit window is 10ms; give acked writes a beat to land
    /// before calling this.
    pub fn kill_broker(&mut self) {
        if let Some(mut child) = self.broker.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// Restart the broker on its surviving state dir. The ephemeral
    /// port changes, so `addr` is re-read; agents spawned against the
    /// old address are not followed.
    pub fn restart_broker(&mut self) {
        assert!(self.broker.is_none(), "broker is still running");
        let addr_path = self.broker_state.path().join("broker.addr");
        let _ = std::fs::remove_file(&addr_path);

        let child = Command::new(rigd_binary())
            .env("RIG_STATE_DIR", self.broker_state.path())
            .env_remove("RIG_BROKER")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("rigd should respawn");
        self.broker = Some(child);

        assert!(
            wait_for(SPEC_WAIT_MAX_MS, || addr_path.exists()),
            "restarted broker never wrote broker.addr"
        );
        self.addr = std::fs::read_to_string(&addr_path)
            .expect("read broker.addr")
            .trim()
            .to_string();
        assert!(
            wait_for(SPEC_WAIT_MAX_MS, || self.rig().args(&["ping"]).succeeds()),
            "restarted broker never answered ping"
        );
    }

    /// A `rig` builder already pointed at this fleet's broker.
    pub fn rig(&self) -> CliBuilder {
        cli().args(&["--broker", self.addr.as_str()])
    }

    /// Spawn an agent serving `queues` and wait until the broker lists
    /// it. Poll and grace intervals are tightened for spec speed.
    pub fn spawn_agent(&mut self, id: &str, queues: &[&str]) {
        let queue_list = queues
            .iter()
            .map(|q| format!("\"{q}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let toml = format!(
            "agent_id = \"{id}\"\n\
             device = \"dut-{id}\"\n\
             broker = \"{}\"\n\
             queues = [{queue_list}]\n\
             poll_interval_secs = 1\n\
             grace_secs = 1\n",
            self.addr
        );
        self.spawn_agent_with(id, &toml);
    }

    /// Spawn an agent from explicit `agent.toml` content.
    pub fn spawn_agent_with(&mut self, id: &str, agent_toml: &str) {
        let state = tempfile::tempdir().expect("tempdir");
        std::fs::write(state.path().join("agent.toml"), agent_toml).expect("write agent.toml");
        let child = spawn_agent_process(state.path());
        self.agents.push(AgentHandle {
            id: id.to_string(),
            state,
            child: Some(child),
        });
        let registered = wait_for(SPEC_WAIT_MAX_MS, || {
            self.rig().args(&["agents"]).stdout_of().contains(id)
        });
        assert!(registered, "agent {id} never registered with the broker");
    }

    /// SIGKILL an agent, keeping its state directory for a restart.
    pub fn kill_agent(&mut self, id: &str) {
        let agent = self
            .agents
            .iter_mut()
            .find(|a| a.id == id)
            .expect("unknown agent");
        if let Some(mut child) = agent.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    /// Restart a previously killed agent on its surviving state dir.
    pub fn restart_agent(&mut self, id: &str) {
        let agent = self
            .agents
            .iter_mut()
            .find(|a| a.id == id)
            .expect("unknown agent");
        assert!(agent.child.is_none(), "agent {id} is still running");
        agent.child = Some(spawn_agent_process(agent.state.path()));
    }

    /// An agent's state directory (checkpoint, log).
    pub fn agent_state(&self, id: &str) -> &Path {
        self.agents
            .iter()
            .find(|a| a.id == id)
            .expect("unknown agent")
            .state
            .path()
    }

    /// Write a job document to a throwaway file and return its path.
    pub fn write_doc(&self, doc: &str) -> PathBuf {
        let n = DOC_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = self.docs.path().join(format!("job-{n}.yaml"));
        std::fs::write(&path, doc).expect("write job doc");
        path
    }

    /// Submit a job document and return the printed job id.
    pub fn submit(&self, doc: &str) -> String {
        self.submit_with(doc, &[])
    }

    /// Submit with extra `rig submit` flags (`--token`, ...).
    pub fn submit_with(&self, doc: &str, extra: &[&str]) -> String {
        let path = self.write_doc(doc);
        let path = path.to_str().expect("utf-8 path");
        let mut args = vec!["submit", path];
        args.extend_from_slice(extra);
        let id = self.rig().args(&args).passes().stdout().trim().to_string();
        assert!(!id.is_empty(), "submit printed no job id");
        id
    }

    /// One `rig status` snapshot.
    pub fn status_of(&self, job: &str) -> String {
        self.rig().args(&["status", job]).passes().stdout()
    }

    /// Wait until the status line reads `want`.
    pub fn wait_status(&self, job: &str, want: &str) {
        let line = format!("status:    {want}");
        let reached = wait_for(SPEC_WAIT_MAX_MS, || {
            self.rig().args(&["status", job]).stdout_of().contains(&line)
        });
        assert!(
            reached,
            "job {job} never reached '{want}'; last status:\n{}",
            self.status_of(job)
        );
    }

    /// A job's full captured output.
    pub fn output_of(&self, job: &str) -> String {
        self.rig().args(&["output", job]).passes().stdout()
    }

    /// Wait until the job's output contains `marker`.
    pub fn wait_output(&self, job: &str, marker: &str) {
        let seen = wait_for(SPEC_WAIT_MAX_MS, || {
            self.rig().args(&["output", job]).stdout_of().contains(marker)
        });
        assert!(
            seen,
            "job {job} output never contained '{marker}'; have:\n{}",
            self.output_of(job)
        );
    }

    /// Parsed `rig results` JSON.
    pub fn results_of(&self, job: &str) -> serde_json::Value {
        let stdout = self.rig().args(&["results", job]).passes().stdout();
        serde_json::from_str(&stdout).expect("results should be JSON")
    }
}

impl Drop for Fleet {
    fn drop(&mut self) {
        for agent in &mut self.agents {
            if let Some(mut child) = agent.child.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        if let Some(mut child) = self.broker.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn spawn_agent_process(state_dir: &Path) -> Child {
    Command::new(rig_agent_binary())
        .env("RIG_STATE_DIR", state_dir)
        .env_remove("RIG_BROKER")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("rig-agent should spawn")
}
