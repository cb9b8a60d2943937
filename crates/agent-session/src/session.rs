//! A single supervised child-assistant session on a PTY.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use portable_pty::{native_pty_system, Child, CommandBuilder, PtySize};
use serde::Serialize;
use tracing::debug;

use crate::{keys, scrub, SessionError, SessionResult};

/// PTY dimensions handed to every child: wide enough for CLI layouts.
pub const PTY_ROWS: u16 = 50;
pub const PTY_COLS: u16 = 200;

/// A reply is framed once the terminal stays silent this long.
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(4);
/// Upper bound on any idle wait.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

const IDLE_POLL: Duration = Duration::from_millis(300);
const KEY_DEBOUNCE: Duration = Duration::from_millis(150);
const SUBMIT_DELAY: Duration = Duration::from_millis(200);
const READ_CHUNK: usize = 4096;
const MAX_READ_CHARS: usize = 20_000;
const FINAL_OUTPUT_CHARS: usize = 2_000;

/// How to spawn a child session.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Program to run (e.g. `claude`).
    pub command: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Working directory for the child.
    pub working_dir: PathBuf,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Whether the child runs with plugin hooks enabled.
    pub plugin_mode: bool,
}

impl SpawnConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: dirs_home(),
            env: HashMap::new(),
            plugin_mode: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Output side of a session, shared with its reader task.
///
/// The reader holds only this state, never the session itself, so dropping a
/// session from the registry cannot cycle.
pub(crate) struct OutputState {
    buffer: Mutex<Vec<u8>>,
    last_data: Mutex<Option<Instant>>,
    alive: AtomicBool,
}

impl OutputState {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            last_data: Mutex::new(None),
            alive: AtomicBool::new(true),
        }
    }

    pub(crate) fn append(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.buffer.lock().unwrap().extend_from_slice(bytes);
        *self.last_data.lock().unwrap() = Some(Instant::now());
    }

    fn len(&self) -> usize {
        self.buffer.lock().unwrap().len()
    }

    fn snapshot_from(&self, start: usize) -> Vec<u8> {
        let buf = self.buffer.lock().unwrap();
        buf.get(start..).unwrap_or_default().to_vec()
    }

    fn idle_for(&self) -> Option<Duration> {
        self.last_data.lock().unwrap().map(|t| t.elapsed())
    }

    pub(crate) fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Block until the buffer has grown past `start_len` and then gone quiet for
/// `threshold`, or until `timeout` elapses. Returns the scrubbed slice that
/// arrived after `start_len`.
pub(crate) async fn wait_for_idle_from(
    output: &OutputState,
    start_len: usize,
    threshold: Duration,
    timeout: Duration,
) -> String {
    let started = Instant::now();
    loop {
        tokio::time::sleep(IDLE_POLL).await;

        let grown = output.len() > start_len;
        let quiet = output.idle_for().map(|d| d >= threshold).unwrap_or(false);
        if (grown && quiet) || started.elapsed() >= timeout {
            break;
        }
        // A dead child will never produce more data; don't wait out the full
        // timeout once the buffer has stopped moving.
        if !output.is_alive() && quiet {
            break;
        }
    }

    let raw = output.snapshot_from(start_len);
    scrub::clean(&String::from_utf8_lossy(&raw))
}

/// A running child-assistant process and its PTY plumbing.
pub struct InteractiveSession {
    /// Opaque session identifier (e.g. `sess-1f2e3d4c`).
    pub id: String,
    pub working_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub plugin_mode: bool,
    messages_sent: AtomicU64,
    output: Arc<OutputState>,
    writer: Mutex<Box<dyn std::io::Write + Send>>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    // Keeping the master half alive keeps the slave side readable.
    _master: Mutex<Box<dyn portable_pty::MasterPty + Send>>,
}

/// Point-in-time view of a session, for the `session_status` tool.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: String,
    pub alive: bool,
    pub working_dir: String,
    pub created_at: DateTime<Utc>,
    pub messages_sent: u64,
    pub buffer_bytes: usize,
    pub seconds_since_output: Option<f64>,
    pub plugin_mode: bool,
}

/// Terminal record returned by `stop`.
#[derive(Debug, Clone, Serialize)]
pub struct StoppedSession {
    pub id: String,
    pub final_output: String,
}

impl InteractiveSession {
    /// Spawn a child process on a fresh 50x200 PTY and start its reader task.
    pub fn spawn(id: String, config: SpawnConfig) -> SessionResult<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SessionError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&config.command);
        for arg in &config.args {
            cmd.arg(arg);
        }
        cmd.cwd(&config.working_dir);
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Pty(e.to_string()))?;

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::Pty(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Pty(e.to_string()))?;

        let output = Arc::new(OutputState::new());

        // Dedicated blocking reader: PTY reads have no async form, and a
        // thread per child keeps every library-side read non-blocking.
        let reader_state = Arc::clone(&output);
        let reader_id = id.clone();
        std::thread::spawn(move || {
            let mut chunk = [0u8; READ_CHUNK];
            loop {
                match reader.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => reader_state.append(&chunk[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        debug!("reader for {} stopped: {}", reader_id, e);
                        break;
                    }
                }
            }
            reader_state.mark_dead();
        });

        Ok(Self {
            id,
            working_dir: config.working_dir,
            created_at: Utc::now(),
            plugin_mode: config.plugin_mode,
            messages_sent: AtomicU64::new(0),
            output,
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            _master: Mutex::new(pair.master),
        })
    }

    fn write_bytes(&self, bytes: &[u8]) -> SessionResult<()> {
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(bytes)?;
        writer.flush()?;
        Ok(())
    }

    /// Whether the child process is still running.
    pub fn is_alive(&self) -> bool {
        let mut child = self.child.lock().unwrap();
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) | Err(_) => false,
        }
    }

    /// Type `message` into the session and submit it with a carriage return.
    ///
    /// With `wait`, blocks until the reply is idle-framed and returns it with
    /// the echoed message line removed; otherwise returns `None` immediately.
    pub async fn send(
        &self,
        message: &str,
        timeout: Duration,
        wait: bool,
    ) -> SessionResult<Option<String>> {
        if !self.is_alive() {
            return Err(SessionError::Dead(self.id.clone()));
        }

        let start_len = self.output.len();

        self.write_bytes(message.as_bytes())?;
        tokio::time::sleep(SUBMIT_DELAY).await;
        self.write_bytes(b"\r")?;
        self.messages_sent.fetch_add(1, Ordering::Relaxed);

        if !wait {
            return Ok(None);
        }

        let reply = wait_for_idle_from(&self.output, start_len, IDLE_THRESHOLD, timeout).await;
        Ok(Some(strip_echo(&reply, message)))
    }

    /// Send a sequence of symbolic keys (or literal text for unknown names),
    /// debouncing between keystrokes.
    pub async fn send_keys(
        &self,
        keys_seq: &[String],
        timeout: Duration,
        wait: bool,
    ) -> SessionResult<Option<String>> {
        if !self.is_alive() {
            return Err(SessionError::Dead(self.id.clone()));
        }

        let start_len = self.output.len();

        for key in keys_seq {
            match keys::translate(key) {
                Some(seq) => self.write_bytes(&seq)?,
                None => self.write_bytes(key.as_bytes())?,
            }
            tokio::time::sleep(KEY_DEBOUNCE).await;
        }

        if !wait {
            return Ok(None);
        }

        let reply = wait_for_idle_from(&self.output, start_len, IDLE_THRESHOLD, timeout).await;
        Ok(Some(reply))
    }

    /// Wait for the terminal to go idle and return what arrived meanwhile.
    pub async fn wait_for_idle(&self, threshold: Duration, timeout: Duration) -> String {
        let start_len = self.output.len();
        wait_for_idle_from(&self.output, start_len, threshold, timeout).await
    }

    /// Non-blocking read of the scrubbed buffer.
    ///
    /// Without `offset` the *last* `max_chars` characters are returned; with
    /// one, a forward slice starting there. `max_chars` is capped at 20 000.
    pub fn read(&self, max_chars: usize, offset: Option<usize>) -> String {
        let capped = if max_chars == 0 {
            MAX_READ_CHARS
        } else {
            max_chars.min(MAX_READ_CHARS)
        };
        let raw = self.output.snapshot_from(0);
        let cleaned = scrub::clean(&String::from_utf8_lossy(&raw));
        scrub::window(&cleaned, capped, offset)
    }

    /// Current session status.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            id: self.id.clone(),
            alive: self.is_alive(),
            working_dir: self.working_dir.display().to_string(),
            created_at: self.created_at,
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            buffer_bytes: self.output.len(),
            seconds_since_output: self.output.idle_for().map(|d| d.as_secs_f64()),
            plugin_mode: self.plugin_mode,
        }
    }

    /// Escalating shutdown: interrupt, then terminate, then kill.
    ///
    /// Returns the last 2 000 scrubbed characters as the session's final
    /// output snapshot.
    pub async fn stop(&self) -> SessionResult<StoppedSession> {
        self.signal_interrupt();
        tokio::time::sleep(Duration::from_millis(500)).await;

        if self.is_alive() {
            self.signal_terminate();
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        if self.is_alive() {
            let mut child = self.child.lock().unwrap();
            let _ = child.kill();
        }

        let final_output = self.read(FINAL_OUTPUT_CHARS, None);
        self.output.mark_dead();

        Ok(StoppedSession {
            id: self.id.clone(),
            final_output,
        })
    }

    #[cfg(unix)]
    fn signal_interrupt(&self) {
        if let Some(pid) = self.child.lock().unwrap().process_id() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGINT,
            );
        } else {
            // No pid available; fall back to typing ctrl+c.
            let _ = self.write_bytes(&[0x03]);
        }
    }

    #[cfg(not(unix))]
    fn signal_interrupt(&self) {
        let _ = self.write_bytes(&[0x03]);
    }

    #[cfg(unix)]
    fn signal_terminate(&self) {
        if let Some(pid) = self.child.lock().unwrap().process_id() {
            let _ = nix::sys::signal::kill(
                nix::unistd::Pid::from_raw(pid as i32),
                nix::sys::signal::Signal::SIGTERM,
            );
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) {
        let mut child = self.child.lock().unwrap();
        let _ = child.kill();
    }
}

/// Drop the echoed input line from an idle-framed reply.
///
/// The PTY echoes what we typed; the first line whose text matches the sent
/// message's 50-character prefix is removed.
fn strip_echo(reply: &str, message: &str) -> String {
    let prefix: String = message.chars().take(50).collect();
    if prefix.is_empty() {
        return reply.to_string();
    }

    let mut lines: Vec<&str> = reply.lines().collect();
    if let Some(pos) = lines.iter().position(|line| line.trim_start().starts_with(&prefix)) {
        lines.remove(pos);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_idle_framing_returns_new_slice() {
        let output = Arc::new(OutputState::new());
        output.append(b"old data");
        let start_len = output.buffer.lock().unwrap().len();

        let writer = Arc::clone(&output);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            writer.append(b"line one\n");
            tokio::time::sleep(Duration::from_millis(200)).await;
            writer.append(b"line two\n");
        });

        let frame = wait_for_idle_from(
            &output,
            start_len,
            Duration::from_millis(600),
            Duration::from_secs(5),
        )
        .await;
        handle.await.unwrap();

        assert_eq!(frame, "line one\nline two\n");
    }

    #[tokio::test]
    async fn test_idle_framing_times_out_on_silence() {
        let output = OutputState::new();
        let started = Instant::now();

        let frame = wait_for_idle_from(
            &output,
            0,
            Duration::from_millis(200),
            Duration::from_millis(700),
        )
        .await;

        assert_eq!(frame, "");
        assert!(started.elapsed() >= Duration::from_millis(700));
    }

    #[tokio::test]
    async fn test_idle_framing_scrubs_ansi() {
        let output = OutputState::new();
        output.append(b"\x1b[32mgreen\x1b[0m done\n");

        let frame = wait_for_idle_from(
            &output,
            0,
            Duration::from_millis(100),
            Duration::from_secs(2),
        )
        .await;

        assert_eq!(frame, "green done\n");
    }

    #[test]
    fn test_strip_echo_drops_first_matching_line() {
        let reply = "hello world\nresponse line\nhello world again";
        assert_eq!(
            strip_echo(reply, "hello world"),
            "response line\nhello world again"
        );
    }

    #[test]
    fn test_strip_echo_uses_fifty_char_prefix() {
        let message = "x".repeat(80);
        let echoed = format!("{}\nreal output", "x".repeat(80));
        assert_eq!(strip_echo(&echoed, &message), "real output");
    }

    #[test]
    fn test_strip_echo_no_match_keeps_reply() {
        assert_eq!(strip_echo("just output", "different"), "just output");
    }
}
