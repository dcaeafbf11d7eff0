use std::{collections::VecDeque, path::PathBuf, process::Stdio, time::Instant};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::Command,
    sync::mpsc,
};
use tracing::{debug, info};

use crate::error::{LaunchError, Result};

const RECENT_LOG_LIMIT: usize = 200;
const LOG_CHANNEL_CAPACITY: usize = 512;

/// One process invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn describe(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.as_str());
        parts.extend(self.args.iter().map(String::as_str));
        parts.join(" ")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub recent_output: String,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Runs `command` to completion, handing every output line to `on_line`
    /// as it arrives. Only a failure to start is an error.
    async fn run(
        &self,
        command: &CommandSpec,
        on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> Result<ProcessOutcome>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioProcessLauncher;

struct LogLine {
    stream: &'static str,
    line: String,
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn run(
        &self,
        command: &CommandSpec,
        on_line: &(dyn for<'l> Fn(&'l str) + Send + Sync),
    ) -> Result<ProcessOutcome> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = command.cwd.as_ref() {
            cmd.current_dir(dir);
        }
        for (key, value) in &command.envs {
            cmd.env(key, value);
        }

        info!("running {}", command.describe());
        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let (line_tx, mut line_rx) = mpsc::channel::<LogLine>(LOG_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_lines(stdout, "stdout", line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_lines(stderr, "stderr", line_tx));
        } else {
            drop(line_tx);
        }

        let mut recent = VecDeque::with_capacity(RECENT_LOG_LIMIT);
        let start = Instant::now();
        let mut status = None;
        let mut lines_open = true;

        while lines_open || status.is_none() {
            tokio::select! {
                line = line_rx.recv(), if lines_open => match line {
                    Some(line) => {
                        debug!(stream = line.stream, "{}", line.line);
                        on_line(&line.line);
                        append_recent(&mut recent, line.line);
                    }
                    None => lines_open = false,
                },
                result = child.wait(), if status.is_none() => {
                    status = Some(result?);
                }
            }
        }

        let exit_code = status.and_then(|status| status.code());
        info!(
            "{} exited with {:?} after {}ms",
            command.program,
            exit_code,
            start.elapsed().as_millis()
        );
        Ok(ProcessOutcome {
            exit_code,
            recent_output: collect_recent(&recent),
        })
    }
}

async fn read_lines<R>(reader: R, stream: &'static str, tx: mpsc::Sender<LogLine>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(stream, "stopped reading output: {err}");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(|c: char| c == '\n' || c == '\r')
            .to_string();
        if tx.send(LogLine { stream, line }).await.is_err() {
            break;
        }
    }
}

fn append_recent(recent: &mut VecDeque<String>, line: String) {
    if recent.len() >= RECENT_LOG_LIMIT {
        recent.pop_front();
    }
    recent.push_back(line);
}

fn collect_recent(recent: &VecDeque<String>) -> String {
    let mut combined = String::new();
    for line in recent {
        combined.push_str(line);
        combined.push('\n');
    }
    combined
}
