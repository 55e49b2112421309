use crate::core::model::ProgressSample;
use crate::core::telemetry::{parse_line, ToolKind};
use bytes::BytesMut;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Where a running tool's parsed samples go.
pub type SampleSink = mpsc::UnboundedSender<ProgressSample>;

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} output stream failed: {source}")]
    Stream {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    ExitStatus { program: String, status: ExitStatus },
}

/// One planned external tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub kind: ToolKind,
}

impl Invocation {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Spawns external tools and multiplexes their output into lines.
///
/// The runner knows nothing about stages or percentages: lines go through
/// the telemetry parser and whatever comes out is forwarded to the sink.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    strict_exit_codes: bool,
}

impl ProcessRunner {
    pub fn new(strict_exit_codes: bool) -> Self {
        Self { strict_exit_codes }
    }

    /// Runs `inv` to completion and hands back `result`.
    ///
    /// A non-zero exit only fails the call in strict mode; otherwise it is
    /// logged and treated like a clean exit.
    pub async fn run<T>(&self, inv: &Invocation, result: T, sink: Option<&SampleSink>) -> Result<T, RunnerError> {
        let mut child = Command::new(&inv.program)
            .args(&inv.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::Spawn { program: inv.program.clone(), source })?;

        debug!(tool = %inv.program, "spawned: {}", inv.command_line());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (out, err) = tokio::join!(
            pump(stdout, inv.kind, true, sink, &inv.program),
            pump(stderr, inv.kind, inv.kind.parses_stderr(), sink, &inv.program),
        );
        out.and(err)
            .map_err(|source| RunnerError::Stream { program: inv.program.clone(), source })?;

        let status = child
            .wait()
            .await
            .map_err(|source| RunnerError::Stream { program: inv.program.clone(), source })?;

        if !status.success() {
            if self.strict_exit_codes {
                return Err(RunnerError::ExitStatus { program: inv.program.clone(), status });
            }
            warn!(tool = %inv.program, %status, "tool exited unsuccessfully; continuing");
        }

        info!("Finished: {}", inv.command_line());
        Ok(result)
    }
}

async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    kind: ToolKind,
    parse: bool,
    sink: Option<&SampleSink>,
    program: &str,
) -> std::io::Result<()> {
    let Some(mut reader) = reader else {
        return Ok(());
    };

    let mut splitter = LineSplitter::default();
    let mut chunk = vec![0u8; 8 * 1024];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        for line in splitter.push(&chunk[..n]) {
            handle_line(&line, kind, parse, sink, program);
        }
    }
    if let Some(line) = splitter.finish() {
        handle_line(&line, kind, parse, sink, program);
    }
    Ok(())
}

fn handle_line(line: &str, kind: ToolKind, parse: bool, sink: Option<&SampleSink>, program: &str) {
    if parse {
        if let Some(sample) = parse_line(kind, line) {
            if let Some(tx) = sink {
                let _ = tx.send(sample);
            }
            return;
        }
    }
    debug!(tool = %program, "{line}");
}

/// Accumulates raw bytes and yields complete lines. Both `\r` and `\n`
/// terminate a line, since progress bars redraw with a bare carriage return.
#[derive(Debug, Default)]
struct LineSplitter {
    buf: BytesMut,
}

impl LineSplitter {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n' || *b == b'\r') {
            let raw = self.buf.split_to(pos + 1);
            let text = String::from_utf8_lossy(&raw[..pos]).trim().to_string();
            if !text.is_empty() {
                lines.push(text);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        let rest = self.buf.split();
        let text = String::from_utf8_lossy(&rest).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}
