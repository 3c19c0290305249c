use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, Context};
use runbatch_common::Severity;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::logsink::LogSink;

/// Runs the batch container and streams its output to the sink, stdout
/// lines at INFO and stderr lines at ERROR. A nonzero exit code is
/// reported through the sink and returned, not raised as an error.
pub async fn docker_run(sink: &dyn LogSink, image: &str, env_file: &Path) -> anyhow::Result<i32> {
    let mut command = Command::new("docker");
    command
        .arg("run")
        .arg("-i")
        .arg("--env-file")
        .arg(env_file)
        .arg(image);
    stream_output(sink, command).await
}

async fn stream_output(sink: &dyn LogSink, mut command: Command) -> anyhow::Result<i32> {
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    // If we bail out mid-stream the child must not outlive us.
    command.kill_on_drop(true);
    let mut child = command.spawn().context("cannot spawn container runtime")?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("child stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("child stderr was not captured"))?;
    let mut stdout_lines = BufReader::new(stdout).lines();
    let mut stderr_lines = BufReader::new(stderr).lines();

    // Drain both streams until end of input. Each stream keeps its own
    // ordering; there is no ordering guarantee across the two.
    let mut stdout_open = true;
    let mut stderr_open = true;
    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout_lines.next_line(), if stdout_open => match line? {
                Some(line) => sink.emit(Severity::Info, line.trim_end()).await?,
                None => stdout_open = false,
            },
            line = stderr_lines.next_line(), if stderr_open => match line? {
                Some(line) => sink.emit(Severity::Error, line.trim_end()).await?,
                None => stderr_open = false,
            },
        }
    }

    let status = child.wait().await?;
    let code = match status.code() {
        Some(code) => {
            let severity = if code == 0 {
                Severity::Info
            } else {
                Severity::Error
            };
            sink.emit(severity, &format!("exited with code: {code}"))
                .await?;
            code
        }
        // No exit code means the container runtime was killed by a signal.
        None => {
            sink.emit(Severity::Error, &format!("terminated by signal: {status}"))
                .await?;
            -1
        }
    };
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    use crate::logsink::RecordingSink;

    /// Sink whose emit always fails, to exercise the mid-stream error path.
    struct FailingSink;

    #[async_trait]
    impl LogSink for FailingSink {
        async fn emit(&self, _severity: Severity, _text: &str) -> anyhow::Result<()> {
            Err(anyhow!("sink unavailable"))
        }
    }

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[tokio::test]
    async fn stdout_keeps_its_order_and_stderr_maps_to_error() {
        let sink = RecordingSink::default();
        let code = stream_output(&sink, shell("printf 'a\\nb\\n'; printf 'x\\n' >&2"))
            .await
            .unwrap();
        assert_eq!(code, 0);

        let records = sink.records.lock().unwrap();
        let stdout: Vec<_> = records
            .iter()
            .filter(|(severity, text)| {
                *severity == Severity::Info && text.as_str() != "exited with code: 0"
            })
            .map(|(_, text)| text.clone())
            .collect();
        assert_eq!(stdout, vec!["a", "b"]);
        assert!(records.contains(&(Severity::Error, "x".to_string())));
        assert_eq!(
            records.last(),
            Some(&(Severity::Info, "exited with code: 0".to_string()))
        );
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_raised() {
        let sink = RecordingSink::default();
        let code = stream_output(&sink, shell("printf 'going down\\n' >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(code, 3);

        let records = sink.records.lock().unwrap();
        assert!(records.contains(&(Severity::Error, "going down".to_string())));
        assert_eq!(
            records.last(),
            Some(&(Severity::Error, "exited with code: 3".to_string()))
        );
    }

    #[tokio::test]
    async fn quiet_child_still_reports_its_exit() {
        let sink = RecordingSink::default();
        let code = stream_output(&sink, shell("true")).await.unwrap();
        assert_eq!(code, 0);

        let records = sink.records.lock().unwrap();
        assert_eq!(
            records.as_slice(),
            &[(Severity::Info, "exited with code: 0".to_string())]
        );
    }

    #[tokio::test]
    async fn signal_killed_child_is_reported_as_signal() {
        let sink = RecordingSink::default();
        let code = stream_output(&sink, shell("kill -9 $$")).await.unwrap();
        assert_eq!(code, -1);

        let records = sink.records.lock().unwrap();
        let (severity, text) = records.last().unwrap();
        assert_eq!(*severity, Severity::Error);
        assert!(text.starts_with("terminated by signal:"), "got {text:?}");
    }

    #[tokio::test]
    async fn emit_failure_stops_streaming_without_waiting_for_the_child() {
        // The child would run for a minute; a failing sink must make
        // stream_output bail out well before that and kill it on drop.
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            stream_output(&FailingSink, shell("echo hello; sleep 60")),
        )
        .await
        .expect("stream_output should return promptly when the sink fails");
        assert!(result.is_err());
    }
}
