//! Container remux through an external ffmpeg process.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

pub type RemuxResult<T> = Result<T, RemuxError>;

#[derive(Debug, Error)]
pub enum RemuxError {
    #[error("failed to run {program}: {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("remux needs at least one input")]
    NoInputs,
}

/// Captured output of a successful remux.
#[derive(Debug, Clone, Default)]
pub struct RemuxOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Multiplexes already-repaired segments into one container file, copying
/// streams without re-encoding.
#[async_trait]
pub trait Remuxer: Send + Sync {
    async fn remux(&self, inputs: &[PathBuf], output: &Path) -> RemuxResult<RemuxOutput>;
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
        command.kill_on_drop(true).output().await
    }
}

pub struct FfmpegRemuxer {
    binary: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl fmt::Debug for FfmpegRemuxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FfmpegRemuxer")
            .field("binary", &self.binary)
            .finish()
    }
}

impl FfmpegRemuxer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn build_args(inputs: &[PathBuf], output: &Path) -> Vec<String> {
        let mut args = Vec::with_capacity(inputs.len() * 2 + 11);
        for input in inputs {
            args.push("-i".to_string());
            args.push(input.to_string_lossy().to_string());
        }
        args.extend(
            [
                "-c:v",
                "copy",
                "-c:a",
                "copy",
                "-strict",
                "experimental",
                "-hide_banner",
                "-stats",
                "-y",
            ]
            .into_iter()
            .map(String::from),
        );
        args.push(output.to_string_lossy().to_string());
        args
    }
}

#[async_trait]
impl Remuxer for FfmpegRemuxer {
    async fn remux(&self, inputs: &[PathBuf], output: &Path) -> RemuxResult<RemuxOutput> {
        if inputs.is_empty() {
            return Err(RemuxError::NoInputs);
        }
        let args = Self::build_args(inputs, output);
        let mut command = Command::new(&self.binary);
        command.args(&args);
        debug!(binary = %self.binary.display(), inputs = inputs.len(), "starting remux");

        let result = self
            .executor
            .run(&mut command)
            .await
            .map_err(|source| RemuxError::Io {
                program: self.binary.display().to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&result.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&result.stderr).to_string();
        if !result.status.success() {
            return Err(RemuxError::CommandFailure {
                command: format!("{} {}", self.binary.display(), args.join(" ")),
                status: result.status.code(),
                stderr,
            });
        }

        info!(output = %output.display(), "remux finished");
        Ok(RemuxOutput { stdout, stderr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[cfg(unix)]
    use std::os::unix::process::ExitStatusExt;
    #[cfg(windows)]
    use std::os::windows::process::ExitStatusExt;

    #[derive(Default)]
    struct RecordingExecutor {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        exit_code: i32,
        stderr: &'static str,
    }

    #[async_trait]
    impl CommandExecutor for RecordingExecutor {
        async fn run(&self, command: &mut Command) -> std::io::Result<std::process::Output> {
            let std_command = command.as_std();
            let program = std_command.get_program().to_string_lossy().to_string();
            let args = std_command
                .get_args()
                .map(|arg| arg.to_string_lossy().to_string())
                .collect();
            self.calls.lock().unwrap().push((program, args));
            #[cfg(unix)]
            let status = std::process::ExitStatus::from_raw(self.exit_code << 8);
            #[cfg(windows)]
            let status = std::process::ExitStatus::from_raw(self.exit_code as u32);
            Ok(std::process::Output {
                status,
                stdout: b"done\n".to_vec(),
                stderr: self.stderr.as_bytes().to_vec(),
            })
        }
    }

    #[test]
    fn args_stream_copy_every_input() {
        let inputs = vec![PathBuf::from("/s/video.m4s"), PathBuf::from("/s/audio.m4s")];
        let args = FfmpegRemuxer::build_args(&inputs, Path::new("/o/out.mp4"));
        assert_eq!(
            args,
            vec![
                "-i",
                "/s/video.m4s",
                "-i",
                "/s/audio.m4s",
                "-c:v",
                "copy",
                "-c:a",
                "copy",
                "-strict",
                "experimental",
                "-hide_banner",
                "-stats",
                "-y",
                "/o/out.mp4",
            ]
        );
    }

    #[tokio::test]
    async fn successful_run_returns_output() {
        let executor = Arc::new(RecordingExecutor::default());
        let remuxer = FfmpegRemuxer::new("/usr/bin/ffmpeg").with_executor(executor.clone());
        let output = remuxer
            .remux(&[PathBuf::from("a.m4s")], Path::new("out.mp4"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "done");

        let calls = executor.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "/usr/bin/ffmpeg");
        assert_eq!(calls[0].1.last().map(String::as_str), Some("out.mp4"));
    }

    #[tokio::test]
    async fn failure_surfaces_stderr_verbatim() {
        let executor = Arc::new(RecordingExecutor {
            exit_code: 1,
            stderr: "Invalid data found when processing input\n",
            ..Default::default()
        });
        let remuxer = FfmpegRemuxer::new("ffmpeg").with_executor(executor);
        let err = remuxer
            .remux(&[PathBuf::from("a.m4s")], Path::new("out.mp4"))
            .await
            .unwrap_err();
        match err {
            RemuxError::CommandFailure { status, stderr, .. } => {
                assert_eq!(status, Some(1));
                assert_eq!(stderr, "Invalid data found when processing input\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_input_list_is_rejected() {
        let remuxer = FfmpegRemuxer::new("ffmpeg");
        let err = remuxer.remux(&[], Path::new("out.mp4")).await.unwrap_err();
        assert!(matches!(err, RemuxError::NoInputs));
    }

    #[tokio::test]
    async fn missing_binary_is_an_io_error() {
        let remuxer = FfmpegRemuxer::new("/definitely/not/a/real/ffmpeg-binary");
        let err = remuxer
            .remux(&[PathBuf::from("a.m4s")], Path::new("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, RemuxError::Io { .. }));
    }
}
