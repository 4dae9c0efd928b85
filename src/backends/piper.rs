use super::{SpeechBackend, SynthesisError};
use crate::config_loader::BridgeConfig;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

/// Runs the Piper CLI once per request in raw-output mode.
pub struct PiperBackend {
    binary_path: String,
    model_path: PathBuf,
    timeout: Duration,
}

impl PiperBackend {
    pub fn new(binary_path: impl Into<String>, model_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary_path: binary_path.into(),
            model_path: model_path.into(),
            timeout,
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.piper_bin.clone(),
            config.model_path.clone(),
            config.synth_timeout,
        )
    }

    fn spawn(&self) -> Result<Child, SynthesisError> {
        Command::new(&self.binary_path)
            .arg("-q")
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg("-") // Raw PCM to stdout
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(SynthesisError::Spawn)
    }
}

/// Reads a pipe to the end on its own thread.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "piper already exited");
    }
    let _ = child.wait();
}

fn join_pipe(handle: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>, SynthesisError> {
    handle
        .join()
        .map_err(|_| SynthesisError::Io(std::io::Error::other("pipe reader panicked")))?
        .map_err(SynthesisError::Io)
}

impl SpeechBackend for PiperBackend {
    fn id(&self) -> &'static str {
        "piper"
    }

    fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        let mut child = self.spawn()?;

        // Feed stdin and drain both outputs concurrently; Piper starts writing
        // audio before it has read all of its input.
        let input = text.as_bytes().to_vec();
        let stdin = child.stdin.take();
        let writer = thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&input)?;
                // stdin is dropped here, closing the pipe
            }
            Ok(())
        });
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        // On any early exit the helper threads are left detached; they end
        // once the pipes close, which a grandchild holding them may delay.
        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                kill_and_reap(&mut child);
                return Err(SynthesisError::TimedOut(self.timeout));
            }
            Err(e) => {
                kill_and_reap(&mut child);
                return Err(SynthesisError::Io(e));
            }
        };

        // A child that exits without reading all input breaks the pipe; its
        // exit status is what matters then.
        if let Ok(Err(e)) = writer.join() {
            debug!(error = %e, "piper closed stdin early");
        }
        let pcm = join_pipe(stdout)?;
        let err = join_pipe(stderr)?;

        if status.success() {
            Ok(pcm)
        } else {
            Err(SynthesisError::Failed {
                code: status.code(),
                stderr: String::from_utf8_lossy(&err).trim().to_string(),
            })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Instant;
    use tempfile::TempDir;

    fn fake_piper(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("fake-piper");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn backend(bin: String, timeout: Duration) -> PiperBackend {
        PiperBackend::new(bin, Path::new("/voices/test.onnx"), timeout)
    }

    #[test]
    fn test_stdout_is_returned() {
        let dir = TempDir::new().unwrap();
        let bin = fake_piper(&dir, "cat");

        let pcm = backend(bin, Duration::from_secs(5)).synthesize("hello").unwrap();
        assert_eq!(pcm, b"hello");
    }

    #[test]
    fn test_stdin_is_text_only() {
        let dir = TempDir::new().unwrap();
        let bin = fake_piper(&dir, "wc -c | tr -d ' '");

        let pcm = backend(bin, Duration::from_secs(5)).synthesize("你好").unwrap();
        assert_eq!(String::from_utf8(pcm).unwrap().trim(), "6");
    }

    #[test]
    fn test_kill_and_reap() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();

        kill_and_reap(&mut child);
        assert!(child.try_wait().unwrap().is_some());

        // Already reaped: a second pass must not panic.
        kill_and_reap(&mut child);
    }

    #[test]
    fn test_arguments() {
        let dir = TempDir::new().unwrap();
        let bin = fake_piper(
            &dir,
            r#"[ "$1" = "-q" ] && [ "$2" = "-m" ] && [ "$3" = "/voices/test.onnx" ] && [ "$4" = "-f" ] && [ "$5" = "-" ] || exit 3
printf ok"#,
        );

        let pcm = backend(bin, Duration::from_secs(5)).synthesize("x").unwrap();
        assert_eq!(pcm, b"ok");
    }

    #[test]
    fn test_nonzero_exit_carries_stderr() {
        let dir = TempDir::new().unwrap();
        let bin = fake_piper(&dir, "cat >/dev/null\necho 'model load error' >&2\nexit 1");

        match backend(bin, Duration::from_secs(5)).synthesize("hello") {
            Err(SynthesisError::Failed { code, stderr }) => {
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "model load error");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let bin = fake_piper(&dir, "exec sleep 30");

        let start = Instant::now();
        let result = backend(bin, Duration::from_millis(200)).synthesize("hello");

        assert!(matches!(result, Err(SynthesisError::TimedOut(_))));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_large_output_does_not_deadlock() {
        let dir = TempDir::new().unwrap();
        let bin = fake_piper(&dir, "cat >/dev/null\nhead -c 1000000 /dev/zero");

        let pcm = backend(bin, Duration::from_secs(10)).synthesize("hello").unwrap();
        assert_eq!(pcm.len(), 1_000_000);
    }

    #[test]
    fn test_missing_binary() {
        let result = backend("/nonexistent/piper-tts".to_string(), Duration::from_secs(1))
            .synthesize("hello");
        assert!(matches!(result, Err(SynthesisError::Spawn(_))));
    }
}
