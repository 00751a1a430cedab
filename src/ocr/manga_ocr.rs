//! Long-lived manga-ocr subprocess
//!
//! The model takes seconds to load, so one process is kept alive for the
//! whole session. Protocol:
//! - startup: stdout lines until a literal `READY`; lines starting with
//!   `Downloading` mean the model is being fetched
//! - request: 4-byte big-endian length, then the PNG bytes
//! - response: one line of UTF-8 text
//!
//! A request that times out restarts the process. Two failed restarts in a
//! row, or the process dying on its own, leave the adapter `Failed`.

use crossbeam_channel::Sender;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, error, info, warn};

use super::{OcrError, RecognizerEvent};
use crate::config::MangaOcrConfig;

const READY_LINE: &str = "READY";
const DOWNLOADING_PREFIX: &str = "Downloading";
const MAX_RESTART_ATTEMPTS: u32 = 2;

/// Lifecycle of the subprocess
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Ready,
    Processing,
    Restarting,
    Failed,
}

/// Frame one request: big-endian length prefix followed by the payload
pub fn frame_request(payload: &[u8]) -> Result<Vec<u8>, OcrError> {
    let len = u32::try_from(payload.len())
        .map_err(|_| OcrError::ExecutionFailed(format!("image too large to send ({} bytes)", payload.len())))?;
    let mut framed = Vec::with_capacity(payload.len() + 4);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// A running process and its pipes
struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl Worker {
    async fn exchange(&mut self, framed: &[u8]) -> Result<String, OcrError> {
        self.stdin
            .write_all(framed)
            .await
            .map_err(|e| OcrError::ExecutionFailed(format!("manga-ocr pipe closed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| OcrError::ExecutionFailed(format!("manga-ocr pipe closed: {e}")))?;

        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .await
            .map_err(|e| OcrError::ExecutionFailed(format!("reading manga-ocr output failed: {e}")))?;
        if read == 0 {
            return Err(OcrError::ExecutionFailed("manga-ocr exited".to_string()));
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!("Killing manga-ocr failed: {}", e);
        }
    }
}

/// manga-ocr engine
pub struct MangaOcrAdapter {
    command: Vec<String>,
    startup_timeout: Duration,
    request_timeout: Duration,
    state: ProcessState,
    worker: Option<Worker>,
    events: Sender<RecognizerEvent>,
    download_reported: bool,
}

impl MangaOcrAdapter {
    /// Launch the process and wait for its handshake
    pub async fn start(config: &MangaOcrConfig, events: Sender<RecognizerEvent>) -> Result<Self, OcrError> {
        if config.command.is_empty() {
            return Err(OcrError::BackendError("manga-ocr command is empty".to_string()));
        }
        let mut adapter = Self {
            command: config.command.clone(),
            startup_timeout: Duration::from_secs(config.startup_timeout_secs),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            state: ProcessState::Starting,
            worker: None,
            events,
            download_reported: false,
        };
        match adapter.launch().await {
            Ok(()) => Ok(adapter),
            Err(e) => {
                adapter.state = ProcessState::Failed;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Whether requests can still be served
    pub fn is_usable(&self) -> bool {
        self.state != ProcessState::Failed
    }

    /// Recognize one PNG-encoded image
    pub async fn recognize(&mut self, png: &[u8]) -> Result<String, OcrError> {
        let framed = frame_request(png)?;
        let Some(worker) = self.worker.as_mut().filter(|_| self.state == ProcessState::Ready) else {
            return Err(OcrError::BackendError("manga-ocr is not running".to_string()));
        };

        self.state = ProcessState::Processing;
        let outcome = tokio::time::timeout(self.request_timeout, worker.exchange(&framed)).await;
        match outcome {
            Ok(Ok(text)) => {
                self.state = ProcessState::Ready;
                Ok(text)
            }
            Ok(Err(e)) => {
                error!("manga-ocr crashed: {}", e);
                self.fail().await;
                Err(e)
            }
            Err(_) => {
                warn!("manga-ocr did not answer within {:?}, restarting", self.request_timeout);
                let _ = self.events.send(RecognizerEvent::TimedOutRestarting);
                if let Err(e) = self.restart().await {
                    error!("manga-ocr could not be restarted: {}", e);
                    self.fail().await;
                }
                Err(OcrError::TimedOut)
            }
        }
    }

    async fn restart(&mut self) -> Result<(), OcrError> {
        self.state = ProcessState::Restarting;
        let mut last_error = OcrError::ExecutionFailed("restart not attempted".to_string());
        for attempt in 1..=MAX_RESTART_ATTEMPTS {
            if let Some(worker) = self.worker.take() {
                worker.shutdown().await;
            }
            match self.launch().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("manga-ocr restart attempt {} failed: {}", attempt, e);
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn fail(&mut self) {
        self.state = ProcessState::Failed;
        if let Some(worker) = self.worker.take() {
            worker.shutdown().await;
        }
        let _ = self.events.send(RecognizerEvent::Crashed);
    }

    /// Spawn a fresh process and run the startup handshake
    async fn launch(&mut self) -> Result<(), OcrError> {
        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OcrError::ExecutionFailed(format!("could not start manga-ocr: {e}")))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(OcrError::ExecutionFailed("manga-ocr pipes unavailable".to_string()));
        };
        let mut worker = Worker {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        let handshake = tokio::time::timeout(self.startup_timeout, self.handshake(&mut worker.stdout)).await;
        match handshake {
            Ok(Ok(())) => {
                info!("manga-ocr ready");
                self.worker = Some(worker);
                self.state = ProcessState::Ready;
                Ok(())
            }
            Ok(Err(e)) => {
                worker.shutdown().await;
                Err(e)
            }
            Err(_) => {
                worker.shutdown().await;
                Err(OcrError::TimedOut)
            }
        }
    }

    async fn handshake(&mut self, stdout: &mut BufReader<ChildStdout>) -> Result<(), OcrError> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = stdout
                .read_line(&mut line)
                .await
                .map_err(|e| OcrError::ExecutionFailed(format!("reading manga-ocr output failed: {e}")))?;
            if read == 0 {
                return Err(OcrError::ExecutionFailed("manga-ocr exited during startup".to_string()));
            }
            let line = line.trim();
            if line == READY_LINE {
                return Ok(());
            }
            if line.starts_with(DOWNLOADING_PREFIX) {
                if !self.download_reported {
                    info!("manga-ocr is downloading its model");
                    self.download_reported = true;
                    let _ = self.events.send(RecognizerEvent::ModelDownloading);
                }
            } else {
                debug!("manga-ocr: {}", line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{unbounded, Receiver};
    use std::path::Path;
    use tempfile::TempDir;

    #[test]
    fn test_frame_request() {
        let framed = frame_request(&[0xAA; 258]).unwrap();
        assert_eq!(&framed[..4], &[0, 0, 1, 2]);
        assert_eq!(framed.len(), 262);
        assert_eq!(frame_request(&[]).unwrap(), vec![0, 0, 0, 0]);
    }

    /// Reads one framed request and answers with its payload length
    const SERVE_LOOP: &str = r#"
while true; do
  set -- $(dd bs=1 count=4 2>/dev/null | od -An -tu1)
  [ -z "$4" ] && exit 0
  len=$(( ($1 << 24) + ($2 << 16) + ($3 << 8) + $4 ))
  dd bs=1 count=$len 2>/dev/null > /dev/null
  echo "文字 $len"
done
"#;

    fn script(dir: &Path, name: &str, body: &str) -> MangaOcrConfig {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        MangaOcrConfig {
            command: vec!["/bin/sh".to_string(), path.to_string_lossy().into_owned()],
            startup_timeout_secs: 5,
            request_timeout_secs: 5,
        }
    }

    fn drain(rx: &Receiver<RecognizerEvent>) -> Vec<RecognizerEvent> {
        rx.try_iter().collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handshake_and_requests() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "echo 'Downloading model.safetensors'\necho 'Downloading tokenizer'\necho 'loaded'\necho READY\n{}",
            SERVE_LOOP
        );
        let config = script(dir.path(), "server.sh", &body);
        let (tx, rx) = unbounded();

        let mut adapter = MangaOcrAdapter::start(&config, tx).await.unwrap();
        assert_eq!(adapter.state(), ProcessState::Ready);
        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], RecognizerEvent::ModelDownloading));

        assert_eq!(adapter.recognize(&[1, 2, 3]).await.unwrap(), "文字 3");
        assert_eq!(adapter.recognize(&[7; 300]).await.unwrap(), "文字 300");
        assert_eq!(adapter.state(), ProcessState::Ready);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_restarts_process() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("hung-once");
        // the first process hangs on its first request, later ones answer
        let body = format!(
            "echo READY\nif [ ! -e '{m}' ]; then touch '{m}'; dd bs=1 count=4 2>/dev/null >/dev/null; sleep 30; fi\n{loop_}",
            m = marker.display(),
            loop_ = SERVE_LOOP
        );
        let mut config = script(dir.path(), "server.sh", &body);
        config.request_timeout_secs = 1;
        let (tx, rx) = unbounded();

        let mut adapter = MangaOcrAdapter::start(&config, tx).await.unwrap();
        assert_eq!(adapter.recognize(&[1, 2]).await, Err(OcrError::TimedOut));
        assert_eq!(adapter.state(), ProcessState::Ready);
        assert!(drain(&rx).iter().any(|e| matches!(e, RecognizerEvent::TimedOutRestarting)));

        assert_eq!(adapter.recognize(&[1, 2]).await.unwrap(), "文字 2");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handshake_failure() {
        let dir = TempDir::new().unwrap();
        let config = script(dir.path(), "broken.sh", "echo 'ImportError: no module named torch'\nexit 1\n");
        let (tx, _rx) = unbounded();

        let result = MangaOcrAdapter::start(&config, tx).await;
        assert!(matches!(result, Err(OcrError::ExecutionFailed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_crash_is_fatal() {
        let dir = TempDir::new().unwrap();
        let config = script(dir.path(), "crash.sh", "echo READY\ndd bs=1 count=4 2>/dev/null >/dev/null\nexit 3\n");
        let (tx, rx) = unbounded();

        let mut adapter = MangaOcrAdapter::start(&config, tx).await.unwrap();
        assert!(adapter.recognize(&[9; 16]).await.is_err());
        assert_eq!(adapter.state(), ProcessState::Failed);
        assert!(!adapter.is_usable());
        assert!(drain(&rx).iter().any(|e| matches!(e, RecognizerEvent::Crashed)));

        let again = adapter.recognize(&[9; 16]).await;
        assert!(matches!(again, Err(OcrError::BackendError(_))));
    }
}
