use crate::error::{LockError, RunError, StoreError};
use crate::job::{HttpMethod, Job, JobPayload, JobRun, JobStatus};
use crate::lock::LockManager;
use crate::messenger::Messenger;
use crate::store::{JobPatch, JobStore};

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, Instrument};

/// How long a finished run waits for pipe readers to observe EOF before
/// snapshotting the capture. A background child that inherited the pipe can
/// hold it open indefinitely; the bound keeps such jobs from stalling runs.
const PIPE_DRAIN_LIMIT: Duration = Duration::from_secs(1);

/// Result of one executed occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
  /// The job body ran on this node (successfully or not — failures are
  /// returned as errors, this variant only comes back on success).
  Completed,
  /// Another node owns this occurrence; nothing happened here.
  Skipped,
}

/// Output gathered from one occurrence, plus the failure if any.
struct Capture {
  stdout: String,
  stderr: String,
  error: Option<RunError>,
}

impl Capture {
  fn failed(error: RunError) -> Self {
    Self {
      stdout: String::new(),
      stderr: String::new(),
      error: Some(error),
    }
  }
}

/// Runs one job occurrence end-to-end: fetch, lock, execute under timeout,
/// capture output, persist, release.
///
/// The lock is released through the [`LeaseGuard`](crate::lock::LeaseGuard)
/// drop path, so an occurrence that errors out partway never strands its
/// lock.
pub struct TaskExecutor {
  store: Arc<dyn JobStore>,
  locks: LockManager,
  messenger: Messenger,
  http: reqwest::Client,
  default_tz: Tz,
}

impl TaskExecutor {
  pub fn new(
    store: Arc<dyn JobStore>,
    locks: LockManager,
    messenger: Messenger,
    default_tz: Tz,
  ) -> Self {
    Self {
      store,
      locks,
      messenger,
      http: reqwest::Client::new(),
      default_tz,
    }
  }

  /// Executes the current occurrence of `job_id`.
  ///
  /// Returns `Ok(RunOutcome::Skipped)` without side effects when another
  /// node holds the execution lock. Returns [`RunError::JobNotFound`] when
  /// the document is gone — the registry uses this to self-unregister.
  /// Every other failure is occurrence-local: it is persisted to the run
  /// log and job status before being returned.
  pub async fn run(&self, job_id: &str) -> Result<RunOutcome, RunError> {
    let job = match self.store.get_job(job_id).await {
      Ok(job) => job,
      Err(StoreError::NotFound) => return Err(RunError::JobNotFound(job_id.to_string())),
      Err(other) => return Err(other.into()),
    };

    let guard = match self.locks.acquire(&job.id).await {
      Ok(guard) => guard,
      Err(LockError::WaitForNextSchedule) => {
        debug!(job_id = %job.id, name = %job.name, "occurrence already owned, skipping tick");
        return Ok(RunOutcome::Skipped);
      }
      Err(LockError::Cache(cause)) => return Err(RunError::Lock(cause)),
    };

    let span = tracing::info_span!("job_run", job_id = %job.id, name = %job.name);
    let result = async {
      let started = Utc::now().timestamp();
      let capture = match &job.payload {
        JobPayload::Shell { command } => self.run_shell(&job, command).await,
        JobPayload::Http {
          endpoint,
          prefix,
          method,
          body,
        } => self.run_http(&job, endpoint, prefix, *method, body).await,
      };
      let ended = Utc::now().timestamp();

      self.finish(&job, &capture, started, ended).await;
      match capture.error {
        None => Ok(RunOutcome::Completed),
        Some(error) => Err(error),
      }
    }
    .instrument(span)
    .await;

    // The guard's drop signals the lease loop even if the block above
    // returned early; keep it alive until here regardless.
    drop(guard);
    result
  }

  // --- Shell Jobs ---

  async fn run_shell(&self, job: &Job, command: &str) -> Capture {
    if command.trim().is_empty() {
      return Capture::failed(RunError::EmptyCommand(job.id.clone()));
    }

    let mut cmd = Command::new("sh");
    cmd
      .arg("-c")
      .arg(command)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
      Ok(child) => child,
      Err(e) => return Capture::failed(RunError::Process(e)),
    };

    // Readers run concurrently with the child so a timeout still yields
    // whatever output was produced before the kill.
    let (stdout_buf, stdout_reader) = spawn_reader(child.stdout.take());
    let (stderr_buf, stderr_reader) = spawn_reader(child.stderr.take());

    let mut error = None;
    let mut timed_out = false;
    if job.timeout > 0 {
      tokio::select! {
        status = child.wait() => {
          error = exit_error(status);
        }
        _ = tokio::time::sleep(Duration::from_secs(job.timeout)) => {
          // Kills the direct child only; processes the shell spawned into
          // the background can outlive it.
          let _ = child.start_kill();
          let _ = child.wait().await;
          timed_out = true;
          error = Some(RunError::Timeout {
            command: command.to_string(),
            timeout_secs: job.timeout,
          });
        }
      }
    } else {
      error = exit_error(child.wait().await);
    }

    if !timed_out {
      for reader in [stdout_reader, stderr_reader].into_iter().flatten() {
        let _ = tokio::time::timeout(PIPE_DRAIN_LIMIT, reader).await;
      }
    }

    let stdout = String::from_utf8_lossy(&stdout_buf.lock()).into_owned();
    let mut stderr = String::from_utf8_lossy(&stderr_buf.lock()).into_owned();
    if let Some(cause) = &error {
      // The failure reason rides along in the captured stderr, the same
      // text the run log and the job status will reflect.
      if !stderr.is_empty() && !stderr.ends_with('\n') {
        stderr.push('\n');
      }
      stderr.push_str(&cause.to_string());
    }

    Capture {
      stdout,
      stderr,
      error,
    }
  }

  // --- HTTP Jobs ---

  async fn run_http(
    &self,
    job: &Job,
    endpoint: &str,
    prefix: &str,
    method: HttpMethod,
    body: &serde_json::Map<String, serde_json::Value>,
  ) -> Capture {
    let tz = match job.timezone_or(self.default_tz) {
      Ok(tz) => tz,
      Err(e) => return Capture::failed(e.into()),
    };
    let now = Utc::now().with_timezone(&tz);

    let url = format!("{endpoint}{prefix}");
    let mut body = body.clone();
    body.insert(
      "timestamp".to_string(),
      serde_json::Value::from(now.timestamp()),
    );

    let request = match method {
      HttpMethod::Get => self.http.get(&url),
      HttpMethod::Post => {
        let payload = match serde_json::to_vec(&body) {
          Ok(payload) => payload,
          Err(e) => return Capture::failed(RunError::Serialize(e)),
        };
        self
          .http
          .post(&url)
          .header("content-type", "application/json")
          .body(payload)
      }
    };
    let request = if job.timeout > 0 {
      request.timeout(Duration::from_secs(job.timeout))
    } else {
      request
    };

    debug!(%url, ?method, "dispatching http job");
    let response = match request.send().await {
      Ok(response) => response,
      Err(e) => return Capture::failed(RunError::Http(e)),
    };
    match response.text().await {
      Ok(text) => Capture {
        stdout: text,
        stderr: String::new(),
        error: None,
      },
      Err(e) => Capture::failed(RunError::Http(e)),
    }
  }

  // --- Persistence & Fan-out ---

  /// Records the run regardless of how it went: job status + `updated_at`
  /// always, a run log document when the job asks for one, and the output
  /// lines onto the live message stream.
  async fn finish(&self, job: &Job, capture: &Capture, started: i64, ended: i64) {
    let status = if capture.error.is_none() {
      JobStatus::Success
    } else {
      JobStatus::Failure
    };
    let patch = JobPatch {
      status: Some(status),
      updated_at: Some(Utc::now().timestamp()),
      ..Default::default()
    };
    if let Err(cause) = self.store.update_job(&job.id, &patch).await {
      error!(job_id = %job.id, error = %cause, "failed to persist job state after run");
    }

    if job.log_enabled {
      let run = JobRun::new(
        &job.id,
        capture.stdout.clone(),
        capture.stderr.clone(),
        started,
        ended,
      );
      if let Err(cause) = self.store.insert_run(&run).await {
        error!(job_id = %job.id, error = %cause, "failed to persist run log");
      }
    }

    self
      .messenger
      .publish(format!("{} stderr is : {}", job.name, capture.stderr));
    self
      .messenger
      .publish(format!("{} stdout is : {}", job.name, capture.stdout));
  }
}

/// Streams a child pipe into a shared buffer, chunk by chunk, so callers
/// can snapshot partial output at any point.
fn spawn_reader<R>(reader: Option<R>) -> (Arc<Mutex<Vec<u8>>>, Option<JoinHandle<()>>)
where
  R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
  let buf = Arc::new(Mutex::new(Vec::new()));
  let handle = reader.map(|mut reader| {
    let sink = buf.clone();
    tokio::spawn(async move {
      let mut chunk = [0u8; 4096];
      loop {
        match reader.read(&mut chunk).await {
          Ok(0) | Err(_) => break,
          Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
        }
      }
    })
  });
  (buf, handle)
}

fn exit_error(status: std::io::Result<std::process::ExitStatus>) -> Option<RunError> {
  match status {
    Ok(status) if status.success() => None,
    Ok(status) => Some(RunError::Exit(status)),
    Err(e) => Some(RunError::Process(e)),
  }
}
