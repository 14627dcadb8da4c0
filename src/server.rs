//! Lifecycle of the external backend process.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::errors::HarnessError;

const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// A launched backend server.
pub struct ServerProcess {
    child: Child,
}

impl ServerProcess {
    /// Starts `{program} {script}`. Output is inherited so the server's own
    /// logs stay visible next to the harness.
    pub fn launch(program: &str, script: &Path) -> Result<Self, HarnessError> {
        let child = Command::new(program)
            .arg(script)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Launch {
                script: script.to_path_buf(),
                source,
            })?;

        info!(pid = ?child.id(), script = ?script, "Server process launched");
        Ok(Self { child })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Fails if the process has already exited.
    pub fn check_running(&mut self) -> Result<(), HarnessError> {
        match self.child.try_wait() {
            Ok(None) => Ok(()),
            Ok(Some(status)) => Err(HarnessError::ServerExited(status.to_string())),
            Err(e) => Err(HarnessError::ServerExited(e.to_string())),
        }
    }

    /// Asks the process to stop (SIGTERM on unix).
    pub fn terminate(&mut self) -> Result<(), HarnessError> {
        let Some(id) = self.child.id() else {
            // Already reaped.
            return Ok(());
        };

        #[cfg(unix)]
        let result = {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            signal::kill(Pid::from_raw(id as i32), Signal::SIGTERM)
                .map_err(|e| HarnessError::Shutdown(format!("SIGTERM to {} failed: {}", id, e)))
        };

        #[cfg(not(unix))]
        let result = {
            debug!(pid = id, "No graceful signal on this platform, killing");
            self.child
                .start_kill()
                .map_err(|e| HarnessError::Shutdown(e.to_string()))
        };

        result
    }

    /// Waits for the process to exit, force-killing it after `grace`.
    pub async fn wait(&mut self, grace: Duration) -> Result<ExitStatus, HarnessError> {
        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(status = %status, "Server process exited");
                return Ok(status);
            }
            Ok(Err(e)) => {
                error!(error = %e, "Error waiting for server process");
                return Err(HarnessError::Shutdown(e.to_string()));
            }
            Err(_) => {
                warn!(grace = ?grace, "Server did not exit after SIGTERM, killing it");
            }
        }

        self.child
            .kill()
            .await
            .map_err(|e| HarnessError::Shutdown(format!("kill failed: {}", e)))?;

        match timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err(HarnessError::Shutdown(e.to_string())),
            Err(_) => Err(HarnessError::Shutdown(
                "process unresponsive to kill".to_string(),
            )),
        }
    }
}

/// Polls `url` until the server answers with any HTTP status.
///
/// Connection failures are retried every 100ms. `deadline` bounds the whole
/// wait, including an attempt that is still in flight.
pub async fn wait_until_ready(
    client: &reqwest::Client,
    url: &str,
    deadline: Duration,
) -> Result<Duration, HarnessError> {
    let started = Instant::now();
    let probe = async {
        loop {
            match client.get(url).send().await {
                Ok(response) => {
                    debug!(url, status = %response.status(), "Readiness probe answered");
                    return started.elapsed();
                }
                Err(e) => {
                    debug!(url, error = %e, "Readiness probe failed");
                }
            }
            sleep(PROBE_INTERVAL).await;
        }
    };

    timeout(deadline, probe)
        .await
        .map_err(|_| HarnessError::ServerNotReady {
            url: url.to_string(),
            timeout: deadline,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn launch_of_missing_program_fails() {
        let err = ServerProcess::launch("/nonexistent/interpreter", Path::new("x.py"))
            .err()
            .unwrap();
        assert!(matches!(err, HarnessError::Launch { .. }));
    }

    #[tokio::test]
    async fn ready_probe_gives_up() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        // Port 9 (discard) is not expected to run an HTTP server.
        let err = wait_until_ready(&client, "http://127.0.0.1:9/db/1", Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::ServerNotReady { .. }));
    }

    #[tokio::test]
    async fn ready_probe_returns_once_server_answers() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = format!("{}/db/1", server.uri());
        let waited = wait_until_ready(&reqwest::Client::new(), &url, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(waited < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn ready_timeout_bounds_a_hung_attempt() {
        // The kernel completes the handshake but nothing ever answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/db/1", listener.local_addr().unwrap());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let started = Instant::now();
        let err = wait_until_ready(&client, &url, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::ServerNotReady { .. }));
        assert!(
            started.elapsed() < Duration::from_secs(2),
            "probe ran for {:?}",
            started.elapsed()
        );
        drop(listener);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exited_process_is_detected_and_reaped() {
        let mut server = ServerProcess::launch("true", Path::new("ignored")).unwrap();
        sleep(Duration::from_millis(200)).await;
        assert!(matches!(
            server.check_running(),
            Err(HarnessError::ServerExited(_))
        ));
        assert!(server.terminate().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_stops_long_running_process() {
        let mut server = ServerProcess::launch("sleep", Path::new("30")).unwrap();
        server.check_running().unwrap();
        server.terminate().unwrap();
        let status = server.wait(Duration::from_secs(5)).await.unwrap();
        assert!(!status.success());
    }
}
