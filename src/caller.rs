use anyhow::{Context, Result, anyhow};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;
use tracing::debug;
use wait_timeout::ChildExt;

use crate::harness::{FrozenClock, InMemoryMocks, MockCall};
use crate::path::Path;
use crate::types::ErrorInfo;
use crate::value::Value;

/// 30 sekund per jobb
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    #[serde(default)]
    pub body: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub errors: Vec<ErrorInfo>,
    #[serde(default)]
    pub body: Value,
}

/// What one job returned: job-level errors and one result per requested action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub errors: Vec<ErrorInfo>,
    #[serde(default)]
    pub actions: Vec<ActionResult>,
}

/// Sends a job to the service under test.
pub trait ActionCaller: Send + Sync {
    fn call(&self, service: &str, actions: &[ActionRequest], context: &Value, control: &Value) -> Result<JobResult>;

    /// Check that the caller can run at all, before any fixture starts.
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// A call a stubbed action received, as reported back by the external program.
#[derive(Debug, Clone, Deserialize)]
struct StubCall {
    service: String,
    action: String,
    #[serde(default)]
    body: Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(flatten)]
    job: JobResult,
    #[serde(default)]
    mock_calls: IndexMap<String, Vec<MockCall>>,
    #[serde(default)]
    stub_calls: Vec<StubCall>,
}

/// Generisk caller som køyrer eit eksternt program per jobb.
///
/// The request goes to stdin as one JSON document:
/// `{service, actions, context, control, harness: {mocks, stubs, frozen_time}}`.
/// The program answers on stdout with a `JobResult`, optionally carrying `mock_calls` and
/// `stub_calls` observed while serving it.
#[derive(Debug, Clone)]
pub struct CommandCaller {
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
    pub quiet: bool, // demp stderr frå programmet når true
    pub mocks: Option<InMemoryMocks>,
    pub clock: Option<FrozenClock>,
}

impl CommandCaller {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout: None,
            quiet: false,
            mocks: None,
            clock: None,
        }
    }

    fn request(&self, service: &str, actions: &[ActionRequest], context: &Value, control: &Value) -> Result<String> {
        let mut harness = match &self.mocks {
            Some(m) => m.snapshot(),
            None => Value::map(),
        };
        if let Some(at) = self.clock.as_ref().and_then(FrozenClock::frozen_at) {
            harness.put_path(
                &Path::root().key("frozen_time"),
                Value::text(at.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            )?;
        }
        let request = serde_json::json!({
            "service": service,
            "actions": actions,
            "context": context,
            "control": control,
            "harness": harness,
        });
        Ok(serde_json::to_string(&request)?)
    }

    fn record(&self, response: &WireResponse) {
        let Some(mocks) = &self.mocks else {
            return;
        };
        for (target, calls) in &response.mock_calls {
            for call in calls {
                mocks.record_call(target, call.clone());
            }
        }
        for call in &response.stub_calls {
            mocks.record_stub_call(&call.service, &call.action, call.body.clone());
        }
    }
}

impl ActionCaller for CommandCaller {
    fn call(&self, service: &str, actions: &[ActionRequest], context: &Value, control: &Value) -> Result<JobResult> {
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let payload = self.request(service, actions, context, control)?;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if self.quiet {
                Stdio::null()
            } else {
                Stdio::inherit()
            });

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Klarte ikkje å starta '{}'", self.command))?;

        // stdout is drained while the program runs, so a large answer cannot fill the pipe
        let mut stdout = child.stdout.take().ok_or_else(|| anyhow!("Manglar stdout"))?;
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });

        {
            let mut stdin = child.stdin.take().ok_or_else(|| anyhow!("Manglar stdin"))?;
            stdin.write_all(payload.as_bytes())?;
            // stdin is dropped here, which signals EOF
        }

        let status = child.wait_timeout(timeout)?;
        if status.is_none() {
            let _ = child.kill();
            let _ = child.wait();
        }
        let stdout = reader
            .join()
            .map_err(|_| anyhow!("Lesaren for '{}' krasja", self.command))??;
        match status {
            Some(status) if !status.success() => {
                return Err(anyhow!("'{}' feila med status {}", self.command, status));
            }
            Some(_) => {}
            None => {
                return Err(anyhow!("'{}' tidsavbrot etter {} s", self.command, timeout.as_secs()));
            }
        }

        let response: WireResponse = serde_json::from_slice(&stdout).with_context(|| {
            format!(
                "'{}' returned an invalid job result: {}",
                self.command,
                String::from_utf8_lossy(&stdout).trim()
            )
        })?;
        debug!(
            service,
            actions = actions.len(),
            job_errors = response.job.errors.len(),
            "job finished"
        );
        self.record(&response);
        Ok(response.job)
    }

    fn validate(&self) -> Result<()> {
        match which::which(&self.command) {
            Ok(_) => Ok(()),
            Err(_) if std::path::Path::new(&self.command).is_file() => Ok(()),
            Err(e) => Err(anyhow!(
                "Kommandoen '{}' finst ikkje eller kan ikkje køyrast. Sjekk at den er installert og i PATH: {}",
                self.command,
                e
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::MockingCollaborator;

    #[test]
    fn wire_response_carries_calls() {
        let raw = r#"{
            "errors": [],
            "actions": [{"action": "get_user", "errors": [], "body": {"id": 1}}],
            "mock_calls": {"app.redis": [{"path": "get", "args": [["k"], {}]}]},
            "stub_calls": [{"service": "auth", "action": "check", "body": {"token": "x"}}]
        }"#;
        let response: WireResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.job.actions[0].body.lookup("id"), Some(&Value::Int(1)));

        let mocks = InMemoryMocks::new();
        let caller = CommandCaller {
            mocks: Some(mocks.clone()),
            ..CommandCaller::new("true")
        };
        caller.record(&response);
        assert_eq!(mocks.calls("app.redis").len(), 1);
        assert_eq!(mocks.stub_calls("auth", "check").len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn large_answers_are_read_in_full() {
        let script = concat!(
            "cat > /dev/null; ",
            r#"printf '{"errors": [], "actions": [{"action": "export", "body": {"blob": "'; "#,
            "head -c 200000 /dev/zero | tr '\\0' a; ",
            r#"printf '"}}]}'"#,
        );
        let caller = CommandCaller {
            args: vec!["-c".to_string(), script.to_string()],
            timeout: Some(Duration::from_secs(10)),
            ..CommandCaller::new("sh")
        };
        let job = caller.call("reports", &[], &Value::map(), &Value::map()).unwrap();
        let blob = job.actions[0].body.lookup("blob").and_then(Value::as_str).unwrap();
        assert_eq!(blob.len(), 200_000);
    }
}
