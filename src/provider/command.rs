//! External driver provider.
//!
//! For every node the driver is spawned once with its configured arguments.
//! It receives `{"operation": ..., "request": ...}` as JSON on stdin and
//! answers with a JSON object of reported attributes on stdout (empty output
//! means no attributes). A non-zero exit fails the node with the driver's
//! stderr.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::thread;
use topology::{NodeRequest, Outputs, Provider};

#[derive(Serialize)]
struct DriverCall<'a> {
    operation: &'a str,
    request: &'a NodeRequest<'a>,
}

#[derive(Debug, Clone)]
pub struct CommandProvider {
    command: String,
    args: Vec<String>,
}

impl CommandProvider {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn call(&self, operation: &str, request: &NodeRequest<'_>) -> Result<Outputs> {
        let payload = serde_json::to_vec(&DriverCall { operation, request })
            .context("Failed to serialize driver request")?;

        log::debug!(
            "Running driver {} {} for {} {}",
            self.command,
            self.args.join(" "),
            operation,
            request.logical_id
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to execute: {} {}", self.command, self.args.join(" ")))?;

        // stdin is written on its own thread while stdout and stderr drain
        let stdin = child.stdin.take();
        let (output, written) = thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(&payload),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::other("driver stdin writer panicked")));
            (output, written)
        });

        let output =
            output.with_context(|| format!("Failed to wait for driver: {}", self.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} {} failed ({}): {}",
                operation,
                request.logical_id,
                output.status,
                stderr.trim()
            );
        }

        // Drivers may answer without reading the whole request
        if let Err(e) = written
            && e.kind() != io::ErrorKind::BrokenPipe
        {
            return Err(e).context("Failed to write request to driver");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Outputs::new());
        }

        serde_json::from_str(stdout.trim())
            .with_context(|| format!("Driver returned invalid JSON for {}", request.logical_id))
    }
}

impl Provider for CommandProvider {
    fn create(&self, request: &NodeRequest<'_>) -> Result<Outputs> {
        self.call("create", request)
    }

    fn update(&self, request: &NodeRequest<'_>) -> Result<Outputs> {
        self.call("update", request)
    }

    fn replace(&self, request: &NodeRequest<'_>) -> Result<Outputs> {
        self.call("replace", request)
    }

    fn delete(&self, request: &NodeRequest<'_>) -> Result<()> {
        self.call("delete", request).map(|_| ())
    }
}
