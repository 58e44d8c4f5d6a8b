// SPDX-License-Identifier: MIT OR Apache-2.0
//! Append-only JSON-line audit sink.
//!
//! Every [`AuditRecord`] mcpguard produces is written as a single JSON
//! line, either to stderr or to a size-rotating file, matching the two
//! `logging.Handler`s the original gateway installs on its
//! `mcpguard.audit` logger.

mod rotate;

use std::sync::Mutex;

use mcpguard_core::AuditRecord;
use mcpguard_policy::{AuditOutput, LoggingSettings};
use rotate::RotatingFile;

enum Writer {
    Stderr,
    File(Mutex<RotatingFile>),
}

/// Writes [`AuditRecord`]s to the configured sink.
///
/// A write failure never fails the request it is auditing: it is logged at
/// `warn` via `tracing` and dropped. The audit trail is best-effort
/// observability, not the authority for whether a request was allowed.
pub struct AuditLogger {
    writer: Writer,
    policy_version: i64,
}

impl AuditLogger {
    /// Build a logger from the policy's logging settings.
    ///
    /// # Errors
    ///
    /// Returns an error if `output` is [`AuditOutput::File`] and the file
    /// cannot be opened for appending.
    pub fn new(settings: &LoggingSettings, policy_version: i64) -> std::io::Result<Self> {
        let writer = match settings.output() {
            AuditOutput::Stderr => Writer::Stderr,
            AuditOutput::File => {
                let file = RotatingFile::open(settings.file_path(), settings.rotate_bytes())?;
                Writer::File(Mutex::new(file))
            }
        };
        Ok(Self {
            writer,
            policy_version,
        })
    }

    /// Write one audit record.
    ///
    /// `record.policy_version` is overwritten with the version this logger
    /// was built with, so callers don't need to thread it through manually.
    pub async fn log(&self, mut record: AuditRecord) {
        record.policy_version = self.policy_version;
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize audit record");
                return;
            }
        };
        match &self.writer {
            Writer::Stderr => {
                tracing::info!(target: "mcpguard.audit", "{line}");
            }
            Writer::File(file) => {
                // File writes are append-only and small; done inline rather
                // than via spawn_blocking, matching the synchronous handler
                // the audit logger this mirrors uses.
                let result = {
                    let mut file = file.lock().expect("audit file mutex poisoned");
                    file.write_line(&line)
                };
                if let Err(err) = result {
                    tracing::warn!(error = %err, "failed to write audit record to file");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mcpguard_core::DecisionReason;
    use mcpguard_policy::Policy;
    use std::fs;

    fn sample_record() -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            identity: "alice".to_string(),
            tool: Some("calculator.add".to_string()),
            resource: None,
            action: "tool_call".to_string(),
            decision: DecisionReason::Allowed.as_str().to_string(),
            findings: Vec::new(),
            latency_ms: Some(0.5),
            request_hash: None,
            response_hash: None,
            policy_version: 0,
        }
    }

    #[tokio::test]
    async fn file_sink_writes_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let yaml = format!(
            "logging:\n  output: file\n  file_path: {:?}\n  rotate_bytes: 1000000\n",
            path.to_str().unwrap()
        );
        let policy = Policy::from_yaml(&yaml).unwrap();
        let logger = AuditLogger::new(policy.logging(), 7).unwrap();
        logger.log(sample_record()).await;
        logger.log(sample_record()).await;

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["identity"], "alice");
        assert_eq!(parsed["policy_version"], 7);
    }

    #[tokio::test]
    async fn stderr_sink_does_not_panic() {
        let policy = Policy::from_yaml("{}").unwrap();
        let logger = AuditLogger::new(policy.logging(), 1).unwrap();
        logger.log(sample_record()).await;
    }
}
