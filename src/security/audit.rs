//! Audit recording.
//!
//! Every tier access, escalation decision and approval event is recorded
//! against its request id. Trails are append-only: entries are never mutated
//! or removed for the lifetime of the recorder.
//!
//! # Ordering
//!
//! Each request owns its own trail lock, so concurrent requests never contend
//! with each other and entries within one request are sequenced in append
//! order.
//!
//! # HMAC Chain Integrity
//!
//! When a key is configured, each entry carries an HMAC-SHA256 over its
//! canonical form and the previous entry's HMAC in the same trail. Use
//! [`AuditRecorder::verify_trail`] to detect tampering or deletion.
//!
//! # File Sink
//!
//! With a file path configured, entries are also written as JSON lines by a
//! background thread. Appending never waits on disk I/O.

use crate::config::AuditSettings;
use crate::models::{AuditEventType, RequestId, Tier};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;

type HmacSha256 = Hmac<Sha256>;

/// Previous-HMAC value of the first entry in every trail.
pub const GENESIS_HMAC: &str = "genesis";

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry id.
    pub id: String,
    /// Request the entry belongs to.
    pub request_id: RequestId,
    /// Position within the request's trail, starting at 0.
    pub sequence: u64,
    /// What happened.
    pub event_type: AuditEventType,
    /// Tier involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    /// One-line human-readable summary.
    pub payload_summary: String,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Structured details.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// HMAC-SHA256 signature of this entry (when signing is enabled).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_signature: Option<String>,
    /// HMAC of the previous entry in the trail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hmac: Option<String>,
}

impl AuditEntry {
    /// Creates an unsequenced entry.
    #[must_use]
    pub fn new(
        request_id: RequestId,
        event_type: AuditEventType,
        payload_summary: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id,
            sequence: 0,
            event_type,
            tier: None,
            payload_summary: payload_summary.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
            hmac_signature: None,
            previous_hmac: None,
        }
    }

    /// Sets the tier.
    #[must_use]
    pub const fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Sets structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Canonical string covered by the HMAC.
    #[must_use]
    pub fn canonical_string(&self, previous_hmac: &str) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.id,
            self.request_id,
            self.sequence,
            self.event_type,
            self.tier.map_or("-", Tier::as_str),
            self.payload_summary,
            self.timestamp.to_rfc3339(),
            previous_hmac
        )
    }

    /// Computes the HMAC for this entry.
    #[must_use]
    pub fn compute_hmac(&self, key: &[u8], previous_hmac: &str) -> Option<String> {
        let mut mac = HmacSha256::new_from_slice(key).ok()?;
        mac.update(self.canonical_string(previous_hmac).as_bytes());
        Some(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signs the entry, linking it to `previous_hmac`.
    pub fn sign(&mut self, key: &[u8], previous_hmac: &str) -> bool {
        if let Some(sig) = self.compute_hmac(key, previous_hmac) {
            self.previous_hmac = Some(previous_hmac.to_string());
            self.hmac_signature = Some(sig);
            true
        } else {
            false
        }
    }

    /// Verifies this entry's signature.
    #[must_use]
    pub fn verify(&self, key: &[u8]) -> bool {
        let (Some(signature), Some(previous)) = (&self.hmac_signature, &self.previous_hmac) else {
            return false;
        };
        self.compute_hmac(key, previous)
            .is_some_and(|computed| computed == *signature)
    }
}

#[derive(Debug)]
struct Trail {
    entries: Vec<AuditEntry>,
    last_hmac: String,
}

impl Trail {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            last_hmac: GENESIS_HMAC.to_string(),
        }
    }
}

struct FileSink {
    sender: mpsc::Sender<AuditEntry>,
    worker: JoinHandle<()>,
}

/// Append-only audit log keyed by request id.
pub struct AuditRecorder {
    trails: RwLock<HashMap<RequestId, Arc<Mutex<Trail>>>>,
    hmac_key: Option<SecretString>,
    sink: Mutex<Option<FileSink>>,
    sink_path: Option<PathBuf>,
}

impl AuditRecorder {
    /// Creates an in-memory recorder without signing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            trails: RwLock::new(HashMap::new()),
            hmac_key: None,
            sink: Mutex::new(None),
            sink_path: None,
        }
    }

    /// Creates a recorder from settings, starting the file sink if configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the audit file cannot be opened.
    pub fn from_settings(settings: &AuditSettings) -> Result<Self> {
        let mut recorder = Self::new();
        recorder.hmac_key.clone_from(&settings.hmac_key);
        if let Some(path) = &settings.file_path {
            recorder = recorder.with_file_sink(path)?;
        }
        Ok(recorder)
    }

    /// Enables HMAC chaining.
    #[must_use]
    pub fn with_hmac_key(mut self, key: SecretString) -> Self {
        self.hmac_key = Some(key);
        self
    }

    /// Starts a JSON-lines file sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for appending.
    pub fn with_file_sink(mut self, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_audit_dir".to_string(),
                cause: e.to_string(),
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::OperationFailed {
                operation: "open_audit_file".to_string(),
                cause: format!("{}: {e}", path.display()),
            })?;

        let (sender, receiver) = mpsc::channel::<AuditEntry>();
        let worker = std::thread::Builder::new()
            .name("groundline-audit".to_string())
            .spawn(move || {
                let mut writer = BufWriter::new(file);
                for entry in receiver {
                    let written = serde_json::to_string(&entry)
                        .map_err(|e| e.to_string())
                        .and_then(|line| writeln!(writer, "{line}").map_err(|e| e.to_string()));
                    if let Err(e) = written {
                        tracing::warn!(error = %e, "Failed to write audit entry");
                    }
                    let _ = writer.flush();
                }
            })
            .map_err(|e| Error::OperationFailed {
                operation: "spawn_audit_writer".to_string(),
                cause: e.to_string(),
            })?;

        self.sink = Mutex::new(Some(FileSink { sender, worker }));
        self.sink_path = Some(path.to_path_buf());
        Ok(self)
    }

    /// Returns true if entries are HMAC-chained.
    #[must_use]
    pub const fn is_signing_enabled(&self) -> bool {
        self.hmac_key.is_some()
    }

    /// Path of the file sink, if any.
    #[must_use]
    pub fn sink_path(&self) -> Option<&Path> {
        self.sink_path.as_deref()
    }

    fn trail(&self, request_id: &RequestId) -> Arc<Mutex<Trail>> {
        if let Some(trail) = self
            .trails
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request_id)
        {
            return Arc::clone(trail);
        }
        let mut trails = self.trails.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            trails
                .entry(request_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Trail::new()))),
        )
    }

    /// Appends an entry to its request's trail, assigning the sequence number
    /// and signature. Returns the stored entry.
    pub fn append(&self, mut entry: AuditEntry) -> AuditEntry {
        let trail = self.trail(&entry.request_id);
        let mut trail = trail.lock().unwrap_or_else(PoisonError::into_inner);

        entry.sequence = trail.entries.len() as u64;
        if let Some(key) = &self.hmac_key
            && entry.sign(key.expose_secret().as_bytes(), &trail.last_hmac)
            && let Some(sig) = &entry.hmac_signature
        {
            trail.last_hmac.clone_from(sig);
        }
        trail.entries.push(entry.clone());

        if let Some(sink) = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            let _ = sink.sender.send(entry.clone());
        }
        drop(trail);

        metrics::counter!("groundline_audit_entries_total", "event" => entry.event_type.as_str())
            .increment(1);
        tracing::trace!(
            request_id = %entry.request_id,
            sequence = entry.sequence,
            event = %entry.event_type,
            "{}",
            entry.payload_summary
        );
        entry
    }

    /// Records an event.
    pub fn record(
        &self,
        request_id: &RequestId,
        event_type: AuditEventType,
        tier: Option<Tier>,
        payload_summary: impl Into<String>,
        metadata: serde_json::Value,
    ) -> AuditEntry {
        let mut entry =
            AuditEntry::new(request_id.clone(), event_type, payload_summary).with_metadata(metadata);
        entry.tier = tier;
        self.append(entry)
    }

    /// Records that a tier failed and contributed nothing.
    pub fn report_failure(&self, request_id: &RequestId, tier: Tier, reason: &str) -> AuditEntry {
        self.record(
            request_id,
            AuditEventType::TierFailure,
            Some(tier),
            format!("{tier} failed: {reason}"),
            serde_json::json!({ "reason": reason }),
        )
    }

    /// Returns a copy of a request's trail, in append order.
    #[must_use]
    pub fn get_trail(&self, request_id: &RequestId) -> Vec<AuditEntry> {
        let trail = self
            .trails
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request_id)
            .cloned();
        trail.map_or_else(Vec::new, |trail| {
            trail
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entries
                .clone()
        })
    }

    /// Ids of every request with a trail.
    #[must_use]
    pub fn request_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self
            .trails
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Verifies the HMAC chain of one request trail.
    ///
    /// # Errors
    ///
    /// Returns an error if no key is configured, or an entry is unsigned,
    /// re-linked or altered.
    pub fn verify_trail(&self, request_id: &RequestId) -> Result<()> {
        let key = self.hmac_key.as_ref().ok_or_else(|| Error::OperationFailed {
            operation: "verify_trail".to_string(),
            cause: "no HMAC key configured".to_string(),
        })?;
        verify_entries(&self.get_trail(request_id), key.expose_secret().as_bytes())
    }

    /// Stops the file sink after writing every queued entry.
    pub fn close(&self) {
        let sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(FileSink { sender, worker }) = sink {
            drop(sender);
            if worker.join().is_err() {
                tracing::warn!("Audit writer thread panicked");
            }
        }
    }
}

/// Verifies a chained trail against a key.
///
/// # Errors
///
/// Returns an error naming the first broken entry.
pub fn verify_entries(entries: &[AuditEntry], key: &[u8]) -> Result<()> {
    let broken = |cause: String| Error::OperationFailed {
        operation: "verify_trail".to_string(),
        cause,
    };
    let mut expected_previous = GENESIS_HMAC.to_string();

    for (i, entry) in entries.iter().enumerate() {
        let Some(signature) = &entry.hmac_signature else {
            return Err(broken(format!("entry {i} missing hmac_signature")));
        };
        let Some(previous) = &entry.previous_hmac else {
            return Err(broken(format!("entry {i} missing previous_hmac")));
        };
        if *previous != expected_previous {
            return Err(broken(format!(
                "entry {i} chain broken: expected previous '{expected_previous}', got '{previous}'"
            )));
        }
        if !entry.verify(key) {
            return Err(broken(format!("entry {i} has invalid signature")));
        }
        expected_previous.clone_from(signature);
    }
    Ok(())
}

impl Default for AuditRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AuditRecorder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed() -> AuditRecorder {
        AuditRecorder::new().with_hmac_key(SecretString::from("test-key".to_string()))
    }

    #[test]
    fn test_trails_are_per_request_and_sequenced() {
        let recorder = AuditRecorder::new();
        let a = RequestId::new("a");
        let b = RequestId::new("b");
        recorder.record(&a, AuditEventType::RequestReceived, None, "start", serde_json::Value::Null);
        recorder.record(&b, AuditEventType::RequestReceived, None, "start", serde_json::Value::Null);
        recorder.report_failure(&a, Tier::Documents, "timeout");

        let trail = recorder.get_trail(&a);
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].sequence, 0);
        assert_eq!(trail[1].sequence, 1);
        assert_eq!(trail[1].event_type, AuditEventType::TierFailure);
        assert_eq!(trail[1].tier, Some(Tier::Documents));
        assert_eq!(recorder.get_trail(&b).len(), 1);
        assert!(recorder.get_trail(&RequestId::new("none")).is_empty());
        assert_eq!(recorder.request_ids(), vec![a, b]);
    }

    #[test]
    fn test_hmac_chain_verifies_per_trail() {
        let recorder = signed();
        let id = RequestId::new("r1");
        for i in 0..4 {
            recorder.record(
                &id,
                AuditEventType::TierQuery,
                Some(Tier::SessionMemory),
                format!("query {i}"),
                serde_json::Value::Null,
            );
        }
        assert!(recorder.verify_trail(&id).is_ok());

        let trail = recorder.get_trail(&id);
        assert_eq!(trail[0].previous_hmac.as_deref(), Some(GENESIS_HMAC));
        assert_eq!(trail[1].previous_hmac, trail[0].hmac_signature);
    }

    #[test]
    fn test_tampering_is_detected() {
        let recorder = signed();
        let id = RequestId::new("r1");
        for _ in 0..3 {
            recorder.record(&id, AuditEventType::TierQuery, None, "q", serde_json::Value::Null);
        }
        let mut trail = recorder.get_trail(&id);
        trail[1].payload_summary = "edited".to_string();
        assert!(verify_entries(&trail, b"test-key").is_err());

        let mut trail = recorder.get_trail(&id);
        trail.remove(1);
        assert!(verify_entries(&trail, b"test-key").is_err());
    }

    #[test]
    fn test_verify_without_key_fails() {
        let recorder = AuditRecorder::new();
        assert!(recorder.verify_trail(&RequestId::new("x")).is_err());
    }

    #[test]
    fn test_file_sink_writes_json_lines() {
        let Ok(dir) = tempfile::tempdir() else {
            return;
        };
        let path = dir.path().join("audit").join("trail.jsonl");
        let Ok(recorder) = AuditRecorder::new().with_file_sink(&path) else {
            return;
        };
        let id = RequestId::new("r1");
        recorder.record(&id, AuditEventType::RequestReceived, None, "start", serde_json::Value::Null);
        recorder.record(&id, AuditEventType::AnswerFinal, None, "done", serde_json::Value::Null);
        recorder.close();

        let contents = std::fs::read_to_string(&path).unwrap_or_default();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: Option<AuditEntry> = serde_json::from_str(lines[1]).ok();
        assert_eq!(parsed.map(|e| e.event_type), Some(AuditEventType::AnswerFinal));
    }
}
