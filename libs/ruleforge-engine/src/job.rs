//! Job types exchanged between the pool and its workers
//!
//! `JobPayload` and `JobReply` are the only things that cross a worker boundary,
//! and they always travel as JSON bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::catalog::RuleId;
use crate::error::{Result, RuleError};
use crate::types::{RuleData, WireMeta};

/// Pool-unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// One offloaded rule invocation
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: JobId,
    pub rule_id: RuleId,
    pub input_data: RuleData,
    pub input_meta_data: WireMeta,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    /// Encode the job together with its dependency closure
    pub fn encode(&self, dependency_closure: Vec<RuleId>) -> Result<Vec<u8>> {
        let payload = JobPayload {
            job_id: self.job_id,
            rule_id: self.rule_id,
            input_data: self.input_data.clone(),
            input_meta_data: self.input_meta_data.clone(),
            dependency_closure,
        };
        Ok(serde_json::to_vec(&payload)?)
    }
}

/// Wire form of a job as received by a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub job_id: JobId,
    pub rule_id: RuleId,
    pub input_data: RuleData,
    pub input_meta_data: WireMeta,
    pub dependency_closure: Vec<RuleId>,
}

impl JobPayload {
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Identifying fields of a payload, readable when the full decode is not
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct JobHeader {
    pub job_id: JobId,
    pub rule_id: RuleId,
}

impl JobHeader {
    pub(crate) fn peek(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Wire form of a worker's answer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobReply {
    pub job_id: JobId,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobOutcome {
    Value(RuleData),
    Error {
        #[serde(default)]
        rule: Option<String>,
        message: String,
        #[serde(default)]
        stack: Vec<String>,
        /// Set when the rule referenced something outside its closure
        #[serde(default)]
        missing_rule: Option<String>,
    },
    /// The worker could not decode the payload
    Undecodable {
        #[serde(default)]
        rule: Option<String>,
        message: String,
    },
}

impl JobReply {
    pub fn value(job_id: JobId, value: RuleData) -> Self {
        Self {
            job_id,
            outcome: JobOutcome::Value(value),
        }
    }

    /// Convert an execution error into its structured wire form
    pub fn error(job_id: JobId, rule_id: RuleId, err: RuleError) -> Self {
        let outcome = match err {
            RuleError::RuleNotFound(name) => JobOutcome::Error {
                rule: Some(rule_id.to_string()),
                message: format!("Rule not found: {}", name),
                stack: Vec::new(),
                missing_rule: Some(name),
            },
            RuleError::RuleFailed {
                rule,
                message,
                stack,
            } => JobOutcome::Error {
                rule: Some(rule),
                message,
                stack,
                missing_rule: None,
            },
            other => JobOutcome::Error {
                rule: Some(rule_id.to_string()),
                message: other.to_string(),
                stack: Vec::new(),
                missing_rule: None,
            },
        };
        Self { job_id, outcome }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Back to the caller-facing result
    ///
    /// `rule_id` is the submitted rule, named in errors the worker left anonymous.
    pub fn into_result(self, rule_id: RuleId) -> Result<RuleData> {
        match self.outcome {
            JobOutcome::Value(value) => Ok(value),
            JobOutcome::Undecodable { rule, message } => Err(RuleError::SerializationError(
                format!(
                    "{} payload rejected by worker: {}",
                    rule.unwrap_or_else(|| rule_id.to_string()),
                    message
                ),
            )),
            JobOutcome::Error {
                missing_rule: Some(name),
                ..
            } => Err(RuleError::RuleNotFound(name)),
            JobOutcome::Error {
                rule,
                message,
                stack,
                ..
            } => Err(RuleError::RuleFailed {
                rule: rule.unwrap_or_else(|| rule_id.to_string()),
                message,
                stack,
            }),
        }
    }
}

/// Completed job as returned to the submitter
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: JobId,
    pub worker_id: u64,
    pub value: RuleData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_wire_shape() {
        let job = Job {
            job_id: JobId(7),
            rule_id: RuleId::Double,
            input_data: json!(21),
            input_meta_data: WireMeta::Empty,
            submitted_at: Utc::now(),
        };
        let bytes = job.encode(vec![RuleId::Double]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({
                "jobId": 7,
                "ruleId": "double",
                "inputData": 21,
                "inputMetaData": {"kind": "empty"},
                "dependencyClosure": ["double"]
            })
        );

        let decoded = JobPayload::decode(&bytes).unwrap();
        assert_eq!(decoded.rule_id, RuleId::Double);
    }

    #[test]
    fn test_error_reply_keeps_stack() {
        let reply = JobReply::error(
            JobId(1),
            RuleId::Average,
            RuleError::RuleFailed {
                rule: "sum".to_string(),
                message: "expected a number, got string".to_string(),
                stack: vec!["average".to_string(), "sum".to_string()],
            },
        );
        let decoded = JobReply::decode(&reply.encode().unwrap()).unwrap();
        match decoded.into_result(RuleId::Average) {
            Err(RuleError::RuleFailed { rule, stack, .. }) => {
                assert_eq!(rule, "sum");
                assert_eq!(stack.len(), 2);
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_rule_round_trips_as_not_found() {
        let reply = JobReply::error(JobId(2), RuleId::Average, RuleError::not_found("arrayLength"));
        let decoded = JobReply::decode(&reply.encode().unwrap()).unwrap();
        assert!(matches!(
            decoded.into_result(RuleId::Average),
            Err(RuleError::RuleNotFound(name)) if name == "arrayLength"
        ));
    }

    #[test]
    fn test_anonymous_errors_name_the_submitted_rule() {
        let reply = JobReply {
            job_id: JobId(3),
            outcome: JobOutcome::Undecodable {
                rule: None,
                message: "recursion limit exceeded".to_string(),
            },
        };
        let err = reply.into_result(RuleId::ReverseArray).unwrap_err();
        assert!(matches!(
            err,
            RuleError::SerializationError(ref m) if m.starts_with("reverseArray")
        ));

        let reply = JobReply {
            job_id: JobId(4),
            outcome: JobOutcome::Error {
                rule: None,
                message: "boom".to_string(),
                stack: Vec::new(),
                missing_rule: None,
            },
        };
        let err = reply.into_result(RuleId::Sum).unwrap_err();
        assert!(matches!(err, RuleError::RuleFailed { ref rule, .. } if rule == "sum"));
    }

    #[test]
    fn test_header_peek_reads_identity() {
        let bytes = br#"{"jobId": 9, "ruleId": "sum", "inputData": [1, 2]}"#;
        let header = JobHeader::peek(bytes).unwrap();
        assert_eq!(header.job_id, JobId(9));
        assert_eq!(header.rule_id, RuleId::Sum);
        assert!(JobHeader::peek(b"garbage").is_none());
    }
}
