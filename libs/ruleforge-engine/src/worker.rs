//! Worker execution context
//!
//! Each worker is an OS thread fed through its own channel. A job arrives as JSON
//! bytes; the worker rebuilds a rule table from the job's dependency closure only,
//! runs the rule and answers with JSON bytes. Rule errors become structured
//! replies and the worker keeps serving. A panic ends the thread; the pool sees
//! the dropped reply channel and replaces the worker.

use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tracing::{debug, error, trace};

use crate::context::{run_rule, RuleTable};
use crate::job::{JobHeader, JobId, JobOutcome, JobPayload, JobReply};
use crate::types::MetaData;

/// Executes one encoded job and produces the encoded reply
pub type JobRunner = fn(&[u8]) -> Vec<u8>;

/// Message sent from the pool to a worker thread
pub(crate) enum WorkerMessage {
    Run {
        payload: Vec<u8>,
        reply: oneshot::Sender<Vec<u8>>,
    },
    Shutdown,
}

#[cfg(test)]
thread_local! {
    /// Makes `spawn_worker` fail when called from this thread
    pub(crate) static REFUSE_SPAWN: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

#[cfg(test)]
fn spawn_refused() -> bool {
    REFUSE_SPAWN.with(|refuse| refuse.get())
}

#[cfg(not(test))]
fn spawn_refused() -> bool {
    false
}

/// Spawn a worker thread bound to its own job channel
pub(crate) fn spawn_worker(
    worker_id: u64,
    runner: JobRunner,
) -> std::io::Result<(mpsc::Sender<WorkerMessage>, JoinHandle<()>)> {
    if spawn_refused() {
        return Err(std::io::Error::other("thread spawning refused"));
    }
    let (tx, rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name(format!("rule-worker-{}", worker_id))
        .spawn(move || worker_loop(worker_id, rx, runner))?;
    Ok((tx, handle))
}

fn worker_loop(worker_id: u64, rx: mpsc::Receiver<WorkerMessage>, runner: JobRunner) {
    debug!("Worker {} started", worker_id);
    while let Ok(message) = rx.recv() {
        match message {
            WorkerMessage::Run { payload, reply } => {
                let answer = runner(&payload);
                if reply.send(answer).is_err() {
                    // Caller side gave up (timeout or pool shutdown)
                    trace!("Worker {} reply dropped", worker_id);
                }
            },
            WorkerMessage::Shutdown => break,
        }
    }
    debug!("Worker {} stopped", worker_id);
}

/// Standard job executor used by pool workers
///
/// Only the rules listed in the payload's dependency closure are callable.
pub fn execute_payload(bytes: &[u8]) -> Vec<u8> {
    let reply = match JobPayload::decode(bytes) {
        Ok(payload) => execute(payload),
        Err(e) => {
            let header = JobHeader::peek(bytes);
            error!("Undecodable job payload: {}", e);
            JobReply {
                job_id: header.as_ref().map_or(JobId(0), |h| h.job_id),
                outcome: JobOutcome::Undecodable {
                    rule: header.map(|h| h.rule_id.to_string()),
                    message: e.to_string(),
                },
            }
        },
    };

    match reply.encode() {
        Ok(encoded) => encoded,
        Err(e) => {
            error!("Failed to encode job reply: {}", e);
            Vec::new()
        },
    }
}

fn execute(payload: JobPayload) -> JobReply {
    let JobPayload {
        job_id,
        rule_id,
        input_data,
        input_meta_data,
        dependency_closure,
    } = payload;

    let table = RuleTable::from_ids(dependency_closure);
    let meta = MetaData::from(input_meta_data);

    match run_rule(&table, rule_id, input_data, &meta) {
        Ok(value) => JobReply::value(job_id, value),
        Err(err) => {
            debug!("{} ({}) failed: {}", job_id, rule_id, err);
            JobReply::error(job_id, rule_id, err)
        },
    }
}
