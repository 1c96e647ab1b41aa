//! Concurrent probe/observe sessions.
//!
//! A session runs a batch of prober and observer tasks, one thread each,
//! against a shared results table. Observers are started first and each
//! confirms its capture is open before any prober is released, so a probe
//! cannot depart before its observer is listening. Every thread is joined
//! before the session returns; the first task failure, in task order, is
//! surfaced only after the join.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, warn};

use crate::error::Error;
use crate::net;
use crate::observe::{ObserveSpec, Observer};
use crate::probe::{ProbeSpec, Prober};

/// One unit of work in a session.
#[derive(Debug, Clone)]
pub enum Task {
    /// Emit echo probes, fire and forget.
    Probe(ProbeSpec),
    /// Capture matching packets and record the count under the task's
    /// interface in the session's results table.
    Observe(ObserveSpec),
}

/// Per-interface observed counts.
///
/// Shared by every observer of one session; each slot is written exactly
/// once, by the observer for that interface, after its capture window
/// closes. All access goes through one lock.
#[derive(Debug, Default)]
pub struct ResultsTable {
    slots: Mutex<HashMap<String, u32>>,
}

impl ResultsTable {
    fn allocate(&self, interface: &str) {
        self.slots
            .lock()
            .unwrap()
            .entry(interface.to_string())
            .or_insert(0);
    }

    fn record(&self, interface: &str, count: u32) {
        self.slots
            .lock()
            .unwrap()
            .insert(interface.to_string(), count);
    }

    pub fn get(&self, interface: &str) -> Option<u32> {
        self.slots.lock().unwrap().get(interface).copied()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().unwrap().is_empty()
    }

    /// Snapshot of every slot.
    pub fn counts(&self) -> HashMap<String, u32> {
        self.slots.lock().unwrap().clone()
    }
}

/// Run every task to completion and hand back the populated table.
///
/// An empty batch returns an empty table without blocking. The join is
/// bounded only by the longest per-task timeout; there is no extra
/// session-level deadline and no external cancellation.
pub fn run_session(tasks: Vec<Task>) -> Result<ResultsTable, Error> {
    let table = Arc::new(ResultsTable::default());

    let observer_count = tasks
        .iter()
        .filter(|task| matches!(task, Task::Observe(_)))
        .count();
    for task in &tasks {
        if let Task::Observe(spec) = task {
            table.allocate(&spec.interface);
        }
    }

    let (ready_tx, ready_rx) = mpsc::channel();
    let mut handles: Vec<(usize, String, thread::JoinHandle<Result<(), Error>>)> =
        Vec::with_capacity(tasks.len());

    // Observers first. Each reports on the readiness channel once its
    // capture open attempt has finished, whether or not it succeeded, so the
    // coordinator never waits on a task that already failed.
    for (index, task) in tasks.iter().enumerate() {
        let Task::Observe(spec) = task else { continue };
        let spec = spec.clone();
        let table = Arc::clone(&table);
        let ready_tx = ready_tx.clone();
        let label = format!("observe:{}", spec.interface);

        let handle = thread::spawn(move || {
            let opened = net::interface_address(&spec.interface).and_then(|source| {
                Observer::open_capture(&spec, source).map(|capture| (capture, source))
            });
            let _ = ready_tx.send(());

            let (capture, source) = opened?;
            let outcome = Observer::collect(capture, &spec, source)?;
            table.record(&spec.interface, outcome.matched_count);
            Ok(())
        });
        handles.push((index, label, handle));
    }
    drop(ready_tx);

    for _ in 0..observer_count {
        if ready_rx.recv().is_err() {
            // An observer went away without reporting; the join below will
            // surface what happened to it.
            warn!("An observer exited before signalling readiness");
            break;
        }
    }
    if observer_count > 0 {
        debug!("All {observer_count} observers listening, releasing probers");
    }

    for (index, task) in tasks.iter().enumerate() {
        let Task::Probe(spec) = task else { continue };
        let spec = spec.clone();
        let label = format!("probe:{}", spec.interface);
        let handle = thread::spawn(move || Prober::new().run(&spec));
        handles.push((index, label, handle));
    }

    // Join everything before looking at failures; no task is left detached.
    let mut first_failure: Option<(usize, Error)> = None;
    for (index, label, handle) in handles {
        let result = handle
            .join()
            .unwrap_or_else(|_| Err(Error::TaskPanicked(label.clone())));
        if let Err(e) = result {
            warn!("Task {label} failed: {e}");
            if first_failure.as_ref().map_or(true, |(first, _)| index < *first) {
                first_failure = Some((index, e));
            }
        }
    }

    if let Some((_, error)) = first_failure {
        return Err(error);
    }

    // Every task has joined, so the Arc has a single owner again.
    let table = Arc::try_unwrap(table).expect("all tasks joined");
    Ok(table)
}
