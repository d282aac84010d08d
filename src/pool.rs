// src/pool.rs
//! Worker pool for flow operations
//!
//! N OS threads, each with its own operation channel, one shared result channel.
//! Every worker runs until it receives `OpKind::Terminate`, then reports its failure
//! count once. `join` delivers the sentinel to every worker and sums the counts.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error};

use crate::error::{NstatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Add,
    Delete,
    Terminate,
}

/// One unit of work for a flow worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub kind: OpKind,
    pub node: String,
    pub flow_id: u64,
    pub dest_ip: Ipv4Addr,
}

impl Operation {
    pub fn new(kind: OpKind, node: &str, flow_index: u64) -> Self {
        Self {
            kind,
            node: node.to_string(),
            flow_id: flow_index,
            dest_ip: dest_ip_for(flow_index),
        }
    }

    /// Zero-valued shutdown sentinel.
    pub fn terminate() -> Self {
        Self {
            kind: OpKind::Terminate,
            node: String::new(),
            flow_id: 0,
            dest_ip: Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Destination address of flow `index`, counting up from 0.0.0.0.
pub fn dest_ip_for(index: u64) -> Ipv4Addr {
    Ipv4Addr::from((index & u64::from(u32::MAX)) as u32)
}

/// How flows are spread over workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Assignment {
    /// `flow_index mod n_workers`
    #[default]
    FlowIndex,
    /// `(dest_node - 1) mod n_workers` with 1-based nodes; idle workers when nodes < workers
    NodeAffinity,
}

impl Assignment {
    pub fn worker_for(&self, flow_index: u64, node_index: usize, n_workers: usize) -> usize {
        match self {
            Assignment::FlowIndex => (flow_index % n_workers as u64) as usize,
            Assignment::NodeAffinity => node_index % n_workers,
        }
    }
}

pub struct WorkerPool {
    senders: Vec<Sender<Operation>>,
    results: Receiver<u64>,
    handles: Vec<JoinHandle<()>>,
    assignment: Assignment,
    undelivered: u64,
}

impl WorkerPool {
    /// Start `n_workers` threads running `worker_fn(worker_id, operations)`.
    ///
    /// `worker_fn` must return only after reading `Terminate`; its return value is
    /// the worker's failure count.
    pub fn new<F>(n_workers: usize, worker_fn: F) -> Result<Self>
    where
        F: Fn(usize, Receiver<Operation>) -> u64 + Send + Sync + 'static,
    {
        if n_workers == 0 {
            return Err(NstatError::Config("flow_workers must be >= 1".into()));
        }
        let worker_fn = Arc::new(worker_fn);
        let (result_tx, results) = bounded(n_workers);
        let mut senders = Vec::with_capacity(n_workers);
        let mut handles = Vec::with_capacity(n_workers);

        for id in 0..n_workers {
            let (tx, rx) = unbounded();
            let f = worker_fn.clone();
            let result_tx = result_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("flow-worker-{}", id))
                .spawn(move || {
                    let failures = f(id, rx);
                    debug!("worker {} done, {} failures", id, failures);
                    if result_tx.send(failures).is_err() {
                        error!("worker {} could not report its failure count", id);
                    }
                })
                .map_err(|e| NstatError::io("spawning flow worker", e))?;
            senders.push(tx);
            handles.push(handle);
        }

        Ok(Self {
            senders,
            results,
            handles,
            assignment: Assignment::default(),
            undelivered: 0,
        })
    }

    pub fn with_assignment(mut self, assignment: Assignment) -> Self {
        self.assignment = assignment;
        self
    }

    pub fn n_workers(&self) -> usize {
        self.senders.len()
    }

    /// Enqueue one `kind` operation per flow index, node `flow_index mod n_nodes`.
    ///
    /// Returns the number of operations handed to each worker.
    pub fn distribute<I>(&mut self, flows: I, kind: OpKind, node_names: &[String]) -> Result<Vec<usize>>
    where
        I: IntoIterator<Item = u64>,
    {
        if node_names.is_empty() {
            return Err(NstatError::Config("no target nodes to distribute flows to".into()));
        }
        let n_workers = self.senders.len();
        let mut per_worker = vec![0usize; n_workers];
        for flow_index in flows {
            let node_index = (flow_index % node_names.len() as u64) as usize;
            let worker = self.assignment.worker_for(flow_index, node_index, n_workers);
            let op = Operation::new(kind, &node_names[node_index], flow_index);
            if self.senders[worker].send(op).is_err() {
                // worker died; its operation counts as failed
                self.undelivered += 1;
                continue;
            }
            per_worker[worker] += 1;
        }
        Ok(per_worker)
    }

    /// Terminate every worker, wait for them and return the summed failure count.
    pub fn join(self) -> u64 {
        let WorkerPool {
            senders,
            results,
            handles,
            undelivered,
            ..
        } = self;
        for tx in &senders {
            if tx.send(Operation::terminate()).is_err() {
                debug!("worker already gone before terminate");
            }
        }
        drop(senders);
        for handle in handles {
            if handle.join().is_err() {
                error!("flow worker panicked");
            }
        }
        undelivered + results.try_iter().sum::<u64>()
    }
}
