//! Stage pools.
//!
//! Each stage owns a [`StagePool`]: the job ids waiting for the stage plus
//! the ids its workers have claimed. Ordering is highest priority first,
//! FIFO among equal priorities.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use qpipe_hal::NativeExperiment;
use rustc_hash::FxHashMap;

use crate::job::{JobId, Priority, Stage};

/// Entry in the priority heap.
#[derive(Debug)]
struct QueueEntry {
    job_id: JobId,
    priority: Priority,
    /// Insertion order (for FIFO ordering of same-priority jobs).
    insertion_order: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.job_id == other.job_id && self.insertion_order == other.insertion_order
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first
        match self.priority.cmp(&other.priority) {
            // BinaryHeap is a max-heap, so earlier insertion must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other_cmp => other_cmp,
        }
    }
}

/// A queued job and the data handed to the stage with it.
#[derive(Debug)]
struct Queued<T> {
    insertion_order: u64,
    payload: T,
}

/// Jobs waiting for one stage plus the jobs that stage is working on.
#[derive(Debug)]
pub struct StagePool<T> {
    heap: BinaryHeap<QueueEntry>,
    queued: FxHashMap<JobId, Queued<T>>,
    claimed: FxHashMap<JobId, Priority>,
    capacity: usize,
    insertion_counter: u64,
}

impl<T> StagePool<T> {
    /// Create a pool allowing `capacity` concurrently claimed jobs.
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            queued: FxHashMap::default(),
            claimed: FxHashMap::default(),
            capacity: capacity.max(1),
            insertion_counter: 0,
        }
    }

    /// Enqueue a job. A job already queued here is replaced and goes to
    /// the back of its priority class.
    pub fn push(&mut self, job_id: JobId, priority: Priority, payload: T) {
        let insertion_order = self.insertion_counter;
        self.insertion_counter += 1;
        self.claimed.remove(&job_id);
        self.queued.insert(
            job_id,
            Queued {
                insertion_order,
                payload,
            },
        );
        self.heap.push(QueueEntry {
            job_id,
            priority,
            insertion_order,
        });
    }

    /// Claim the next job, unless the stage is at capacity.
    pub fn claim(&mut self) -> Option<(JobId, T)> {
        if self.claimed.len() >= self.capacity {
            return None;
        }
        // Entries whose job was removed or re-pushed are stale
        while let Some(entry) = self.heap.pop() {
            let live = self
                .queued
                .get(&entry.job_id)
                .is_some_and(|q| q.insertion_order == entry.insertion_order);
            if !live {
                continue;
            }
            if let Some(queued) = self.queued.remove(&entry.job_id) {
                self.claimed.insert(entry.job_id, entry.priority);
                return Some((entry.job_id, queued.payload));
            }
        }
        None
    }

    /// Drop a claim. Returns whether the job was claimed.
    pub fn release(&mut self, job_id: &JobId) -> bool {
        self.claimed.remove(job_id).is_some()
    }

    /// Turn a claim back into a queued entry with its original priority.
    pub fn requeue(&mut self, job_id: JobId, payload: T) -> bool {
        match self.claimed.remove(&job_id) {
            Some(priority) => {
                self.push(job_id, priority, payload);
                true
            }
            None => false,
        }
    }

    /// Remove a queued (not claimed) job, returning its payload.
    pub fn remove(&mut self, job_id: &JobId) -> Option<T> {
        self.queued.remove(job_id).map(|q| q.payload)
    }

    /// Whether the job is queued or claimed here.
    pub fn contains(&self, job_id: &JobId) -> bool {
        self.queued.contains_key(job_id) || self.claimed.contains_key(job_id)
    }

    /// Whether a worker of this stage holds the job.
    pub fn is_claimed(&self, job_id: &JobId) -> bool {
        self.claimed.contains_key(job_id)
    }

    /// Number of jobs waiting.
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Number of jobs claimed.
    pub fn claimed_len(&self) -> usize {
        self.claimed.len()
    }

    /// Whether nothing is queued or claimed.
    pub fn is_empty(&self) -> bool {
        self.queued.is_empty() && self.claimed.is_empty()
    }

    /// Maximum number of concurrent claims.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// The three stage pools.
#[derive(Debug)]
pub struct PoolSet {
    pub intake: StagePool<()>,
    pub preprocessing: StagePool<()>,
    /// Execution carries the translated experiment by value.
    pub execution: StagePool<NativeExperiment>,
}

impl PoolSet {
    pub fn new(intake_workers: usize, preprocessing_workers: usize) -> Self {
        Self {
            intake: StagePool::new(intake_workers),
            preprocessing: StagePool::new(preprocessing_workers),
            // One worker per executor instance
            execution: StagePool::new(1),
        }
    }

    /// Stage whose pool currently holds the job.
    pub fn locate(&self, job_id: &JobId) -> Option<Stage> {
        if self.intake.contains(job_id) {
            Some(Stage::Intake)
        } else if self.preprocessing.contains(job_id) {
            Some(Stage::Preprocessing)
        } else if self.execution.contains(job_id) {
            Some(Stage::Execution)
        } else {
            None
        }
    }

    /// Number of pools holding the job. Never more than one.
    pub fn membership_count(&self, job_id: &JobId) -> usize {
        [
            self.intake.contains(job_id),
            self.preprocessing.contains(job_id),
            self.execution.contains(job_id),
        ]
        .into_iter()
        .filter(|held| *held)
        .count()
    }

    /// Release a claim in the given stage.
    pub fn release(&mut self, stage: Stage, job_id: &JobId) -> bool {
        match stage {
            Stage::Intake => self.intake.release(job_id),
            Stage::Preprocessing => self.preprocessing.release(job_id),
            Stage::Execution => self.execution.release(job_id),
        }
    }

    /// Total jobs queued or claimed across all stages.
    pub fn total(&self) -> usize {
        self.intake.queued_len()
            + self.intake.claimed_len()
            + self.preprocessing.queued_len()
            + self.preprocessing.claimed_len()
            + self.execution.queued_len()
            + self.execution.claimed_len()
    }
}
