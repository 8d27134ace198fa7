//! # Generation Worker Pool
//!
//! Runs chunk generation off the World's thread.
//!
//! ```text
//! World ──jobs──▶ [worker 0..N] ──results──▶ World (commit)
//! ```
//!
//! The World submits coordinates; workers run the pure generator and send
//! finished chunks back. Only the World commits chunks, so the pool never
//! touches world state. With zero workers every job runs inline on the
//! submitting thread.

use std::collections::{HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use terracraft_procedural::{Chunk, ChunkCoord, ChunkGenerator, WorldError, WorldResult};
use tracing::{debug, warn};

/// Anything that can produce the base content of a chunk.
pub trait ChunkSource: Send + Sync {
    /// Generates the chunk at `coord`.
    ///
    /// # Errors
    ///
    /// `GenerationFailure` (or any error) if the chunk cannot be produced.
    fn generate(&self, coord: ChunkCoord) -> WorldResult<Chunk>;
}

impl ChunkSource for ChunkGenerator {
    fn generate(&self, coord: ChunkCoord) -> WorldResult<Chunk> {
        Self::generate(self, coord)
    }
}

/// A finished generation job.
#[derive(Debug)]
pub struct GenerationResult {
    /// Chunk the job was for.
    pub coord: ChunkCoord,
    /// Generated chunk or the failure.
    pub result: WorldResult<Chunk>,
}

/// Runs one generation, turning a panic into `GenerationFailure`.
fn run_guarded(source: &dyn ChunkSource, coord: ChunkCoord) -> WorldResult<Chunk> {
    match panic::catch_unwind(AssertUnwindSafe(|| source.generate(coord))) {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_owned())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "generator panicked".to_owned());
            warn!(chunk = %coord, %reason, "Chunk generator panicked");
            Err(WorldError::GenerationFailure { coord, reason: format!("panic: {reason}") })
        }
    }
}

/// Worker pool with per-coordinate deduplication.
pub struct GenerationPool {
    source: Arc<dyn ChunkSource>,
    jobs: Option<Sender<ChunkCoord>>,
    /// Receiving end of `jobs`, kept to drop queued work on shutdown.
    queued: Receiver<ChunkCoord>,
    results: Receiver<GenerationResult>,
    workers: Vec<JoinHandle<()>>,
    /// Coordinates submitted and not yet handed back by `poll`/`wait_for`.
    in_flight: HashSet<ChunkCoord>,
    /// Results received but not yet handed back.
    ready: VecDeque<GenerationResult>,
    generations_run: Arc<AtomicU64>,
}

impl GenerationPool {
    /// Starts `workers` generation threads. Zero runs jobs inline.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if a worker thread cannot be spawned.
    pub fn new(source: Arc<dyn ChunkSource>, workers: usize) -> WorldResult<Self> {
        let (job_tx, job_rx) = unbounded::<ChunkCoord>();
        let (result_tx, result_rx) = unbounded::<GenerationResult>();
        let generations_run = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let source = Arc::clone(&source);
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let counter = Arc::clone(&generations_run);

            let handle = thread::Builder::new()
                .name(format!("chunk-gen-{index}"))
                .spawn(move || {
                    while let Ok(coord) = jobs.recv() {
                        let result = run_guarded(source.as_ref(), coord);
                        counter.fetch_add(1, Ordering::Relaxed);
                        if results.send(GenerationResult { coord, result }).is_err() {
                            break;
                        }
                    }
                })
                .map_err(|e| WorldError::InvalidConfig(format!("cannot spawn generation worker: {e}")))?;
            handles.push(handle);
        }

        if workers > 0 {
            debug!(workers, "Generation pool started");
        }

        Ok(Self {
            source,
            jobs: (workers > 0).then_some(job_tx),
            queued: job_rx,
            results: result_rx,
            workers: handles,
            in_flight: HashSet::new(),
            ready: VecDeque::new(),
            generations_run,
        })
    }

    /// Queues a coordinate. Returns `false` if it is already in flight.
    pub fn submit(&mut self, coord: ChunkCoord) -> bool {
        if !self.in_flight.insert(coord) {
            return false;
        }

        if let Some(jobs) = &self.jobs {
            if jobs.send(coord).is_ok() {
                return true;
            }
            warn!(chunk = %coord, "Generation workers gone, generating inline");
        }

        let result = self.generate_now(coord);
        self.ready.push_back(GenerationResult { coord, result });
        true
    }

    /// Generates on the calling thread, bypassing the queue.
    pub fn generate_now(&self, coord: ChunkCoord) -> WorldResult<Chunk> {
        let result = run_guarded(self.source.as_ref(), coord);
        self.generations_run.fetch_add(1, Ordering::Relaxed);
        result
    }

    fn drain_channel(&mut self) {
        self.ready.extend(self.results.try_iter());
    }

    /// Hands back every finished job without blocking.
    pub fn poll(&mut self) -> Vec<GenerationResult> {
        self.drain_channel();
        let finished: Vec<GenerationResult> = self.ready.drain(..).collect();
        for done in &finished {
            self.in_flight.remove(&done.coord);
        }
        finished
    }

    /// Blocks until the job for `coord` finishes or `timeout` elapses.
    ///
    /// Returns `None` on timeout or if `coord` is not in flight. Other jobs
    /// finishing meanwhile stay queued for `poll`.
    pub fn wait_for(&mut self, coord: ChunkCoord, timeout: Duration) -> Option<WorldResult<Chunk>> {
        if !self.in_flight.contains(&coord) {
            return None;
        }

        let deadline = Instant::now() + timeout;
        loop {
            self.drain_channel();
            if let Some(index) = self.ready.iter().position(|done| done.coord == coord) {
                self.in_flight.remove(&coord);
                return self.ready.remove(index).map(|done| done.result);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.results.recv_timeout(remaining) {
                Ok(done) => self.ready.push_back(done),
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Blocks until nothing is in flight or `timeout` elapses, then hands
    /// back everything finished.
    pub fn wait_all(&mut self, timeout: Duration) -> Vec<GenerationResult> {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain_channel();
            if self.ready.len() >= self.in_flight.len() {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.results.recv_timeout(remaining) {
                Ok(done) => self.ready.push_back(done),
                Err(_) => break,
            }
        }
        self.poll()
    }

    /// True if `coord` was submitted and not yet handed back.
    #[must_use]
    pub fn is_in_flight(&self, coord: ChunkCoord) -> bool {
        self.in_flight.contains(&coord)
    }

    /// Number of jobs not yet handed back.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Total generator invocations, including failed ones.
    #[must_use]
    pub fn generations_run(&self) -> u64 {
        self.generations_run.load(Ordering::Relaxed)
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stops the workers after their current job and joins them.
    ///
    /// Queued jobs are abandoned. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(jobs) = self.jobs.take() else {
            return;
        };
        // Workers exit after their current job
        let abandoned = self.queued.try_iter().count();
        drop(jobs);

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Generation worker exited abnormally");
            }
        }
        self.in_flight.clear();
        self.ready.clear();
        debug!(abandoned, "Generation pool stopped");
    }
}

impl Drop for GenerationPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Flaky {
        calls: AtomicUsize,
    }

    impl ChunkSource for Flaky {
        fn generate(&self, coord: ChunkCoord) -> WorldResult<Chunk> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match coord.x {
                0 => Chunk::new(coord, 16),
                1 => Err(WorldError::GenerationFailure { coord, reason: "flaky".into() }),
                _ => panic!("boom at {coord}"),
            }
        }
    }

    fn flaky() -> Arc<Flaky> {
        Arc::new(Flaky { calls: AtomicUsize::new(0) })
    }

    #[test]
    fn test_inline_dedup() {
        let source = flaky();
        let mut pool = GenerationPool::new(source.clone(), 0).unwrap();
        let coord = ChunkCoord::new(0, 0);

        assert!(pool.submit(coord));
        assert!(!pool.submit(coord));
        assert!(pool.is_in_flight(coord));

        let done = pool.poll();
        assert_eq!(done.len(), 1);
        assert!(done[0].result.is_ok());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(!pool.is_in_flight(coord));
    }

    #[test]
    fn test_panic_becomes_failure() {
        let mut pool = GenerationPool::new(flaky(), 0).unwrap();
        let coord = ChunkCoord::new(2, 0);
        pool.submit(coord);
        let done = pool.poll();
        assert!(matches!(&done[0].result, Err(WorldError::GenerationFailure { reason, .. }) if reason.contains("boom")));
    }

    #[test]
    fn test_workers_dedup_and_wait() {
        let source = flaky();
        let mut pool = GenerationPool::new(source.clone(), 2).unwrap();
        assert_eq!(pool.worker_count(), 2);

        let coord = ChunkCoord::new(0, 5);
        assert!(pool.submit(coord));
        assert!(!pool.submit(coord));
        pool.submit(ChunkCoord::new(1, 5));

        let chunk = pool.wait_for(coord, Duration::from_secs(10)).unwrap().unwrap();
        assert_eq!(chunk.coord(), coord);

        let rest = pool.wait_all(Duration::from_secs(10));
        assert_eq!(rest.len(), 1);
        assert!(rest[0].result.is_err());
        assert_eq!(pool.in_flight_count(), 0);
        assert_eq!(pool.generations_run(), 2);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        pool.shutdown();
        pool.shutdown();
    }

    #[test]
    fn test_wait_for_unknown_coord() {
        let mut pool = GenerationPool::new(flaky(), 1).unwrap();
        assert!(pool.wait_for(ChunkCoord::new(9, 9), Duration::from_millis(10)).is_none());
    }
}
