//! Fixed-size dispatch pool for `pool:<N>` concurrency.
//!
//! N threads share one bounded queue of capacity N. Submitting blocks while
//! the queue is full, which is what throttles the reading side.

use std::fmt;
use std::io;
use std::num::NonZeroUsize;
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use runlet_runtime::InvocationRequest;

use super::tracking::Ticket;
use super::{LOOP_TARGET, ResponseSink};
use crate::engine::Engine;

/// One accepted invocation waiting for a dispatch thread.
#[derive(Debug)]
pub(crate) struct Job {
    request: InvocationRequest,
    sink: ResponseSink,
    tickets: Vec<Ticket>,
}

impl Job {
    pub(crate) const fn new(request: InvocationRequest, sink: ResponseSink, tickets: Vec<Ticket>) -> Self {
        Self {
            request,
            sink,
            tickets,
        }
    }

    /// Executes the request and writes its envelope; tickets drop after.
    pub(crate) fn run(self, engine: &Engine) {
        let Self {
            request,
            sink,
            tickets,
        } = self;
        let id = request.id.clone();
        let envelope = engine.execute(request);
        if let Err(error) = sink.send(&envelope) {
            warn!(
                target: LOOP_TARGET,
                id = %id,
                error = %error,
                "failed to write response"
            );
        }
        drop(tickets);
    }
}

/// Dispatch threads draining a bounded job queue.
pub struct DispatchPool {
    sender: Mutex<Option<SyncSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: NonZeroUsize,
}

impl fmt::Debug for DispatchPool {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DispatchPool")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl DispatchPool {
    /// Starts `size` dispatch threads over `engine`.
    ///
    /// # Errors
    ///
    /// Returns the OS error when a thread cannot be spawned; threads already
    /// started exit once the pool is dropped.
    pub fn start(size: NonZeroUsize, engine: &Arc<Engine>) -> io::Result<Self> {
        let (sender, receiver) = mpsc::sync_channel::<Job>(size.get());
        let receiver = Arc::new(Mutex::new(receiver));
        let workers = (0..size.get())
            .map(|index| {
                let queue = Arc::clone(&receiver);
                let shared = Arc::clone(engine);
                thread::Builder::new()
                    .name(format!("runlet-dispatch-{index}"))
                    .spawn(move || dispatch(&queue, &shared))
            })
            .collect::<io::Result<Vec<_>>>()?;
        debug!(target: LOOP_TARGET, size = size.get(), "dispatch pool started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Queues `job`, blocking while the queue is full.
    ///
    /// Hands the job back when the pool has shut down.
    pub(crate) fn submit(&self, job: Job) -> Result<(), Job> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sender {
            Some(queue) => queue.send(job).map_err(|mpsc::SendError(job)| job),
            None => Err(job),
        }
    }

    /// Closes the queue and waits for the threads to finish what it holds.
    pub fn shutdown(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for worker in workers {
            if worker.join().is_err() {
                warn!(target: LOOP_TARGET, "dispatch thread panicked");
            }
        }
    }
}

fn dispatch(queue: &Mutex<Receiver<Job>>, engine: &Engine) {
    loop {
        let next = queue.lock().unwrap_or_else(PoisonError::into_inner).recv();
        match next {
            Ok(job) => job.run(engine),
            Err(mpsc::RecvError) => return,
        }
    }
}
