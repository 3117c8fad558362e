use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tracing::debug;

use crate::error::Error;

/// A deferred job. Always runs on the worker thread, never in the context
/// that scheduled it.
pub type Job = Box<dyn FnOnce() + Send>;

/// The one capability the coordinator needs from its execution substrate:
/// run a job once, after a delay, outside the caller's context. Scheduling
/// must not block.
pub trait TickScheduler: Send + Sync {
    fn schedule(&self, delay: Duration, job: Job);
}

struct Scheduled {
    due: Instant,
    job: Job,
}

/// Thread-backed scheduler. One named thread drains a channel of timed jobs
/// and runs each when its due time arrives; jobs are serialized by
/// construction, so no two ever run concurrently. Dropping the worker closes
/// the channel and joins the thread, discarding jobs not yet due.
pub struct Worker {
    tx: Option<Sender<Scheduled>>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn() -> Result<Self, Error> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("powerdown-worker".into())
            .spawn(move || run(rx))?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }
}

impl TickScheduler for Worker {
    fn schedule(&self, delay: Duration, job: Job) {
        let due = Instant::now() + delay;
        if let Some(tx) = &self.tx {
            // Unbounded send never blocks; a closed channel means the worker
            // is shutting down and the job is moot.
            if tx.send(Scheduled { due, job }).is_err() {
                debug!("worker gone, dropping scheduled job");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(rx: Receiver<Scheduled>) {
    let mut pending: Vec<Scheduled> = Vec::new();

    loop {
        // Sleep until the earliest due job, staying receptive to new ones.
        let next_due = pending.iter().map(|s| s.due).min();
        let incoming = match next_due {
            Some(due) => {
                let now = Instant::now();
                if due <= now {
                    Ok(None)
                } else {
                    match rx.recv_timeout(due - now) {
                        Ok(s) => Ok(Some(s)),
                        Err(RecvTimeoutError::Timeout) => Ok(None),
                        Err(RecvTimeoutError::Disconnected) => Err(()),
                    }
                }
            }
            None => match rx.recv() {
                Ok(s) => Ok(Some(s)),
                Err(_) => Err(()),
            },
        };

        match incoming {
            Ok(Some(s)) => pending.push(s),
            Ok(None) => {}
            Err(()) => break,
        }

        let now = Instant::now();
        let mut i = 0;
        while i < pending.len() {
            if pending[i].due <= now {
                let s = pending.swap_remove(i);
                (s.job)();
            } else {
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_jobs_in_due_order() {
        let worker = Worker::spawn().unwrap();
        let (tx, rx) = unbounded();

        let late = tx.clone();
        worker.schedule(
            Duration::from_millis(60),
            Box::new(move || late.send("late").unwrap()),
        );
        let early = tx.clone();
        worker.schedule(
            Duration::from_millis(10),
            Box::new(move || early.send("early").unwrap()),
        );

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "early");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "late");
    }

    #[test]
    fn delayed_job_does_not_fire_early() {
        let worker = Worker::spawn().unwrap();
        let (tx, rx) = unbounded();

        worker.schedule(
            Duration::from_millis(200),
            Box::new(move || tx.send(()).unwrap()),
        );

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    #[test]
    fn drop_joins_the_worker_thread() {
        let worker = Worker::spawn().unwrap();
        let (tx, rx) = unbounded();
        worker.schedule(Duration::ZERO, Box::new(move || tx.send(()).unwrap()));
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        drop(worker);
    }
}
