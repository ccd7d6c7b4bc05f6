//! Background work with single-threaded completion delivery.
//!
//! Each submission runs its production closure on its own worker thread
//! with unrestricted parallelism. The completion closure is never invoked
//! inline: it is queued and runs only when the owning thread calls
//! [`WorkQueue::drain`], so all consumer state of type `S` is touched on
//! exactly one thread and callbacks never overlap.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::thread;

type Completion<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Consumer side of the queue. Created at streamer startup and owned by the
/// consuming thread; dropped at shutdown.
pub struct WorkQueue<S> {
    tx: Sender<Completion<S>>,
    rx: Receiver<Completion<S>>,
}

/// Cloneable submitting side, safe to hand to any thread or store inside
/// the consumer state itself.
pub struct WorkHandle<S> {
    tx: Sender<Completion<S>>,
}

impl<S> Clone for WorkHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: 'static> WorkQueue<S> {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn handle(&self) -> WorkHandle<S> {
        WorkHandle {
            tx: self.tx.clone(),
        }
    }

    /// Pop and invoke every queued completion, in enqueue order, on the
    /// calling thread. Returns how many completions ran.
    pub fn drain(&self, state: &mut S) -> usize {
        let mut count = 0;
        while let Ok(complete) = self.rx.try_recv() {
            complete(state);
            count += 1;
        }
        count
    }

    /// Completions queued but not yet drained.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl<S: 'static> Default for WorkQueue<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: 'static> WorkHandle<S> {
    /// Run `produce` on a fresh worker thread and queue `complete` with its
    /// result. Once submitted a request always runs to completion and its
    /// completion is always delivered; there is no cancellation.
    pub fn submit<T, P, C>(&self, produce: P, complete: C)
    where
        T: Send + 'static,
        P: FnOnce() -> T + Send + 'static,
        C: FnOnce(&mut S, T) + Send + 'static,
    {
        let tx = self.tx.clone();
        thread::spawn(move || {
            let value = produce();
            // The consumer side may already be gone during shutdown; the
            // completion is then dropped with the channel.
            let _ = tx.send(Box::new(move |state: &mut S| complete(state, value)));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Collected {
        values: Vec<usize>,
    }

    fn drain_until<S>(queue: &WorkQueue<S>, state: &mut S, expected: usize)
    where
        S: 'static,
    {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut total = 0;
        while total < expected {
            total += queue.drain(state);
            assert!(Instant::now() < deadline, "timed out waiting for completions");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_all_submissions_complete_exactly_once() {
        let queue: WorkQueue<Collected> = WorkQueue::new();
        let handle = queue.handle();
        let mut state = Collected::default();

        const N: usize = 32;
        for i in 0..N {
            handle.submit(move || i, |state, value| state.values.push(value));
        }

        drain_until(&queue, &mut state, N);

        assert_eq!(state.values.len(), N);
        let mut sorted = state.values.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..N).collect::<Vec<_>>(), "each completion once");
    }

    #[test]
    fn test_completions_only_run_inside_drain() {
        let queue: WorkQueue<Collected> = WorkQueue::new();
        let handle = queue.handle();
        let mut state = Collected::default();

        handle.submit(|| 7, |state, value| state.values.push(value));

        // Give the worker time to finish; the result must sit in the queue
        // untouched until drained.
        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.pending() == 0 {
            assert!(Instant::now() < deadline, "worker never finished");
            thread::sleep(Duration::from_millis(1));
        }
        assert!(state.values.is_empty(), "callback ran outside drain");

        assert_eq!(queue.drain(&mut state), 1);
        assert_eq!(state.values, vec![7]);
    }

    #[test]
    fn test_result_ownership_transfers_to_consumer() {
        struct Holder {
            payload: Option<Vec<f32>>,
        }

        let queue: WorkQueue<Holder> = WorkQueue::new();
        let handle = queue.handle();
        let mut state = Holder { payload: None };

        handle.submit(
            || vec![1.0f32; 1024],
            |state, value| state.payload = Some(value),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.drain(&mut state) == 0 {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(state.payload.as_ref().map(|p| p.len()), Some(1024));
    }

    #[test]
    fn test_drain_on_empty_queue_is_a_no_op() {
        let queue: WorkQueue<Collected> = WorkQueue::new();
        let mut state = Collected::default();
        assert_eq!(queue.drain(&mut state), 0);
        assert!(state.values.is_empty());
    }
}
