//! Queuing of tasks that need exclusive use of a shared link-layer resource
//!
//! Every GATT operation class (reads, writes, writes-without-response,
//! notifications, indications) may only have a bounded number of primitives
//! outstanding toward the link layer: one for request/response procedures,
//! the hardware TX queue depth for fire-and-forget pushes. [`TaskQueue`]
//! serializes callers onto those slots with strict FIFO ordering.
//!
//! The owning manager supplies two hooks per call:
//!
//! * `begin` issues the task's first primitive. `Ok(Begun::InFlight)` keeps
//!   the slot until the completion event arrives; `Ok(Begun::Complete)`
//!   means the hook already delivered the task's completion;
//!   `Err(reason)` fails the task and the queue advances to the next one —
//!   a failing task never stalls the queue.
//! * `fail` delivers a completion with a non-success reason.
//!
//! Hooks run outside the queue mutex so they may issue driver calls and
//! invoke user callbacks freely. An epoch counter catches the race where
//! [`clear_all`](TaskQueue::clear_all) runs while a task is being started on
//! another thread; the late starter is failed with the clearing reason
//! instead of lingering in flight.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::types::CompletionReason;

/// Outcome of a begin hook that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Begun {
    /// Primitive issued; the task occupies a slot until its completion
    /// event arrives
    InFlight,
    /// The hook completed the task synchronously
    Complete,
}

struct QueueInner<T> {
    pending: VecDeque<T>,
    in_flight: VecDeque<T>,
    /// Tasks that hold a reserved slot while their begin hook runs
    starting: usize,
    epoch: u64,
    last_clear_reason: CompletionReason,
}

pub struct TaskQueue<T> {
    capacity: usize,
    inner: Mutex<QueueInner<T>>,
}

impl<T> TaskQueue<T> {
    /// `capacity` is the number of tasks allowed in flight at once; request/
    /// response procedures use 1, credit-based procedures use the hardware
    /// queue depth.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "task queue needs at least one slot");
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                pending: VecDeque::new(),
                in_flight: VecDeque::new(),
                starting: 0,
                epoch: 0,
                last_clear_reason: CompletionReason::QueueCleared,
            }),
        }
    }

    /// Starts the task immediately when a slot is free, otherwise appends it
    /// to the FIFO. Tasks never overtake ones already waiting.
    pub fn enqueue<B, F>(&self, task: T, mut begin: B, mut fail: F)
    where
        B: FnMut(&mut T) -> Result<Begun, CompletionReason>,
        F: FnMut(T, CompletionReason),
    {
        let epoch = {
            let mut inner = self.inner.lock().unwrap();
            if inner.in_flight.len() + inner.starting >= self.capacity
                || !inner.pending.is_empty()
            {
                inner.pending.push_back(task);
                return;
            }
            inner.starting += 1;
            inner.epoch
        };
        self.begin_task(task, epoch, &mut begin, &mut fail);
        self.drain(&mut begin, &mut fail);
    }

    /// Pops the oldest in-flight task (its completion event has arrived),
    /// hands it to `complete` for callback delivery, then starts queued
    /// tasks into the freed slot. Returns whether a task was completed.
    pub fn complete_next<C, B, F>(&self, complete: C, mut begin: B, mut fail: F) -> bool
    where
        C: FnOnce(T),
        B: FnMut(&mut T) -> Result<Begun, CompletionReason>,
        F: FnMut(T, CompletionReason),
    {
        let task = self.inner.lock().unwrap().in_flight.pop_front();
        let completed = match task {
            Some(task) => {
                complete(task);
                true
            }
            None => false,
        };
        self.drain(&mut begin, &mut fail);
        completed
    }

    /// Fails every task exactly once with `reason` — in-flight tasks first,
    /// then pending ones, FIFO order — and frees all slots. A no-op when
    /// the queue is empty.
    pub fn clear_all<F>(&self, reason: CompletionReason, mut fail: F)
    where
        F: FnMut(T, CompletionReason),
    {
        let cleared = {
            let mut inner = self.inner.lock().unwrap();
            inner.epoch += 1;
            inner.last_clear_reason = reason;
            let mut cleared: Vec<T> = inner.in_flight.drain(..).collect();
            cleared.extend(inner.pending.drain(..));
            cleared
        };
        for task in cleared {
            fail(task, reason);
        }
    }

    /// True when nothing is queued, starting or in flight
    pub fn idle(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.pending.is_empty() && inner.in_flight.is_empty() && inner.starting == 0
    }

    pub fn in_flight_count(&self) -> usize {
        self.inner.lock().unwrap().in_flight.len()
    }

    fn begin_task<B, F>(&self, mut task: T, epoch: u64, begin: &mut B, fail: &mut F)
    where
        B: FnMut(&mut T) -> Result<Begun, CompletionReason>,
        F: FnMut(T, CompletionReason),
    {
        match begin(&mut task) {
            Ok(Begun::InFlight) => {
                let stale = {
                    let mut inner = self.inner.lock().unwrap();
                    inner.starting -= 1;
                    if inner.epoch == epoch {
                        inner.in_flight.push_back(task);
                        None
                    } else {
                        Some((task, inner.last_clear_reason))
                    }
                };
                if let Some((task, reason)) = stale {
                    fail(task, reason);
                }
            }
            Ok(Begun::Complete) => {
                self.inner.lock().unwrap().starting -= 1;
            }
            Err(reason) => {
                self.inner.lock().unwrap().starting -= 1;
                fail(task, reason);
            }
        }
    }

    /// Moves pending tasks into free slots until either runs out
    fn drain<B, F>(&self, begin: &mut B, fail: &mut F)
    where
        B: FnMut(&mut T) -> Result<Begun, CompletionReason>,
        F: FnMut(T, CompletionReason),
    {
        loop {
            let (task, epoch) = {
                let mut inner = self.inner.lock().unwrap();
                if inner.in_flight.len() + inner.starting >= self.capacity {
                    return;
                }
                match inner.pending.pop_front() {
                    Some(task) => {
                        inner.starting += 1;
                        (task, inner.epoch)
                    }
                    None => return,
                }
            };
            self.begin_task(task, epoch, begin, fail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, PartialEq)]
    struct Task(u32);

    #[test]
    fn serializes_single_slot_in_fifo_order() {
        let queue: TaskQueue<Task> = TaskQueue::new(1);
        let begun = RefCell::new(Vec::new());

        let begin = |t: &mut Task| {
            begun.borrow_mut().push(t.0);
            Ok(Begun::InFlight)
        };
        let fail = |_: Task, _: CompletionReason| panic!("no failures expected");

        queue.enqueue(Task(1), begin, fail);
        queue.enqueue(Task(2), begin, fail);
        queue.enqueue(Task(3), begin, fail);
        assert_eq!(*begun.borrow(), vec![1]);
        assert_eq!(queue.in_flight_count(), 1);

        let completed = RefCell::new(Vec::new());
        let complete = |t: Task| completed.borrow_mut().push(t.0);

        assert!(queue.complete_next(complete, begin, fail));
        assert_eq!(*completed.borrow(), vec![1]);
        assert_eq!(*begun.borrow(), vec![1, 2]);

        assert!(queue.complete_next(complete, begin, fail));
        assert_eq!(*completed.borrow(), vec![1, 2]);
        assert_eq!(*begun.borrow(), vec![1, 2, 3]);

        assert!(queue.complete_next(complete, begin, fail));
        assert!(queue.idle());
        assert!(!queue.complete_next(complete, begin, fail));
    }

    #[test]
    fn failing_begin_advances_to_next_task() {
        let queue: TaskQueue<Task> = TaskQueue::new(1);
        let failed = RefCell::new(Vec::new());

        let begin = |t: &mut Task| {
            if t.0 == 1 {
                Err(CompletionReason::Failed)
            } else {
                Ok(Begun::InFlight)
            }
        };
        let fail = |t: Task, reason: CompletionReason| {
            failed.borrow_mut().push((t.0, reason));
        };

        queue.enqueue(Task(1), begin, fail);
        assert_eq!(*failed.borrow(), vec![(1, CompletionReason::Failed)]);
        assert!(queue.idle());

        queue.enqueue(Task(2), begin, fail);
        queue.enqueue(Task(1), begin, fail);
        queue.enqueue(Task(3), begin, fail);
        // Completing task 2 starts the failing task, which is skipped in
        // favor of task 3.
        assert!(queue.complete_next(|_| {}, begin, fail));
        assert_eq!(queue.in_flight_count(), 1);
        assert_eq!(
            *failed.borrow(),
            vec![(1, CompletionReason::Failed), (1, CompletionReason::Failed)]
        );
    }

    #[test]
    fn synchronous_completion_frees_the_slot() {
        let queue: TaskQueue<Task> = TaskQueue::new(1);
        let begun = RefCell::new(Vec::new());

        let begin = |t: &mut Task| {
            begun.borrow_mut().push(t.0);
            Ok(Begun::Complete)
        };
        let fail = |_: Task, _: CompletionReason| panic!("no failures expected");

        queue.enqueue(Task(1), begin, fail);
        queue.enqueue(Task(2), begin, fail);
        assert_eq!(*begun.borrow(), vec![1, 2]);
        assert!(queue.idle());
    }

    #[test]
    fn clear_all_on_empty_queue_is_a_no_op() {
        let queue: TaskQueue<Task> = TaskQueue::new(1);
        let cleared = RefCell::new(0usize);
        queue.clear_all(CompletionReason::QueueCleared, |_, _| {
            *cleared.borrow_mut() += 1;
        });
        assert_eq!(*cleared.borrow(), 0);
        assert!(queue.idle());
    }

    #[test]
    fn clear_all_fails_in_flight_then_pending_exactly_once() {
        let queue: TaskQueue<Task> = TaskQueue::new(1);
        let begin = |_: &mut Task| Ok(Begun::InFlight);
        let fail = |_: Task, _: CompletionReason| panic!("not yet");

        queue.enqueue(Task(1), begin, fail);
        queue.enqueue(Task(2), begin, fail);
        queue.enqueue(Task(3), begin, fail);

        let cleared = RefCell::new(Vec::new());
        queue.clear_all(CompletionReason::ServerDisconnected, |t, reason| {
            cleared.borrow_mut().push((t.0, reason));
        });
        assert_eq!(
            *cleared.borrow(),
            vec![
                (1, CompletionReason::ServerDisconnected),
                (2, CompletionReason::ServerDisconnected),
                (3, CompletionReason::ServerDisconnected),
            ]
        );
        assert!(queue.idle());

        // Queue is immediately reusable.
        let begun = RefCell::new(Vec::new());
        queue.enqueue(
            Task(4),
            |t: &mut Task| {
                begun.borrow_mut().push(t.0);
                Ok(Begun::InFlight)
            },
            |_, _| panic!("no failures expected"),
        );
        assert_eq!(*begun.borrow(), vec![4]);
    }

    #[test]
    fn multiple_slots_fill_up_to_capacity() {
        let queue: TaskQueue<Task> = TaskQueue::new(2);
        let begun = RefCell::new(Vec::new());
        let begin = |t: &mut Task| {
            begun.borrow_mut().push(t.0);
            Ok(Begun::InFlight)
        };
        let fail = |_: Task, _: CompletionReason| panic!("no failures expected");

        queue.enqueue(Task(1), begin, fail);
        queue.enqueue(Task(2), begin, fail);
        queue.enqueue(Task(3), begin, fail);
        assert_eq!(*begun.borrow(), vec![1, 2]);
        assert_eq!(queue.in_flight_count(), 2);

        let completed = RefCell::new(Vec::new());
        assert!(queue.complete_next(
            |t: Task| completed.borrow_mut().push(t.0),
            begin,
            fail
        ));
        assert_eq!(*completed.borrow(), vec![1]);
        assert_eq!(*begun.borrow(), vec![1, 2, 3]);
        assert_eq!(queue.in_flight_count(), 2);
    }
}
