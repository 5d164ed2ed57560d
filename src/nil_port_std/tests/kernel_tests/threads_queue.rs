//! Threads queues deliver a message to one or all of the waiting threads.
//!
//! 1. (`seq`: 0 → 1) `consumer0` enqueues itself.
//! 2. (`seq`: 1 → 2) `consumer1` enqueues itself.
//! 3. (`seq`: 2 → 3) `producer` dequeues the next thread with `1`.
//! 4. (`seq`: 3 → 4) `consumer0` preempts `producer`, receiving `1`. It
//!    enqueues itself again.
//! 5. (`seq`: 4 → 5) `producer` dequeues all threads with `2`.
//! 6. (`seq`: 5 → 6) `consumer0` preempts `producer`, receiving `2`. It goes
//!    to sleep forever.
//! 7. (`seq`: 6 → 7) `consumer1` starts running, receiving `2`. It goes to
//!    sleep forever.
//! 8. (`seq`: 7 → 8) `producer` sees the queue empty. Dequeueing from the
//!    empty queue does nothing.
//!
use nil_kernel::{
    KernelTraits, Msg, System, ThreadConfig, ThreadsQueue, TIME_IMMEDIATE, TIME_INFINITE,
};

use super::Driver;
use crate::utils::SeqTracker;

pub struct App<Traits> {
    queue: ThreadsQueue<Traits>,
    seq: SeqTracker,
}

impl<Traits> App<Traits> {
    pub const fn new() -> Self {
        Self {
            queue: ThreadsQueue::new(),
            seq: SeqTracker::new(),
        }
    }
}

pub const fn threads<Traits: KernelTraits, D: Driver<App<Traits>>>() -> [ThreadConfig; 3] {
    [
        ThreadConfig::new("consumer0", consumer0_body::<Traits, D>, 0),
        ThreadConfig::new("consumer1", consumer1_body::<Traits, D>, 0),
        ThreadConfig::new("producer", producer_body::<Traits, D>, 0),
    ]
}

fn enqueue<Traits: KernelTraits>(queue: &'static ThreadsQueue<Traits>) -> Msg {
    let mut lock = System::<Traits>::lock();
    queue.enqueue_timeout_s(&mut lock, TIME_INFINITE)
}

fn consumer0_body<Traits: KernelTraits, D: Driver<App<Traits>>>(_: usize) {
    let App { queue, seq } = D::app();

    seq.expect_and_replace(0, 1);
    assert_eq!(enqueue(queue), Msg(1));

    seq.expect_and_replace(3, 4);
    assert_eq!(enqueue(queue), Msg(2));

    seq.expect_and_replace(5, 6);
    System::<Traits>::sleep(TIME_INFINITE);
    unreachable!();
}

fn consumer1_body<Traits: KernelTraits, D: Driver<App<Traits>>>(_: usize) {
    let App { queue, seq } = D::app();

    seq.expect_and_replace(1, 2);
    assert_eq!(enqueue(queue), Msg(2));

    seq.expect_and_replace(6, 7);
    System::<Traits>::sleep(TIME_INFINITE);
    unreachable!();
}

fn producer_body<Traits: KernelTraits, D: Driver<App<Traits>>>(_: usize) {
    let App { queue, seq } = D::app();

    seq.expect_and_replace(2, 3);
    {
        let mut lock = System::<Traits>::lock();
        assert!(!queue.is_empty_i(lock.borrow_mut()));
        queue.dequeue_next_i(lock.borrow_mut(), Msg(1));
        System::<Traits>::reschedule_s(&mut lock);
        // preempted by `consumer0`
    }

    seq.expect_and_replace(4, 5);
    {
        let mut lock = System::<Traits>::lock();
        queue.dequeue_all_i(lock.borrow_mut(), Msg(2));
        assert!(queue.is_empty_i(lock.borrow_mut()));
        System::<Traits>::reschedule_s(&mut lock);
        // preempted by `consumer0` and `consumer1`
    }

    seq.expect_and_replace(7, 8);
    {
        let mut lock = System::<Traits>::lock();
        assert!(queue.is_empty_i(lock.borrow_mut()));
        queue.dequeue_next_i(lock.borrow_mut(), Msg(3));
        assert!(!System::<Traits>::is_resc_required_i(lock.borrow_mut()));

        // The producer can't wait without blocking
        assert_eq!(queue.enqueue_timeout_s(&mut lock, TIME_IMMEDIATE), Msg::TIMEOUT);
        assert!(queue.is_empty_i(lock.borrow_mut()));
    }
    D::success();
}
