//! A thread waits for a semaphore with a timeout.
//!
//! 1. (`seq`: 0 → 1, 0ms) `waiter` starts waiting for the semaphore, which
//!    will time out after 1000 milliseconds.
//! 2. (`seq`: 1 → 2, 0ms) `signaler` starts sleeping, which will last for
//!    1500 milliseconds.
//! 3. (`seq`: 2 → 3, 1000ms) `waiter` wakes up, seeing that the wait timed
//!    out and the counter is back to zero. `waiter` again starts waiting for
//!    the semaphore.
//! 4. (`seq`: 3 → 4, 1500ms) `signaler` wakes up and signals the semaphore.
//! 5. (`seq`: 4 → 5, 1500ms) `waiter` wakes up and preempts `signaler`,
//!    seeing that the wait succeeded. A signal followed by an immediate wait
//!    leaves the counter unchanged.
//! 6. (`seq`: 5 → 6, 1500ms) `waiter` goes to sleep forever.
//! 7. (`seq`: 6 → 7, 1500ms) `signaler` starts running.
//!
use nil_kernel::{
    Cnt, KernelTraits, Msg, Semaphore, System, ThreadConfig, TIME_IMMEDIATE, TIME_INFINITE,
};

use super::Driver;
use crate::utils::SeqTracker;

pub struct App<Traits> {
    sem: Semaphore<Traits>,
    seq: SeqTracker,
}

impl<Traits> App<Traits> {
    pub const fn new() -> Self {
        Self {
            sem: Semaphore::new(0),
            seq: SeqTracker::new(),
        }
    }
}

pub const fn threads<Traits: KernelTraits, D: Driver<App<Traits>>>() -> [ThreadConfig; 2] {
    [
        ThreadConfig::new("waiter", waiter_body::<Traits, D>, 0),
        ThreadConfig::new("signaler", signaler_body::<Traits, D>, 0),
    ]
}

fn counter<Traits: KernelTraits>(sem: &Semaphore<Traits>) -> Cnt {
    let mut lock = System::<Traits>::lock();
    sem.get_counter_i(lock.borrow_mut())
}

fn waiter_body<Traits: KernelTraits, D: Driver<App<Traits>>>(_: usize) {
    let App { sem, seq } = D::app();

    seq.expect_and_replace(0, 1);

    let t0 = System::<Traits>::get_system_time_x();
    assert_eq!(sem.wait_timeout(System::<Traits>::ms2i(1000)), Msg::TIMEOUT);
    let elapsed = System::<Traits>::time_elapsed_since_x(t0);
    assert!((1000..1001).contains(&elapsed), "elapsed = {elapsed}");

    // The speculative decrement was undone
    assert_eq!(counter::<Traits>(sem), 0);

    seq.expect_and_replace(2, 3);

    assert_eq!(sem.wait_timeout(System::<Traits>::ms2i(1000)), Msg::OK);
    assert_eq!(System::<Traits>::time_elapsed_since_x(t0), 1500);

    seq.expect_and_replace(4, 5);

    sem.signal();
    assert_eq!(sem.wait_timeout(TIME_IMMEDIATE), Msg::OK);
    assert_eq!(counter::<Traits>(sem), 0);
    assert_eq!(sem.wait_timeout(TIME_IMMEDIATE), Msg::TIMEOUT);
    assert_eq!(counter::<Traits>(sem), 0);

    seq.expect_and_replace(5, 6);
    System::<Traits>::sleep(TIME_INFINITE);
    unreachable!();
}

fn signaler_body<Traits: KernelTraits, D: Driver<App<Traits>>>(_: usize) {
    let App { sem, seq } = D::app();

    seq.expect_and_replace(1, 2);
    System::<Traits>::sleep_milliseconds(1500);
    // `signaler` goes into sleep. `waiter` wakes up first.
    // `signaler` follows:
    seq.expect_and_replace(3, 4);
    sem.signal();
    // preempted by `waiter`, which we just woke up

    // back from `waiter`
    seq.expect_and_replace(6, 7);
    D::success();
}
