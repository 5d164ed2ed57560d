//! Relative and absolute sleeps.
//!
//! 1. (`seq`: 0 → 1, 0ms) `sleeper` sleeps for 30 milliseconds.
//! 2. (`seq`: 1 → 2, 0ms) `waker` starts sleeping for one second.
//! 3. (`seq`: 2 → 3, 30ms) `sleeper` wakes up and sleeps until 100ms.
//! 4. (`seq`: 3 → 4, 100ms) `sleeper` wakes up and sleeps until the current
//!    time, which means forever.
//! 5. (`seq`: 4 → 5, 1000ms) `waker` wakes up, sees `sleeper` still
//!    sleeping, and readies it.
//! 6. (`seq`: 5 → 6, 1000ms) `sleeper` preempts `waker` and goes to sleep
//!    forever.
//! 7. (`seq`: 6 → 7, 1000ms) `waker` starts running. It busy-waits on the
//!    realtime counter and saves and restores the interrupt status.
//!
use nil_kernel::{
    time_add_x, KernelTraits, Msg, System, Thread, ThreadConfig, ThreadState, TIME_INFINITE,
};

use super::Driver;
use crate::utils::SeqTracker;

pub struct App<Traits> {
    seq: SeqTracker,
    _phantom: core::marker::PhantomData<Traits>,
}

impl<Traits> App<Traits> {
    pub const fn new() -> Self {
        Self {
            seq: SeqTracker::new(),
            _phantom: core::marker::PhantomData,
        }
    }
}

pub const fn threads<Traits: KernelTraits, D: Driver<App<Traits>>>() -> [ThreadConfig; 2] {
    [
        ThreadConfig::new("sleeper", sleeper_body::<Traits, D>, 0),
        ThreadConfig::new("waker", waker_body::<Traits, D>, 0),
    ]
}

fn sleeper_body<Traits: KernelTraits, D: Driver<App<Traits>>>(_: usize) {
    let seq = &D::app().seq;

    seq.expect_and_replace(0, 1);
    let t0 = System::<Traits>::get_system_time_x();
    System::<Traits>::sleep_milliseconds(30);

    seq.expect_and_replace(2, 3);
    assert_eq!(System::<Traits>::time_elapsed_since_x(t0), 30);
    System::<Traits>::sleep_until(time_add_x(t0, System::<Traits>::ms2i(100)));

    seq.expect_and_replace(3, 4);
    assert_eq!(System::<Traits>::time_elapsed_since_x(t0), 100);
    System::<Traits>::sleep_until(System::<Traits>::get_system_time_x());

    seq.expect_and_replace(5, 6);
    assert_eq!(System::<Traits>::time_elapsed_since_x(t0), 1000);
    System::<Traits>::sleep(TIME_INFINITE);
    unreachable!();
}

fn waker_body<Traits: KernelTraits, D: Driver<App<Traits>>>(_: usize) {
    let seq = &D::app().seq;
    let sleeper = Thread::<Traits>::from_index(0).unwrap();

    seq.expect_and_replace(1, 2);
    System::<Traits>::sleep_seconds(1);

    seq.expect_and_replace(4, 5);
    {
        let mut lock = System::<Traits>::lock();
        assert_eq!(sleeper.state_i(lock.borrow_mut()), ThreadState::Sleeping);
        System::<Traits>::ready_i(lock.borrow_mut(), sleeper, Msg::OK);
        System::<Traits>::reschedule_s(&mut lock);
        // preempted by `sleeper`
    }

    seq.expect_and_replace(6, 7);

    // The realtime counter runs on the host clock, not the virtual time
    let start = System::<Traits>::get_realtime_counter_x();
    System::<Traits>::polled_delay_x(1000);
    let now = System::<Traits>::get_realtime_counter_x();
    assert!(!System::<Traits>::is_counter_within_x(
        now,
        start,
        start.wrapping_add(1000)
    ));

    let sts = System::<Traits>::get_status_and_lock_x();
    assert!(sts.irq_enabled());
    assert!(!Traits::is_irq_enabled());
    // Safety: `sts` was just returned by `get_status_and_lock_x`
    unsafe { System::<Traits>::restore_status_x(sts) };
    assert!(Traits::is_irq_enabled());

    D::success();
}
