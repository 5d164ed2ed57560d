//! Events signaled to a thread that isn't waiting for them are latched.
//!
//! 1. (`seq`: 0 → 1, 0ms) `receiver` starts sleeping for 10 milliseconds.
//! 2. (`seq`: 1 → 2, 0ms) `sender` signals `0x55` to `receiver`, which
//!    doesn't wake up because it's not waiting for events. `sender` starts
//!    waiting for the event 0.
//! 3. (`seq`: 2 → 3, 10ms) `receiver` wakes up. Waiting for any event
//!    returns `0x55` without blocking. Waiting again blocks until the timeout
//!    and returns `0`.
//! 4. (`seq`: 3 → 4, 110ms) `receiver` signals `0x6` to `sender`, which
//!    doesn't wake up because it's waiting for a different event.
//! 5. (`seq`: 4 → 5, 110ms) `receiver` signals `0x1` to `sender`, which
//!    becomes ready but doesn't preempt `receiver`. `receiver` goes to sleep
//!    forever.
//! 6. (`seq`: 5 → 6, 110ms) `sender` wakes up with `0x1`. `0x6` is still
//!    pending.
//!
use nil_kernel::{
    event_mask, KernelTraits, System, Thread, ThreadConfig, ThreadState, ALL_EVENTS,
    TIME_IMMEDIATE, TIME_INFINITE,
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
        ThreadConfig::new("receiver", receiver_body::<Traits, D>, 0),
        ThreadConfig::new("sender", sender_body::<Traits, D>, 1),
    ]
}

fn receiver_body<Traits: KernelTraits, D: Driver<App<Traits>>>(_: usize) {
    let seq = &D::app().seq;
    let sender = Thread::<Traits>::from_index(1).unwrap();

    seq.expect_and_replace(0, 1);
    System::<Traits>::sleep_milliseconds(10);

    seq.expect_and_replace(2, 3);

    let t0 = System::<Traits>::get_system_time_x();
    assert_eq!(System::<Traits>::wait_any_events_timeout(ALL_EVENTS, 100), 0x55);
    assert_eq!(System::<Traits>::time_elapsed_since_x(t0), 0);

    assert_eq!(System::<Traits>::wait_any_events_timeout(ALL_EVENTS, 100), 0);
    assert_eq!(System::<Traits>::time_elapsed_since_x(t0), 100);

    seq.expect_and_replace(3, 4);

    sender.signal_events(0x6);
    {
        let mut lock = System::<Traits>::lock();
        assert_eq!(sender.state_i(lock.borrow_mut()), ThreadState::WaitingEvents);
    }

    seq.expect_and_replace(4, 5);

    sender.signal_events(0x1);
    {
        let mut lock = System::<Traits>::lock();
        assert_eq!(sender.state_i(lock.borrow_mut()), ThreadState::Ready);
    }

    System::<Traits>::sleep(TIME_INFINITE);
    unreachable!();
}

fn sender_body<Traits: KernelTraits, D: Driver<App<Traits>>>(index: usize) {
    let seq = &D::app().seq;
    let receiver = Thread::<Traits>::from_index(0).unwrap();

    assert_eq!(System::<Traits>::get_self_x().index(), index);

    seq.expect_and_replace(1, 2);
    receiver.signal_events(0x55);

    assert_eq!(
        System::<Traits>::wait_any_events_timeout(event_mask(0), TIME_INFINITE),
        0x1
    );

    seq.expect_and_replace(5, 6);
    assert_eq!(
        System::<Traits>::wait_any_events_timeout(ALL_EVENTS, TIME_IMMEDIATE),
        0x6
    );
    assert_eq!(
        System::<Traits>::wait_any_events_timeout(ALL_EVENTS, TIME_IMMEDIATE),
        0
    );
    D::success();
}
