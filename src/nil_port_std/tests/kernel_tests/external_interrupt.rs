//! An interrupt pended by a host thread outside of the simulator wakes up a
//! thread waiting for it.
//!
//! 1. (`seq`: 0 → 1) `consumer` starts a host thread and starts waiting for
//!    the semaphore. The system goes idle.
//! 2. (`seq`: 1 → 2) The host thread pends an interrupt. The interrupt
//!    handler signals the semaphore.
//! 3. (`seq`: 2 → 3) `consumer` wakes up.
//!
use nil_kernel::{KernelTraits, Msg, Semaphore, System, ThreadConfig};
use nil_port_std::PortInstance;
use std::{thread, time::Duration};

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

pub const fn threads<Traits: PortInstance, D: Driver<App<Traits>>>() -> [ThreadConfig; 1] {
    [ThreadConfig::new("consumer", consumer_body::<Traits, D>, 0)]
}

fn consumer_body<Traits: PortInstance, D: Driver<App<Traits>>>(_: usize) {
    let App { sem, seq } = D::app();

    seq.expect_and_replace(0, 1);

    thread::spawn(|| {
        thread::sleep(Duration::from_millis(50));
        log::debug!("pending the interrupt from outside");
        nil_port_std::pend_interrupt::<Traits>(isr_body::<Traits, D>);
    });

    assert_eq!(sem.wait(), Msg::OK);

    seq.expect_and_replace(2, 3);
    D::success();
}

fn isr_body<Traits: KernelTraits, D: Driver<App<Traits>>>() {
    let App { sem, seq } = D::app();

    seq.expect_and_replace(1, 2);

    let mut lock = System::<Traits>::lock_from_isr();
    sem.signal_i(lock.borrow_mut());
}
