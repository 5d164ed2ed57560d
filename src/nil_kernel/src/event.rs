//! Event flags
//!
//! Every thread has a mask of pending events. Other threads and interrupt
//! handlers set bits with [`Thread::signal_events`]; the thread consumes them
//! with [`System::wait_any_events_timeout`].
use crate::{
    dbg,
    klock::{SysLockGuard, SysLockTokenRefMut},
    thread::ThreadSt,
    time::{SysInterval, TIME_IMMEDIATE},
    KernelTraits, Msg, System, Thread,
};

/// A set of event flags.
pub type EventMask = u32;

/// The mask matching every event.
pub const ALL_EVENTS: EventMask = EventMask::MAX;

/// Get the mask of the event with the given ID (bit number).
#[inline]
pub const fn event_mask(eid: u32) -> EventMask {
    1 << eid
}

impl<Traits: KernelTraits> Thread<Traits> {
    /// Add `mask` to the pending events of the thread, waking it up if it's
    /// waiting for any of them.
    pub fn signal_events(self, mask: EventMask) {
        let mut lock = System::<Traits>::lock();
        self.signal_events_i(lock.borrow_mut(), mask);
        System::<Traits>::reschedule_s(&mut lock);
    }

    /// [`signal_events`](Self::signal_events) without the reschedule.
    pub fn signal_events_i(self, mut lock: SysLockTokenRefMut<'_, Traits>, mask: EventMask) {
        dbg::check_class_i::<Traits>();

        let cb = self.cb();
        let epmask = cb.epmask.get(&*lock) | mask;
        cb.epmask.replace(&mut *lock, epmask);

        if let ThreadSt::WaitingEvents(ewmask) = cb.st.get(&*lock) {
            if epmask & ewmask != 0 {
                System::<Traits>::ready_i(lock, self, Msg::OK);
            }
        }
    }

    /// Get the pending events of the thread.
    #[inline]
    pub fn pending_events_i(self, lock: SysLockTokenRefMut<'_, Traits>) -> EventMask {
        self.cb().epmask.get(&*lock)
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Wait until any of the events in `mask` is pending, for at most
    /// `timeout`.
    ///
    /// Returns the pending events in `mask`, which are cleared. Returns `0`
    /// if `timeout` expired, or if `timeout` is [`TIME_IMMEDIATE`] and none
    /// of the events was pending. Events outside of `mask` stay pending.
    pub fn wait_any_events_timeout(mask: EventMask, timeout: SysInterval) -> EventMask {
        let mut lock = Self::lock();
        Self::wait_any_events_timeout_s(&mut lock, mask, timeout)
    }

    /// [`wait_any_events_timeout`](Self::wait_any_events_timeout) with the
    /// lock already held.
    pub fn wait_any_events_timeout_s(
        lock: &mut SysLockGuard<Traits>,
        mask: EventMask,
        timeout: SysInterval,
    ) -> EventMask {
        let ctp = Self::get_self_x().cb();

        let mut m = ctp.epmask.get(&**lock) & mask;
        if m == 0 {
            if timeout == TIME_IMMEDIATE {
                return 0;
            }

            let msg = Self::go_sleep_timeout_s_with(lock, ThreadSt::WaitingEvents(mask), timeout);
            if msg < Msg::OK {
                return 0;
            }

            m = ctp.epmask.get(&**lock) & mask;
        }

        ctp.epmask.replace_with(&mut **lock, |e| *e & !m);
        m
    }
}
