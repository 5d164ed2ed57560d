//! Thread references (suspend and resume)
use core::fmt;

use crate::{
    klock::{SysLockCell, SysLockGuard, SysLockTokenRefMut},
    thread::ThreadSt,
    time::{SysInterval, TIME_IMMEDIATE},
    utils::Init,
    KernelTraits, Msg, System, Thread,
};

/// A slot that holds at most one suspended thread.
///
/// A thread parks itself in the reference with
/// [`suspend_timeout_s`](Self::suspend_timeout_s), and another thread or an
/// interrupt handler wakes it with [`resume_i`](Self::resume_i), passing an
/// arbitrary [`Msg`]. This is the usual way of handing the result of an
/// operation from an interrupt handler to the waiting thread.
///
/// ```ignore
/// static REPLY: ThreadReference<SystemTraits> = ThreadReference::new();
///
/// // Thread
/// let mut lock = System::lock();
/// let msg = REPLY.suspend_timeout_s(&mut lock, TIME_INFINITE);
///
/// // Interrupt handler
/// let mut lock = System::lock_from_isr();
/// REPLY.resume_i(lock.borrow_mut(), Msg(data));
/// ```
pub struct ThreadReference<Traits> {
    slot: SysLockCell<Traits, Option<Thread<Traits>>>,
}

impl<Traits> ThreadReference<Traits> {
    /// Construct an empty `ThreadReference`.
    pub const fn new() -> Self {
        Self {
            slot: SysLockCell::new(None),
        }
    }
}

impl<Traits> Init for ThreadReference<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

impl<Traits> Default for ThreadReference<Traits> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Traits: KernelTraits> fmt::Debug for ThreadReference<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadReference")
            .field("self", &(self as *const _))
            .field("slot", &self.slot)
            .finish()
    }
}

impl<Traits: KernelTraits> ThreadReference<Traits> {
    /// Get the thread suspended on `self`, if any.
    #[inline]
    pub fn get_i(&self, lock: SysLockTokenRefMut<'_, Traits>) -> Option<Thread<Traits>> {
        self.slot.get(&*lock)
    }

    /// Store the calling thread into `self` and suspend it until it's
    /// resumed or `timeout` expires.
    ///
    /// Returns the message passed to [`resume_i`](Self::resume_i), or
    /// [`Msg::TIMEOUT`]. With [`TIME_IMMEDIATE`], returns [`Msg::TIMEOUT`]
    /// immediately. `self` must be empty.
    pub fn suspend_timeout_s(
        &'static self,
        lock: &mut SysLockGuard<Traits>,
        timeout: SysInterval,
    ) -> Msg {
        dbg_assert!(Traits, self.slot.read(&**lock).is_none(), "not NULL");

        if timeout == TIME_IMMEDIATE {
            return Msg::TIMEOUT;
        }

        self.slot
            .replace(&mut **lock, Some(System::<Traits>::get_self_x()));
        System::<Traits>::go_sleep_timeout_s_with(lock, ThreadSt::Suspended(self), timeout)
    }

    /// Wake up the thread suspended on `self`, if any, delivering `msg`.
    /// `self` becomes empty.
    pub fn resume_i(&self, mut lock: SysLockTokenRefMut<'_, Traits>, msg: Msg) {
        if let Some(thread) = self.slot.replace(&mut *lock, None) {
            dbg_assert!(
                Traits,
                matches!(thread.cb().st.read(&*lock), ThreadSt::Suspended(_)),
                "not suspended"
            );
            System::<Traits>::ready_i(lock, thread, msg);
        }
    }

    /// [`resume_i`](Self::resume_i) followed by a reschedule.
    pub fn resume(&self, msg: Msg) {
        let mut lock = System::<Traits>::lock();
        self.resume_i(lock.borrow_mut(), msg);
        System::<Traits>::reschedule_s(&mut lock);
    }

    /// Empty `self` without waking the thread. Used by the timeout handler.
    #[inline]
    pub(crate) fn clear_i(&self, mut lock: SysLockTokenRefMut<'_, Traits>) {
        self.slot.replace(&mut *lock, None);
    }
}
