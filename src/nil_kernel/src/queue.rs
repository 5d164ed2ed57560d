//! Threads queues
use core::fmt;

use crate::{
    klock::{SysLockCell, SysLockGuard, SysLockTokenRefMut},
    thread::ThreadSt,
    time::{SysInterval, TIME_IMMEDIATE},
    utils::Init,
    Cnt, KernelTraits, Msg, System, Thread,
};

/// A counter-based queue of waiting threads.
///
/// The counter is the negated number of waiters (it's never positive for a
/// bare queue). Waiters are not linked; they are found by scanning the thread
/// table, so they are always woken in priority order.
///
/// [`Semaphore`](crate::Semaphore) is built on this type and lets the
/// counter become positive.
pub struct ThreadsQueue<Traits> {
    pub(crate) cnt: SysLockCell<Traits, Cnt>,
}

impl<Traits> ThreadsQueue<Traits> {
    /// Construct an empty `ThreadsQueue`.
    pub const fn new() -> Self {
        Self::with_count(0)
    }

    pub(crate) const fn with_count(cnt: Cnt) -> Self {
        Self {
            cnt: SysLockCell::new(cnt),
        }
    }
}

impl<Traits> Init for ThreadsQueue<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

impl<Traits> Default for ThreadsQueue<Traits> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Traits: KernelTraits> fmt::Debug for ThreadsQueue<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadsQueue")
            .field("self", &(self as *const _))
            .field("cnt", &self.cnt)
            .finish()
    }
}

impl<Traits: KernelTraits> ThreadsQueue<Traits> {
    /// Get a flag indicating whether no thread is waiting on `self`.
    #[inline]
    pub fn is_empty_i(&self, lock: SysLockTokenRefMut<'_, Traits>) -> bool {
        self.cnt.get(&*lock) >= 0
    }

    /// Put the calling thread into `self` until it's dequeued or `timeout`
    /// expires.
    ///
    /// Returns the message passed to the dequeue operation, or
    /// [`Msg::TIMEOUT`]. With [`TIME_IMMEDIATE`], returns [`Msg::TIMEOUT`]
    /// immediately.
    pub fn enqueue_timeout_s(
        &'static self,
        lock: &mut SysLockGuard<Traits>,
        timeout: SysInterval,
    ) -> Msg {
        crate::dbg::check_class_s::<Traits>();
        dbg_assert!(Traits, self.cnt.get(&**lock) <= 0, "invalid counter");

        if timeout == TIME_IMMEDIATE {
            return Msg::TIMEOUT;
        }

        self.cnt.replace_with(&mut **lock, |cnt| *cnt - 1);
        System::<Traits>::go_sleep_timeout_s_with(lock, ThreadSt::WaitingQueue(self), timeout)
    }

    /// Wake up the highest-priority waiter. There must be one.
    pub fn do_dequeue_next_i(&self, mut lock: SysLockTokenRefMut<'_, Traits>, msg: Msg) {
        dbg_assert!(Traits, self.cnt.get(&*lock) < 0, "empty queue");

        self.cnt.replace_with(&mut *lock, |cnt| *cnt + 1);
        let thread = self.find_waiter(lock.borrow_mut());
        System::<Traits>::ready_i(lock, thread, msg);
    }

    /// Wake up the highest-priority waiter, if any.
    pub fn dequeue_next_i(&self, mut lock: SysLockTokenRefMut<'_, Traits>, msg: Msg) {
        crate::dbg::check_class_i::<Traits>();

        if self.cnt.get(&*lock) < 0 {
            self.do_dequeue_next_i(lock.borrow_mut(), msg);
        }
    }

    /// Wake up all waiters.
    pub fn dequeue_all_i(&self, mut lock: SysLockTokenRefMut<'_, Traits>, msg: Msg) {
        crate::dbg::check_class_i::<Traits>();

        let cnt = self.cnt.get(&*lock);
        let cnt = self.ready_all(lock.borrow_mut(), cnt, msg);
        self.cnt.replace(&mut *lock, cnt);
    }

    /// Find the highest-priority thread waiting on `self`.
    pub(crate) fn find_waiter(&self, lock: SysLockTokenRefMut<'_, Traits>) -> Thread<Traits> {
        let pool = Traits::thread_cb_pool();
        match (0..Traits::NUM_THREADS).find(|&i| pool[i].st.read(&*lock).is_waiting_on(self)) {
            Some(i) => Thread::from_index_unchecked(i),
            None => System::<Traits>::halt("pointer out of range"),
        }
    }

    /// Wake up waiters in priority order while `cnt` is negative, counting it
    /// up. Returns the final count.
    pub(crate) fn ready_all(
        &self,
        mut lock: SysLockTokenRefMut<'_, Traits>,
        mut cnt: Cnt,
        msg: Msg,
    ) -> Cnt {
        let pool = Traits::thread_cb_pool();
        let mut i = 0;
        while cnt < 0 {
            if i >= Traits::NUM_THREADS {
                System::<Traits>::halt("pointer out of range");
            }
            if pool[i].st.read(&*lock).is_waiting_on(self) {
                cnt += 1;
                System::<Traits>::ready_i(lock.borrow_mut(), Thread::from_index_unchecked(i), msg);
            }
            i += 1;
        }
        cnt
    }
}
