//! Semaphores
use core::fmt;

use crate::{
    dbg,
    klock::{SysLockGuard, SysLockTokenRefMut},
    queue::ThreadsQueue,
    thread::ThreadSt,
    time::{SysInterval, TIME_IMMEDIATE, TIME_INFINITE},
    Cnt, KernelTraits, Msg, System,
};

/// A counting semaphore.
///
/// A negative counter `-n` means `n` threads are waiting. Waiters are woken
/// up in priority order, not in arrival order.
///
/// ```ignore
/// static SEM: Semaphore<SystemTraits> = Semaphore::new(0);
///
/// // Producer
/// SEM.signal();
///
/// // Consumer
/// match SEM.wait_timeout(System::ms2i(100)) {
///     Msg::OK => { /* got it */ }
///     Msg::TIMEOUT => { /* gave up */ }
///     Msg::RESET => { /* the semaphore was reset */ }
///     _ => unreachable!(),
/// }
/// ```
pub struct Semaphore<Traits> {
    queue: ThreadsQueue<Traits>,
}

impl<Traits> Semaphore<Traits> {
    /// Construct a `Semaphore` with the initial counter value `n`.
    pub const fn new(n: Cnt) -> Self {
        Self {
            queue: ThreadsQueue::with_count(n),
        }
    }
}

impl<Traits: KernelTraits> fmt::Debug for Semaphore<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("self", &(self as *const _))
            .field("cnt", &self.queue.cnt)
            .finish()
    }
}

impl<Traits: KernelTraits> Semaphore<Traits> {
    /// Get the counter value.
    #[inline]
    pub fn get_counter_i(&self, lock: SysLockTokenRefMut<'_, Traits>) -> Cnt {
        self.queue.cnt.get(&*lock)
    }

    /// Decrement the counter without checking it. The counter must be
    /// positive.
    #[inline]
    pub fn fast_wait_i(&self, mut lock: SysLockTokenRefMut<'_, Traits>) {
        self.queue.cnt.replace_with(&mut *lock, |cnt| *cnt - 1);
    }

    /// Increment the counter without waking up anyone. The counter must not
    /// be negative.
    #[inline]
    pub fn fast_signal_i(&self, mut lock: SysLockTokenRefMut<'_, Traits>) {
        self.queue.cnt.replace_with(&mut *lock, |cnt| *cnt + 1);
    }

    /// Wait on the semaphore forever.
    #[inline]
    pub fn wait(&'static self) -> Msg {
        self.wait_timeout(TIME_INFINITE)
    }

    /// [`wait`](Self::wait) with the lock already held.
    #[inline]
    pub fn wait_s(&'static self, lock: &mut SysLockGuard<Traits>) -> Msg {
        self.wait_timeout_s(lock, TIME_INFINITE)
    }

    /// Wait on the semaphore for at most `timeout`.
    ///
    /// Returns [`Msg::OK`] if the semaphore was taken, [`Msg::TIMEOUT`] if
    /// `timeout` expired (or was [`TIME_IMMEDIATE`] and the semaphore wasn't
    /// available), or [`Msg::RESET`] if the semaphore was reset.
    pub fn wait_timeout(&'static self, timeout: SysInterval) -> Msg {
        let mut lock = System::<Traits>::lock();
        self.wait_timeout_s(&mut lock, timeout)
    }

    /// [`wait_timeout`](Self::wait_timeout) with the lock already held.
    pub fn wait_timeout_s(&'static self, lock: &mut SysLockGuard<Traits>, timeout: SysInterval) -> Msg {
        dbg::check_class_s::<Traits>();

        let cnt = self.queue.cnt.get(&**lock);
        if cnt > 0 {
            self.queue.cnt.replace(&mut **lock, cnt - 1);
            return Msg::OK;
        }

        if timeout == TIME_IMMEDIATE {
            return Msg::TIMEOUT;
        }

        self.queue.cnt.replace(&mut **lock, cnt - 1);
        System::<Traits>::go_sleep_timeout_s_with(lock, ThreadSt::WaitingQueue(&self.queue), timeout)
    }

    /// Signal the semaphore, waking up the highest-priority waiter if any.
    pub fn signal(&self) {
        let mut lock = System::<Traits>::lock();
        self.signal_i(lock.borrow_mut());
        System::<Traits>::reschedule_s(&mut lock);
    }

    /// [`signal`](Self::signal) without the reschedule.
    pub fn signal_i(&self, mut lock: SysLockTokenRefMut<'_, Traits>) {
        dbg::check_class_i::<Traits>();

        let cnt = self.queue.cnt.get(&*lock) + 1;
        self.queue.cnt.replace(&mut *lock, cnt);
        if cnt <= 0 {
            let thread = self.queue.find_waiter(lock.borrow_mut());
            System::<Traits>::ready_i(lock, thread, Msg::OK);
        }
    }

    /// Reset the counter to `n`, waking up all waiters with [`Msg::RESET`].
    pub fn reset(&self, n: Cnt) {
        let mut lock = System::<Traits>::lock();
        self.reset_i(lock.borrow_mut(), n);
        System::<Traits>::reschedule_s(&mut lock);
    }

    /// [`reset`](Self::reset) without the reschedule.
    pub fn reset_i(&self, mut lock: SysLockTokenRefMut<'_, Traits>, n: Cnt) {
        dbg::check_class_i::<Traits>();
        dbg_check!(Traits, n >= 0, "reset_i");

        let cnt = self.queue.cnt.replace(&mut *lock, n);
        self.queue.ready_all(lock, cnt, Msg::RESET);
    }
}
