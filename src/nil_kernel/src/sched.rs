//! Scheduler
//!
//! The scheduler doesn't maintain a ready queue. The thread table is ordered
//! by priority, so the next thread to run is found by scanning it from the
//! top for the first ready thread. The idle thread, at the bottom, is always
//! ready.
use crate::{
    dbg,
    klock::{SysLockGuard, SysLockTokenRefMut},
    thread::ThreadSt,
    time::SysInterval,
    timeout, KernelTraits, Msg, System, Thread,
};

impl<Traits: KernelTraits> System<Traits> {
    /// Make `thread` ready, delivering `msg` to it. Its timeout is cancelled.
    ///
    /// The caller must follow up with [`System::reschedule_s`] (or return
    /// from the interrupt handler) to actually switch to `thread` if it has a
    /// higher priority than the running thread.
    pub fn ready_i(
        mut lock: SysLockTokenRefMut<'_, Traits>,
        thread: Thread<Traits>,
        msg: Msg,
    ) -> Thread<Traits> {
        dbg::check_class_i::<Traits>();
        dbg_check!(Traits, thread.index() < Traits::NUM_THREADS, "ready_i");

        let state = Traits::state();
        let cb = thread.cb();
        dbg_assert!(Traits, !cb.st.read(&*lock).is_ready(), "already ready");
        dbg_assert!(
            Traits,
            state.next.get(&*lock) <= state.current_index(),
            "priority ordering"
        );

        cb.st.replace(&mut *lock, ThreadSt::Ready(msg));
        cb.timeout.replace(&mut *lock, 0);

        if thread.index() < state.next.get(&*lock) {
            state.next.replace(&mut *lock, thread.index());
        }

        thread
    }

    /// Get a flag indicating whether a higher-priority thread than the
    /// running one is ready.
    #[inline]
    pub fn is_resc_required_i(lock: SysLockTokenRefMut<'_, Traits>) -> bool {
        let state = Traits::state();
        state.current_index() != state.next.get(&*lock)
    }

    /// Get a flag indicating whether the running thread should be preempted.
    /// Meant to be checked by the port when returning from an interrupt.
    #[inline]
    pub fn is_preemption_required(lock: SysLockTokenRefMut<'_, Traits>) -> bool {
        Self::is_resc_required_i(lock)
    }

    /// Switch to the thread selected by the last [`System::ready_i`]
    /// unconditionally.
    pub fn do_reschedule(lock: &mut SysLockGuard<Traits>) {
        let state = Traits::state();
        let otp = state.current_index();
        let ntp = state.next.get(&**lock);
        state.set_current(ntp);

        if otp == Traits::NUM_THREADS {
            if let Some(hook) = Traits::HOOKS.idle_leave {
                hook();
            }
        }

        let pool = Traits::thread_cb_pool();
        // Safety: The lock is held, and `ntp` is ready
        unsafe { Traits::switch(&pool[ntp], &pool[otp]) };
    }

    /// Switch to a higher-priority thread if one became ready.
    pub fn reschedule_s(lock: &mut SysLockGuard<Traits>) {
        dbg::check_class_s::<Traits>();

        if Self::is_resc_required_i(lock.borrow_mut()) {
            Self::do_reschedule(lock);
        }
    }

    /// Put the running thread to sleep until it's made ready by
    /// [`System::ready_i`] or `timeout` expires. The idle thread can't sleep.
    ///
    /// Returns the message passed to `ready_i`, or [`Msg::TIMEOUT`].
    pub fn go_sleep_timeout_s(lock: &mut SysLockGuard<Traits>, timeout: SysInterval) -> Msg {
        Self::go_sleep_timeout_s_with(lock, ThreadSt::Sleeping, timeout)
    }

    pub(crate) fn go_sleep_timeout_s_with(
        lock: &mut SysLockGuard<Traits>,
        newstate: ThreadSt<Traits>,
        timeout: SysInterval,
    ) -> Msg {
        dbg::check_class_s::<Traits>();

        let state = Traits::state();
        let pool = Traits::thread_cb_pool();
        let otp = state.current_index();
        dbg_assert!(Traits, otp != Traits::NUM_THREADS, "idle cannot sleep");

        pool[otp].st.replace(&mut **lock, newstate);

        let timeout = timeout::arm_timeout::<Traits>(lock.borrow_mut(), timeout);
        pool[otp].timeout.replace(&mut **lock, timeout);

        let ntp = match (0..=Traits::NUM_THREADS).find(|&i| pool[i].st.read(&**lock).is_ready()) {
            Some(i) => i,
            None => Self::halt("pointer out of range"),
        };

        state.set_current(ntp);
        state.next.replace(&mut **lock, ntp);

        if ntp == Traits::NUM_THREADS {
            if let Some(hook) = Traits::HOOKS.idle_enter {
                hook();
            }
        }

        // Safety: The lock is held, and `ntp` is ready
        unsafe { Traits::switch(&pool[ntp], &pool[otp]) };

        // We are back, `ready_i` left the message in our control block
        let current = state.current_index();
        dbg_assert!(Traits, pool[current].st.read(&**lock).is_ready(), "not ready");
        pool[current].st.read(&**lock).wakeup_msg()
    }
}
