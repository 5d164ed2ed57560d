//! System initialization, halt, and interrupt state management
use core::mem::forget;

use crate::{
    dbg,
    klock::{self, assume_isr_lock, assume_sys_lock},
    time::RtCnt,
    KernelTraits, System,
};

/// The interrupt status saved by [`System::get_status_and_lock_x`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the status must be passed to `restore_status_x`"]
pub struct SysStatus {
    irq_enabled: bool,
}

impl SysStatus {
    /// Get a flag indicating whether the interrupts were enabled.
    #[inline]
    pub fn irq_enabled(self) -> bool {
        self.irq_enabled
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Initialize the kernel and start the threads.
    ///
    /// The context of every thread in the thread table is set up, then the
    /// first thread is started. The call returns when all threads are
    /// sleeping, and the caller becomes the idle thread.
    pub fn init() {
        let state = Traits::state();
        state.isr_cnt.store(0, core::sync::atomic::Ordering::Relaxed);
        state.lock_cnt.store(0, core::sync::atomic::Ordering::Relaxed);

        if let Some(hook) = Traits::HOOKS.system_init {
            hook();
        }

        let pool = Traits::thread_cb_pool();
        for (i, config) in Traits::THREAD_CONFIGS.iter().enumerate() {
            // Safety: The kernel isn't running yet
            unsafe { Traits::setup_context(&pool[i], config) };

            if let Some(hook) = Traits::HOOKS.thread_init {
                hook(i);
            }
        }

        // Enter the locked state without the usual `lock`, which expects
        // the interrupts to be enabled
        Self::suspend();
        dbg::force_lock_cnt::<Traits>(1);

        // Safety: We just entered the locked state
        let mut lock = unsafe { assume_sys_lock::<Traits>() };

        // Safety: Called once, with the lock held
        unsafe { Traits::port_init() };

        // The highest-priority thread runs first, the caller becomes the
        // idle thread
        state.set_current(0);
        state.next.replace(&mut *lock, 0);

        // Safety: The lock is held
        unsafe { Traits::switch(&pool[0], &pool[Traits::NUM_THREADS]) };

        drop(lock);
    }

    /// Halt the system. `reason` is recorded in
    /// [`State::panic_msg`](crate::State::panic_msg) and passed to the
    /// halt hook and the port.
    ///
    /// This can be called from any context.
    pub fn halt(reason: &'static str) -> ! {
        // Safety: Halting overrides any state
        unsafe { Traits::disable() };

        Traits::state().set_panic_msg(reason);

        if let Some(hook) = Traits::HOOKS.system_halt {
            hook(reason);
        }

        // Safety: The interrupts are disabled
        unsafe { Traits::halt(reason) }
    }

    /// Disable all the interrupts.
    pub fn disable() {
        dbg::check_disable::<Traits>();
        // Safety: Checked by the state checker
        unsafe { Traits::disable() };
    }

    /// Disable the interrupts that can use the kernel. This is equivalent to
    /// entering the lock without a guard.
    pub fn suspend() {
        dbg::check_suspend::<Traits>();
        // Safety: Checked by the state checker
        unsafe { Traits::suspend() };
    }

    /// Enable all the interrupts.
    pub fn enable() {
        dbg::check_enable::<Traits>();
        // Safety: Checked by the state checker
        unsafe { Traits::enable() };
    }

    /// Enter the lock if the interrupts are enabled. Does nothing otherwise.
    ///
    /// Meant for code that can run both inside and outside of the lock, e.g.,
    /// a debug print. Pair with [`System::unconditional_unlock`].
    pub fn unconditional_lock() {
        if Traits::is_irq_enabled() {
            forget(klock::lock::<Traits>());
        }
    }

    /// Leave the lock if the interrupts are disabled. Does nothing otherwise.
    ///
    /// # Safety
    ///
    /// The lock, if held, must have been entered by
    /// [`System::unconditional_lock`] in the current thread, and no
    /// [`SysLockGuard`](crate::SysLockGuard) may exist.
    pub unsafe fn unconditional_unlock() {
        if !Traits::is_irq_enabled() {
            // Safety: Upheld by the caller
            drop(unsafe { assume_sys_lock::<Traits>() });
        }
    }

    /// Save the interrupt status and enter the lock if it's not held. This
    /// works in any context.
    pub fn get_status_and_lock_x() -> SysStatus {
        let sts = SysStatus {
            irq_enabled: Traits::is_irq_enabled(),
        };
        if sts.irq_enabled {
            if Traits::is_isr_context() {
                forget(klock::lock_from_isr::<Traits>());
            } else {
                forget(klock::lock::<Traits>());
            }
        }
        sts
    }

    /// Restore the interrupt status saved by
    /// [`System::get_status_and_lock_x`]. In a thread context, a pending
    /// reschedule is performed before leaving the lock.
    ///
    /// # Safety
    ///
    /// `sts` must be the value returned by the matching
    /// `get_status_and_lock_x` call in the same context, and no lock guard
    /// may exist.
    pub unsafe fn restore_status_x(sts: SysStatus) {
        if sts.irq_enabled {
            if Traits::is_isr_context() {
                // Safety: Upheld by the caller
                drop(unsafe { assume_isr_lock::<Traits>() });
            } else {
                // Safety: Upheld by the caller
                let mut lock = unsafe { assume_sys_lock::<Traits>() };
                Self::reschedule_s(&mut lock);
            }
        }
    }

    /// Get the value of the realtime counter.
    #[inline]
    pub fn get_realtime_counter_x() -> RtCnt {
        Traits::rt_counter_value()
    }

    /// Check if `cnt` lies in the half-open window `[start, end)` of the
    /// realtime counter, taking wrap-around into account.
    #[inline]
    pub const fn is_counter_within_x(cnt: RtCnt, start: RtCnt, end: RtCnt) -> bool {
        cnt.wrapping_sub(start) < end.wrapping_sub(start)
    }

    /// Busy-wait for `cycles` realtime counter cycles.
    pub fn polled_delay_x(cycles: RtCnt) {
        let start = Self::get_realtime_counter_x();
        let end = start.wrapping_add(cycles);
        while Self::is_counter_within_x(Self::get_realtime_counter_x(), start, end) {
            core::hint::spin_loop();
        }
    }
}
