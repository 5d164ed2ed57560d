//! Timeouts
//!
//! Every thread control block has a timeout counter. Zero means "no timeout".
//!
//! In the periodic tick mode (`ST_TIMEDELTA == 0`), the tick handler
//! decrements the counter of every waiting thread and wakes up the thread
//! when it reaches zero.
//!
//! In the tickless mode, the counters are relative to `lasttime`, the time
//! at which the alarm last fired. `nexttime` is the time the alarm is
//! programmed for, and `lasttime == nexttime` means no alarm is programmed.
//! When the alarm fires, the handler subtracts `nexttime - lasttime` from
//! every counter, wakes up the threads whose counter reached zero, and
//! reprograms the alarm for the nearest remaining deadline.
use core::sync::atomic::Ordering;

use crate::{
    dbg,
    klock::{IsrLockGuard, SysLockTokenRefMut},
    thread::ThreadSt,
    time::{time_add_x, time_diff_x, time_is_in_range_x, SysInterval, TIME_INFINITE},
    KernelTraits, Msg, System, Thread,
};

/// Program the alarm for a thread that is about to sleep for `timeout`, and
/// return the value to store in its timeout counter.
pub(crate) fn arm_timeout<Traits: KernelTraits>(
    mut lock: SysLockTokenRefMut<'_, Traits>,
    timeout: SysInterval,
) -> SysInterval {
    if Traits::ST_TIMEDELTA == 0 || timeout == TIME_INFINITE {
        return timeout;
    }

    // Leave enough time to reprogram the timer before the counter reaches
    // the deadline
    let timeout = timeout.max(Traits::ST_TIMEDELTA);

    let state = Traits::state();
    let abstime = time_add_x(System::<Traits>::get_system_time_x(), timeout);
    let lasttime = state.lasttime.get(&*lock);
    let nexttime = state.nexttime.get(&*lock);

    if lasttime == nexttime {
        // The first timeout to be armed
        // Safety: The lock is held
        unsafe { Traits::timer_start_alarm(abstime) };
        state.nexttime.replace(&mut *lock, abstime);
    } else if time_is_in_range_x(abstime, lasttime, nexttime) {
        // Earlier than the programmed alarm
        // Safety: The lock is held
        unsafe { Traits::timer_set_alarm(abstime) };
        state.nexttime.replace(&mut *lock, abstime);
    }

    time_diff_x(lasttime, abstime)
}

/// Wake up the thread at `index` with [`Msg::TIMEOUT`], detaching it from the
/// object it was waiting on.
fn expire<Traits: KernelTraits>(mut lock: SysLockTokenRefMut<'_, Traits>, index: usize) {
    let thread = Thread::<Traits>::from_index_unchecked(index);
    match thread.cb().st.get(&*lock) {
        ThreadSt::WaitingQueue(queue) => {
            queue.cnt.replace_with(&mut *lock, |cnt| *cnt + 1);
        }
        ThreadSt::Suspended(reference) => {
            reference.clear_i(lock.borrow_mut());
        }
        _ => {}
    }
    System::<Traits>::ready_i(lock, thread, Msg::TIMEOUT);
}

impl<Traits: KernelTraits> System<Traits> {
    /// Process the expired timeouts. The port calls this from the tick
    /// interrupt (periodic mode) or the alarm interrupt (tickless mode),
    /// usually through [`PortToKernel::timer_handler`].
    ///
    /// The lock is briefly released between threads to bound the interrupt
    /// latency.
    ///
    /// [`PortToKernel::timer_handler`]: crate::PortToKernel::timer_handler
    pub fn timer_handler_i(lock: &mut IsrLockGuard<Traits>) {
        dbg::check_class_i::<Traits>();

        let state = Traits::state();
        let pool = Traits::thread_cb_pool();

        if Traits::ST_TIMEDELTA == 0 {
            let systime = state.systime.load(Ordering::Relaxed);
            state.systime.store(systime.wrapping_add(1), Ordering::Relaxed);

            for (i, cb) in pool[..Traits::NUM_THREADS].iter().enumerate() {
                let timeout = cb.timeout.get(&**lock);
                if timeout > 0 {
                    dbg_assert!(Traits, !cb.st.read(&**lock).is_ready(), "is ready");

                    let timeout = timeout - 1;
                    cb.timeout.replace(&mut **lock, timeout);
                    if timeout == 0 {
                        expire(lock.borrow_mut(), i);
                    }
                }
                lock.flash();
            }
        } else {
            let lasttime = state.lasttime.get(&**lock);
            let nexttime = state.nexttime.get(&**lock);
            dbg_assert!(
                Traits,
                nexttime == Traits::timer_get_alarm(),
                "time mismatch"
            );

            let elapsed = time_diff_x(lasttime, nexttime);
            let mut next: SysInterval = 0;

            for (i, cb) in pool[..Traits::NUM_THREADS].iter().enumerate() {
                let timeout = cb.timeout.get(&**lock);
                if timeout > 0 {
                    dbg_assert!(Traits, !cb.st.read(&**lock).is_ready(), "is ready");
                    dbg_assert!(Traits, timeout >= elapsed, "skipped one");

                    let timeout = timeout.wrapping_sub(elapsed);
                    cb.timeout.replace(&mut **lock, timeout);
                    if timeout == 0 {
                        expire(lock.borrow_mut(), i);
                    } else if timeout <= next.wrapping_sub(1) {
                        // `next == 0` accepts any value
                        next = timeout;
                    }
                }
                lock.flash();
            }

            state.lasttime.replace(&mut **lock, nexttime);
            if next > 0 {
                let nexttime = time_add_x(nexttime, next);
                state.nexttime.replace(&mut **lock, nexttime);
                // Safety: The lock is held
                unsafe { Traits::timer_set_alarm(nexttime) };
            } else {
                // Safety: The lock is held
                unsafe { Traits::timer_stop_alarm() };
            }
        }
    }
}
