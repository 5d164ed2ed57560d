//! A fake port for the unit tests
//!
//! The fake `switch` records the switch and returns immediately, so a test
//! keeps running on the same host thread while the kernel believes another
//! thread is running. Tests reason about [`System::get_self_x`] instead of
//! actually running the thread bodies.
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use crate::{
    thread::ThreadSt,
    time::{SysInterval, SysTime},
    KernelTraits, Msg, PortToKernel, System, Thread, ThreadState,
};

/// The state of a fake port instance.
pub(crate) struct FakePort {
    /// Serializes the tests sharing the same system type.
    pub(crate) test_lock: Mutex<()>,
    pub(crate) irq_enabled: AtomicBool,
    pub(crate) isr: AtomicBool,
    pub(crate) now: AtomicU32,
    pub(crate) alarm: Mutex<Option<SysTime>>,
    /// `(new, old)` for every `switch`
    pub(crate) switches: Mutex<Vec<(usize, usize)>>,
    pub(crate) idle_enter: AtomicUsize,
    pub(crate) idle_leave: AtomicUsize,
    pub(crate) thread_init: AtomicUsize,
    pub(crate) halt_reason: Mutex<Option<&'static str>>,
    /// Advances on every read
    pub(crate) rt: AtomicU32,
}

impl FakePort {
    pub(crate) const fn new() -> Self {
        Self {
            test_lock: Mutex::new(()),
            irq_enabled: AtomicBool::new(true),
            isr: AtomicBool::new(false),
            now: AtomicU32::new(0),
            alarm: Mutex::new(None),
            switches: Mutex::new(Vec::new()),
            idle_enter: AtomicUsize::new(0),
            idle_leave: AtomicUsize::new(0),
            thread_init: AtomicUsize::new(0),
            halt_reason: Mutex::new(None),
            rt: AtomicU32::new(0),
        }
    }

    pub(crate) fn reset(&self) {
        self.irq_enabled.store(true, Ordering::Relaxed);
        self.isr.store(false, Ordering::Relaxed);
        self.now.store(0, Ordering::Relaxed);
        *lock_ignoring_poison(&self.alarm) = None;
        lock_ignoring_poison(&self.switches).clear();
        self.idle_enter.store(0, Ordering::Relaxed);
        self.idle_leave.store(0, Ordering::Relaxed);
        self.thread_init.store(0, Ordering::Relaxed);
        *lock_ignoring_poison(&self.halt_reason) = None;
    }
}

/// A halting test leaves the mutexes poisoned.
pub(crate) fn lock_ignoring_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The entry point of the fake threads. Never called because the fake port
/// doesn't run threads.
pub(crate) fn never_started(_: usize) {
    unreachable!()
}

/// Define a system type backed by [`FakePort`] and `N` fake threads.
macro_rules! fake_system {
    (struct $Sys:ident, threads: $n:literal $(, time_delta: $delta:expr)? $(,)?) => {
        struct $Sys;

        static FAKE: $crate::test_utils::FakePort = $crate::test_utils::FakePort::new();

        fn hook_thread_init(_: usize) {
            FAKE.thread_init.fetch_add(1, ::std::sync::atomic::Ordering::Relaxed);
        }

        fn hook_idle_enter() {
            FAKE.idle_enter.fetch_add(1, ::std::sync::atomic::Ordering::Relaxed);
        }

        fn hook_idle_leave() {
            FAKE.idle_leave.fetch_add(1, ::std::sync::atomic::Ordering::Relaxed);
        }

        fn hook_system_halt(reason: &'static str) {
            *$crate::test_utils::lock_ignoring_poison(&FAKE.halt_reason) = Some(reason);
        }

        $crate::build!(
            $Sys,
            frequency: 1000,
            time_delta: fake_system!(@delta $($delta)?),
            threads: [
                $crate::ThreadConfig::new("t", $crate::test_utils::never_started, 0); $n
            ],
            hooks: $crate::KernelHooks {
                system_init: None,
                thread_init: Some(hook_thread_init),
                idle_enter: Some(hook_idle_enter),
                idle_leave: Some(hook_idle_leave),
                system_halt: Some(hook_system_halt),
            },
        );

        unsafe impl $crate::PortThreading for $Sys {
            type PortThreadState = ();

            unsafe fn port_init() {}

            unsafe fn setup_context(
                _: &'static $crate::ThreadCb<Self>,
                _: &'static $crate::ThreadConfig,
            ) {
            }

            unsafe fn switch(
                new: &'static $crate::ThreadCb<Self>,
                old: &'static $crate::ThreadCb<Self>,
            ) {
                $crate::test_utils::lock_ignoring_poison(&FAKE.switches)
                    .push((new.index(), old.index()));
            }

            unsafe fn lock() {
                FAKE.irq_enabled.store(false, ::std::sync::atomic::Ordering::Relaxed);
            }

            unsafe fn unlock() {
                FAKE.irq_enabled.store(true, ::std::sync::atomic::Ordering::Relaxed);
            }

            unsafe fn lock_from_isr() {
                FAKE.irq_enabled.store(false, ::std::sync::atomic::Ordering::Relaxed);
            }

            unsafe fn unlock_from_isr() {
                FAKE.irq_enabled.store(true, ::std::sync::atomic::Ordering::Relaxed);
            }

            unsafe fn disable() {
                FAKE.irq_enabled.store(false, ::std::sync::atomic::Ordering::Relaxed);
            }

            unsafe fn suspend() {
                FAKE.irq_enabled.store(false, ::std::sync::atomic::Ordering::Relaxed);
            }

            unsafe fn enable() {
                FAKE.irq_enabled.store(true, ::std::sync::atomic::Ordering::Relaxed);
            }

            fn is_irq_enabled() -> bool {
                FAKE.irq_enabled.load(::std::sync::atomic::Ordering::Relaxed)
            }

            fn is_isr_context() -> bool {
                FAKE.isr.load(::std::sync::atomic::Ordering::Relaxed)
            }

            unsafe fn halt(reason: &'static str) -> ! {
                panic!("halted: {}", reason)
            }
        }

        unsafe impl $crate::PortTimer for $Sys {
            fn timer_get_time() -> $crate::SysTime {
                FAKE.now.load(::std::sync::atomic::Ordering::Relaxed)
            }

            unsafe fn timer_start_alarm(time: $crate::SysTime) {
                *$crate::test_utils::lock_ignoring_poison(&FAKE.alarm) = Some(time);
            }

            unsafe fn timer_set_alarm(time: $crate::SysTime) {
                *$crate::test_utils::lock_ignoring_poison(&FAKE.alarm) = Some(time);
            }

            unsafe fn timer_stop_alarm() {
                *$crate::test_utils::lock_ignoring_poison(&FAKE.alarm) = None;
            }

            fn timer_get_alarm() -> $crate::SysTime {
                $crate::test_utils::lock_ignoring_poison(&FAKE.alarm).unwrap_or(0)
            }

            fn rt_counter_value() -> $crate::RtCnt {
                FAKE.rt.fetch_add(1, ::std::sync::atomic::Ordering::Relaxed)
            }
        }

        impl $crate::test_utils::FakeSystem for $Sys {
            fn fake() -> &'static $crate::test_utils::FakePort {
                &FAKE
            }
        }
    };

    (@delta) => { 0 };
    (@delta $delta:expr) => { $delta };
}

/// Test helpers for a system type defined by `fake_system!`.
pub(crate) trait FakeSystem: KernelTraits {
    fn fake() -> &'static FakePort;

    /// Serialize with the other tests of this system type, reset the kernel
    /// and the fake port, and run `System::init`. Thread 0 is running on
    /// return.
    fn setup() -> MutexGuard<'static, ()> {
        let fake = Self::fake();
        let guard = lock_ignoring_poison(&fake.test_lock);
        fake.reset();

        let state = Self::state();
        state.isr_cnt.store(0, Ordering::Relaxed);
        state.lock_cnt.store(0, Ordering::Relaxed);
        state.systime.store(0, Ordering::Relaxed);

        {
            let mut lock = System::<Self>::lock();
            for cb in Self::thread_cb_pool() {
                cb.st.replace(&mut *lock, ThreadSt::Ready(Msg::OK));
                cb.timeout.replace(&mut *lock, 0);
                cb.epmask.replace(&mut *lock, 0);
            }
            state.next.replace(&mut *lock, 0);
            state.lasttime.replace(&mut *lock, 0);
            state.nexttime.replace(&mut *lock, 0);
            state.set_current(0);
        }

        System::<Self>::init();
        guard
    }

    /// Put every user thread to sleep forever and make the idle thread the
    /// running one.
    fn park_all_but_idle() {
        Self::park_all_but_many(&[]);
    }

    /// Put every user thread but `index` to sleep forever and make `index`
    /// the running one.
    fn park_all_but(index: usize) {
        Self::park_all_but_many(&[index]);
    }

    /// Put every user thread not in `keep` to sleep forever and make the
    /// highest-priority thread in `keep` the running one.
    fn park_all_but_many(keep: &[usize]) {
        let state = Self::state();
        let mut lock = System::<Self>::lock();
        for (i, cb) in Self::thread_cb_pool()[..Self::NUM_THREADS].iter().enumerate() {
            if !keep.contains(&i) {
                cb.st.replace(&mut *lock, ThreadSt::Sleeping);
                cb.timeout.replace(&mut *lock, 0);
            }
        }
        let first = keep.iter().copied().min().unwrap_or(Self::NUM_THREADS);
        state.set_current(first);
        state.next.replace(&mut *lock, first);
    }

    fn last_switch() -> Option<(usize, usize)> {
        lock_ignoring_poison(&Self::fake().switches).last().copied()
    }

    fn idle_enter_count() -> usize {
        Self::fake().idle_enter.load(Ordering::Relaxed)
    }

    fn idle_leave_count() -> usize {
        Self::fake().idle_leave.load(Ordering::Relaxed)
    }

    fn thread_init_count() -> usize {
        Self::fake().thread_init.load(Ordering::Relaxed)
    }

    fn halt_hook_reason() -> Option<&'static str> {
        *lock_ignoring_poison(&Self::fake().halt_reason)
    }

    /// Simulate the timer interrupt followed by the return to the
    /// interrupted thread.
    fn tick() {
        let fake = Self::fake();
        fake.isr.store(true, Ordering::Relaxed);
        // Safety: We are simulating an interrupt handler
        unsafe {
            Self::irq_prologue();
            Self::timer_handler();
            Self::irq_epilogue();
        }
        fake.isr.store(false, Ordering::Relaxed);
        // Safety: Back in a thread context, the lock is not held
        unsafe { Self::preempt() };
    }

    /// Advance the time to the programmed alarm and simulate the alarm
    /// interrupt.
    fn fire_alarm() {
        let alarm = Self::alarm();
        assert!(alarm.is_some(), "no alarm is programmed");
        Self::set_time(alarm.unwrap_or(0));
        Self::tick();
    }

    fn set_time(time: SysTime) {
        Self::fake().now.store(time, Ordering::Relaxed);
    }

    fn alarm() -> Option<SysTime> {
        *lock_ignoring_poison(&Self::fake().alarm)
    }

    fn state_of(index: usize) -> ThreadState {
        let mut lock = System::<Self>::lock();
        Thread::<Self>::from_index_unchecked(index).state_i(lock.borrow_mut())
    }

    fn msg_of(index: usize) -> Msg {
        let lock = System::<Self>::lock();
        Self::thread_cb_pool()[index].st.get(&*lock).wakeup_msg()
    }

    fn timeout_of(index: usize) -> SysInterval {
        let lock = System::<Self>::lock();
        Self::thread_cb_pool()[index].timeout.get(&*lock)
    }
}
