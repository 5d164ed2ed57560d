#![doc = include_str!("./lib.md")]
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
use core::marker::PhantomData;

#[macro_use]
mod dbg;
#[macro_use]
mod cfg;
#[cfg(test)]
#[macro_use]
mod test_utils;
mod error;
mod event;
mod klock;
mod queue;
mod sched;
mod semaphore;
mod state;
mod system;
mod thread;
mod thread_ref;
mod time;
mod timeout;
#[doc(hidden)]
pub mod utils;

pub use self::{
    cfg::*,
    error::*,
    event::*,
    klock::{IsrLockGuard, SysLockGuard, SysLockTokenRefMut},
    queue::ThreadsQueue,
    semaphore::Semaphore,
    state::State,
    system::SysStatus,
    thread::{Thread, ThreadCb, ThreadState},
    thread_ref::ThreadReference,
    time::*,
};

/// A counter of a semaphore or a threads queue.
pub type Cnt = i32;

/// Wraps a "system" type and provides the kernel API as associated
/// functions.
///
/// ```ignore
/// type System = nil_kernel::System<SystemTraits>;
///
/// System::sleep_milliseconds(500);
/// ```
pub struct System<Traits>(PhantomData<Traits>);

/// Represents "system" types having sufficient trait `impl`s to instantiate
/// the kernel.
pub trait KernelTraits: Port + KernelCfg + 'static {}
impl<T: Port + KernelCfg + 'static> KernelTraits for T {}

/// Represents a complete port.
pub trait Port: PortThreading + PortTimer {}
impl<T: PortThreading + PortTimer> Port for T {}

/// Implemented by a port. This trait contains items related to context
/// switching and the interrupt state.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because it's responsible for
/// initializing the execution environment and providing a dispatcher
/// implementation.
///
/// These methods are only meant to be called by the kernel.
pub unsafe trait PortThreading: Sized + 'static {
    /// The port's context record stored at the beginning of every
    /// [`ThreadCb`].
    type PortThreadState: Send + Sync + utils::Init + 'static;

    /// Initialize the port. Called once by [`System::init`] with the lock
    /// held.
    unsafe fn port_init();

    /// Prepare the thread for execution. Its first context switch must enter
    /// [`PortToKernel::thread_start`].
    ///
    /// Precondition: The kernel isn't running yet.
    unsafe fn setup_context(thread: &'static ThreadCb<Self>, config: &'static ThreadConfig);

    /// Save the context of `old` and restore `new`. Returns when `old` is
    /// switched back to.
    ///
    /// Precondition: The lock is held (and still is when this returns)
    unsafe fn switch(new: &'static ThreadCb<Self>, old: &'static ThreadCb<Self>);

    /// Enter the locked state from a thread context.
    ///
    /// Precondition: The lock is not held
    unsafe fn lock();

    /// Leave the locked state from a thread context.
    ///
    /// Precondition: The lock is held
    unsafe fn unlock();

    /// Enter the locked state from an interrupt handler.
    ///
    /// Precondition: The lock is not held
    unsafe fn lock_from_isr();

    /// Leave the locked state from an interrupt handler.
    ///
    /// Precondition: The lock is held
    unsafe fn unlock_from_isr();

    /// Disable all the interrupts.
    unsafe fn disable();

    /// Disable the interrupts that can use the kernel.
    unsafe fn suspend();

    /// Enable all the interrupts.
    unsafe fn enable();

    /// Return a flag indicating whether the interrupts are enabled (the lock
    /// is not held).
    fn is_irq_enabled() -> bool;

    /// Return a flag indicating whether the caller is an interrupt handler.
    fn is_isr_context() -> bool;

    /// Stop the system forever. Called by [`System::halt`] with the
    /// interrupts disabled.
    unsafe fn halt(reason: &'static str) -> !;
}

/// Implemented by a port. This trait contains items related to the system
/// timer and the realtime counter.
///
/// In the periodic tick mode, only [`PortTimer::rt_counter_value`] is used.
///
/// # Safety
///
/// These methods are only meant to be called by the kernel.
pub unsafe trait PortTimer {
    /// Get the current system time (tickless mode).
    fn timer_get_time() -> SysTime;

    /// Start the alarm at `time` (tickless mode).
    ///
    /// Precondition: The lock is held, the alarm is stopped
    unsafe fn timer_start_alarm(time: SysTime);

    /// Move the running alarm to `time` (tickless mode).
    ///
    /// Precondition: The lock is held, the alarm is running
    unsafe fn timer_set_alarm(time: SysTime);

    /// Stop the alarm (tickless mode).
    ///
    /// Precondition: The lock is held
    unsafe fn timer_stop_alarm();

    /// Get the time the alarm is programmed for (tickless mode).
    fn timer_get_alarm() -> SysTime;

    /// Get the value of the free-running realtime counter.
    fn rt_counter_value() -> RtCnt;
}

/// Methods intended to be called by a port.
///
/// # Safety
///
/// These are only meant to be called by the port.
pub trait PortToKernel: PortThreading {
    /// The first code of every thread. Leaves the lock and calls the entry
    /// point. Halts the system with `"thread exited"` if it returns.
    ///
    /// Precondition: The lock is held (as left by the `switch` that started
    /// the thread)
    unsafe fn thread_start(thread: &'static ThreadCb<Self>) -> !;

    /// Called on entry to an interrupt handler that uses the kernel.
    unsafe fn irq_prologue();

    /// Called on exit from an interrupt handler that uses the kernel.
    unsafe fn irq_epilogue();

    /// Switch to a higher-priority thread made ready by an interrupt
    /// handler, if any. Called in a thread context after an interrupt
    /// handler returns.
    ///
    /// Precondition: The lock is not held
    unsafe fn preempt();

    /// The tick or alarm interrupt handler: [`System::timer_handler_i`]
    /// wrapped in the interrupt lock.
    ///
    /// Precondition: Called between `irq_prologue` and `irq_epilogue`
    unsafe fn timer_handler();
}

impl<Traits: KernelTraits> PortToKernel for Traits {
    unsafe fn thread_start(thread: &'static ThreadCb<Self>) -> ! {
        let config = thread.config();

        // Safety: The lock was held by `switch`
        drop(unsafe { klock::assume_sys_lock::<Traits>() });

        (config.entry)(config.arg);

        System::<Traits>::halt("thread exited");
    }

    unsafe fn irq_prologue() {
        dbg::check_enter_isr::<Traits>();
    }

    unsafe fn irq_epilogue() {
        dbg::check_leave_isr::<Traits>();
    }

    unsafe fn preempt() {
        let mut lock = klock::lock::<Traits>();
        System::<Traits>::reschedule_s(&mut lock);
    }

    unsafe fn timer_handler() {
        let mut lock = klock::lock_from_isr::<Traits>();
        System::<Traits>::timer_handler_i(&mut lock);
    }
}
