#![doc = include_str!("./lib.md")]
#![deny(unsafe_op_in_unsafe_fn)]
use atomic_ref::AtomicRef;
use nil_kernel::{
    utils::Init, KernelTraits, PortThreading, PortToKernel, RtCnt, SysTime, System, Thread,
    ThreadCb, ThreadConfig,
};
use once_cell::sync::OnceCell;
use spin::Mutex as SpinMutex;
use std::{
    cell::Cell, collections::VecDeque, fmt, sync::atomic::Ordering, thread, time::Instant,
};

mod ums;

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate nil_kernel;
/// Used by `use_port!`
#[doc(hidden)]
pub extern crate env_logger;

/// Implemented on a kernel trait type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance:
    KernelTraits + PortThreading<PortThreadState = ThreadState> + PortToKernel
{
    fn port_state() -> &'static State;
}

/// The internal state of the port.
///
/// # Safety
///
/// For the safety information of this type's methods, see the documentation of
/// the corresponding trait methods of `Port*`.
#[doc(hidden)]
pub struct State {
    thread_group: OnceCell<ums::ThreadGroup<SchedState>>,
    origin: AtomicRef<'static, Instant>,
}

/// The port's context record of a kernel thread.
#[derive(Debug)]
pub struct ThreadState {
    /// The thread's state in the thread state machine.
    ///
    /// This field is only accessed by the thread holding the virtual
    /// processor, so `SpinMutex` is sufficient.
    tsm: SpinMutex<Tsm>,
}

impl Init for ThreadState {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();
}

impl ThreadState {
    pub const fn new() -> Self {
        Self {
            tsm: SpinMutex::new(Tsm::Uninit),
        }
    }
}

/// Thread state machine
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Tsm {
    /// `setup_context` hasn't been called. The idle thread stays in this
    /// state until it's switched away from for the first time.
    Uninit,
    /// The context is set up, but no host thread backs it yet.
    Dormant,
    /// Backed by a host thread.
    Running(ums::ThreadId),
}

/// The role of a host thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadRole {
    Unknown,
    /// The boot thread, which becomes the idle thread.
    Boot,
    /// The backing thread of a kernel thread.
    Thread,
}

thread_local! {
    /// The current thread's role. It's automatically assigned after the
    /// creation of a thread managed by the port.
    static THREAD_ROLE: Cell<ThreadRole> = Cell::new(ThreadRole::Unknown);
}

/// The state of the simulated processor.
struct SchedState {
    /// The host thread holding the processor.
    cpu_thread: Option<ums::ThreadId>,
    /// The interrupts are masked (the kernel lock is held, or the interrupts
    /// are disabled).
    masked: bool,
    /// An interrupt handler is running.
    in_isr: bool,
    /// Pended interrupts, in arrival order.
    pending: VecDeque<fn()>,
    /// The virtual time.
    now: SysTime,
    /// The alarm (tickless mode).
    alarm: Option<SysTime>,
    /// The reason passed to `halt`.
    halt_reason: Option<&'static str>,
}

impl SchedState {
    fn new() -> Self {
        Self {
            cpu_thread: None,
            masked: true,
            in_isr: false,
            pending: VecDeque::new(),
            now: 0,
            alarm: None,
            halt_reason: None,
        }
    }
}

impl ums::Scheduler for SchedState {
    fn choose_next_thread(&mut self) -> Option<ums::ThreadId> {
        self.cpu_thread
    }
}

/// Returned by [`State::port_boot`] when the simulated system halts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemHalted {
    /// The reason passed to [`System::halt`].
    pub reason: &'static str,
}

impl fmt::Display for SystemHalted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "the system has halted: {}", self.reason)
    }
}

impl std::error::Error for SystemHalted {}

#[allow(clippy::missing_safety_doc)]
impl State {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            thread_group: OnceCell::new(),
            origin: AtomicRef::new(None),
        }
    }

    fn thread_group(&self) -> &ums::ThreadGroup<SchedState> {
        match self.thread_group.get() {
            Some(thread_group) => thread_group,
            None => panic!("the port is not running"),
        }
    }

    fn sched(&self) -> ums::ThreadGroupLockGuard<'_, SchedState> {
        self.thread_group().lock()
    }

    /// Start the simulated processor and boot the kernel.
    ///
    /// Returns `Ok(())` when the shutdown initiated by [`shutdown`]
    /// completes, or `Err(_)` if the system halted. A panic in a kernel
    /// thread or an interrupt handler is propagated to the caller.
    pub fn port_boot<Traits: PortInstance>(&'static self) -> Result<(), SystemHalted> {
        let (thread_group, join_handle) = ums::ThreadGroup::new(SchedState::new());

        if self.thread_group.set(thread_group).is_err() {
            panic!("the simulated system can only be booted once");
        }

        // Create the initial worker thread, where the kernel boots and which
        // becomes the idle thread afterwards
        let mut lock = self.sched();
        let thread_id = lock.spawn(|_| {
            THREAD_ROLE.with(|role| role.set(ThreadRole::Boot));
            log::debug!("booting the kernel");

            System::<Traits>::init();

            Traits::port_state().idle_loop::<Traits>();
        });
        log::trace!("startup thread = {thread_id:?}");
        lock.scheduler().cpu_thread = Some(thread_id);
        lock.preempt();
        drop(lock);

        // Wait until the thread group shuts down. Propagate any panic that
        // occured in a worker thread.
        if let Err(e) = join_handle.join() {
            std::panic::resume_unwind(e);
        }

        match self.sched().scheduler().halt_reason {
            Some(reason) => Err(SystemHalted { reason }),
            None => Ok(()),
        }
    }

    /// The idle thread. The virtual time only advances here.
    fn idle_loop<Traits: PortInstance>(&'static self) -> ! {
        log::trace!("entering the idle loop");
        loop {
            let handler = {
                let mut lock = self.sched();
                let sched = lock.scheduler();
                if let Some(handler) = sched.pending.pop_front() {
                    Some(handler)
                } else if Traits::ST_TIMEDELTA == 0 {
                    sched.now = sched.now.wrapping_add(1);
                    Some(timer_isr::<Traits> as fn())
                } else if let Some(alarm) = sched.alarm {
                    log::trace!("advancing the time from {} to {alarm}", sched.now);
                    sched.now = alarm;
                    Some(timer_isr::<Traits> as fn())
                } else {
                    None
                }
            };

            match handler {
                Some(handler) => self.run_isr::<Traits>(handler),
                None => {
                    // Nothing will happen until an external thread pends an
                    // interrupt
                    log::trace!("idle: waiting for an interrupt");
                    thread::park();
                }
            }
        }
    }

    /// Run an interrupt handler on the current host thread, then let the
    /// kernel switch to a thread it readied.
    fn run_isr<Traits: PortInstance>(&'static self, handler: fn()) {
        log::trace!("taking an interrupt");
        self.sched().scheduler().in_isr = true;

        // Safety: We are simulating an interrupt entry
        unsafe { Traits::irq_prologue() };
        handler();
        // Safety: Ditto
        unsafe { Traits::irq_epilogue() };

        self.sched().scheduler().in_isr = false;
        log::trace!("returning from an interrupt");

        // Safety: Back in a thread context with the interrupts unmasked
        unsafe { Traits::preempt() };
    }

    /// Take the pended interrupts if they aren't masked.
    fn take_pending_interrupts<Traits: PortInstance>(&'static self) {
        loop {
            let handler = {
                let mut lock = self.sched();
                let sched = lock.scheduler();
                if sched.masked || sched.in_isr {
                    return;
                }
                match sched.pending.pop_front() {
                    Some(handler) => handler,
                    None => return,
                }
            };
            self.run_isr::<Traits>(handler);
        }
    }

    fn set_masked(&self, masked: bool) {
        self.sched().scheduler().masked = masked;
    }

    pub unsafe fn port_init<Traits: PortInstance>(&self) {
        log::trace!("port_init");
        assert_eq!(expect_worker_thread(), ThreadRole::Boot);
    }

    pub unsafe fn setup_context<Traits: PortInstance>(
        &self,
        thread: &'static ThreadCb<Traits>,
        config: &'static ThreadConfig,
    ) {
        // The host thread uses the host's default stack size
        log::trace!(
            "setup_context({:?}, stack_size = {})",
            config.name,
            config.stack_size
        );

        let mut tsm = thread.port_thread_state.tsm.lock();
        match *tsm {
            Tsm::Uninit => *tsm = Tsm::Dormant,
            Tsm::Dormant => {}
            Tsm::Running(_) => panic!("restarting a thread is not supported"),
        }
    }

    pub unsafe fn switch<Traits: PortInstance>(
        &'static self,
        new: &'static ThreadCb<Traits>,
        old: &'static ThreadCb<Traits>,
    ) {
        let new_index = new.index();
        log::trace!("switch({} -> {new_index})", old.index());

        let current = match ums::current_thread() {
            Some(thread_id) => thread_id,
            None => panic!("`switch` was called from an unknown thread"),
        };

        let mut lock = self.sched();

        {
            // The boot thread becomes the idle thread when it's switched away
            // from for the first time
            let mut tsm = old.port_thread_state.tsm.lock();
            if *tsm == Tsm::Uninit {
                *tsm = Tsm::Running(current);
            }
        }

        let next = {
            let mut tsm = new.port_thread_state.tsm.lock();
            match *tsm {
                Tsm::Running(thread_id) => thread_id,
                Tsm::Dormant => {
                    // Spawn a worker thread for this kernel thread
                    let thread_id = lock.spawn(move |_| {
                        THREAD_ROLE.with(|role| role.set(ThreadRole::Thread));

                        let thread = match Thread::<Traits>::from_index(new_index) {
                            Some(thread) => thread,
                            None => unreachable!(),
                        };
                        log::debug!("thread {:?} is now running", thread.name());

                        // Safety: We are a port, this is the first code of the
                        //         thread, and `switch` left the lock held
                        unsafe { Traits::thread_start(thread.cb()) };
                    });
                    log::trace!("spawned {thread_id:?} for thread {new_index}");

                    *tsm = Tsm::Running(thread_id);
                    thread_id
                }
                Tsm::Uninit => panic!("switching to thread {new_index}, which is not set up"),
            }
        };

        lock.scheduler().cpu_thread = Some(next);
        drop(lock);

        // Returns when the kernel switches back to `old`
        ums::yield_now();
    }

    pub unsafe fn lock<Traits: PortInstance>(&self) {
        log::trace!("lock");
        expect_worker_thread();
        self.set_masked(true);
    }

    pub unsafe fn unlock<Traits: PortInstance>(&'static self) {
        log::trace!("unlock");
        expect_worker_thread();
        self.set_masked(false);
        self.take_pending_interrupts::<Traits>();
    }

    pub unsafe fn lock_from_isr<Traits: PortInstance>(&self) {
        self.set_masked(true);
    }

    pub unsafe fn unlock_from_isr<Traits: PortInstance>(&self) {
        // Interrupts don't nest
        self.set_masked(false);
    }

    pub unsafe fn disable<Traits: PortInstance>(&self) {
        self.set_masked(true);
    }

    pub unsafe fn enable<Traits: PortInstance>(&'static self) {
        self.set_masked(false);
        self.take_pending_interrupts::<Traits>();
    }

    pub fn is_irq_enabled<Traits: PortInstance>(&self) -> bool {
        !self.sched().scheduler().masked
    }

    pub fn is_isr_context<Traits: PortInstance>(&self) -> bool {
        self.sched().scheduler().in_isr
    }

    pub unsafe fn halt<Traits: PortInstance>(&self, reason: &'static str) -> ! {
        log::error!("the system has halted: {reason}");

        if ums::current_thread().is_none() {
            panic!("the system has halted outside of the simulator: {reason}");
        }

        let mut lock = self.sched();
        lock.scheduler().halt_reason = Some(reason);
        lock.shutdown();
        drop(lock);

        ums::park_forever()
    }

    pub fn timer_get_time<Traits: PortInstance>(&self) -> SysTime {
        self.sched().scheduler().now
    }

    pub unsafe fn timer_set_alarm<Traits: PortInstance>(&self, time: SysTime) {
        log::trace!("timer_set_alarm({time})");
        self.sched().scheduler().alarm = Some(time);
    }

    pub unsafe fn timer_stop_alarm<Traits: PortInstance>(&self) {
        log::trace!("timer_stop_alarm");
        self.sched().scheduler().alarm = None;
    }

    pub fn timer_get_alarm<Traits: PortInstance>(&self) -> SysTime {
        let mut lock = self.sched();
        let sched = lock.scheduler();
        sched.alarm.unwrap_or(sched.now)
    }

    /// The realtime counter counts microseconds of the host's monotonic
    /// clock.
    pub fn rt_counter_value<Traits: PortInstance>(&self) -> RtCnt {
        let origin = if let Some(x) = self.origin.load(Ordering::Acquire) {
            x
        } else {
            // Establish an origin point.
            let origin = Box::leak(Box::new(Instant::now()));

            // Store `origin` to `self.origin`. If it's already initialized at
            // this point, discard `origin` and use the existing one.
            match self.origin.compare_exchange(
                None,
                Some(origin),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => origin,
                Err(Some(x)) => x,
                Err(None) => unreachable!(),
            }
        };

        let micros = Instant::now().duration_since(*origin).as_micros();

        /// Implementation of <https://xkcd.com/221/> with a different magic
        /// number
        fn get_random_number() -> RtCnt {
            0x00c0ffee
        }

        // Truncate the upper bits. Add some random number so that the kernel
        // doesn't depend on zero-start.
        (micros as RtCnt).wrapping_add(get_random_number())
    }
}

fn timer_isr<Traits: PortInstance>() {
    // Safety: We are in an interrupt handler
    unsafe { Traits::timer_handler() };
}

/// Assert that the current thread is a worker thread.
fn expect_worker_thread() -> ThreadRole {
    let role = THREAD_ROLE.with(|r| r.get());
    assert_ne!(role, ThreadRole::Unknown);
    role
}

/// Initiate graceful shutdown. [`State::port_boot`] returns `Ok(())`.
///
/// Must be called from a kernel thread or an interrupt handler, which never
/// runs again.
///
/// Note: There is no safe way to restart the simulated system without
/// restarting an entire process.
pub fn shutdown<Traits: PortInstance>() -> ! {
    log::debug!("shutdown");
    expect_worker_thread();

    Traits::port_state().sched().shutdown();

    ums::park_forever()
}

/// Pend a software interrupt whose handler is `handler`.
///
/// This can be called from any thread. When called from a kernel thread, the
/// interrupt is taken at once if the interrupts are unmasked, or as soon as
/// they are unmasked otherwise. When called from an external thread, the
/// interrupt is taken when the running kernel thread unmasks the interrupts
/// next time, or at once if the system is idle.
pub fn pend_interrupt<Traits: PortInstance>(handler: fn()) {
    let state = Traits::port_state();
    let mut lock = state.sched();
    lock.scheduler().pending.push_back(handler);

    if THREAD_ROLE.with(|r| r.get()) == ThreadRole::Unknown {
        log::trace!("external-pend_interrupt");
        // Wake up the idle thread if it's waiting
        lock.preempt();
    } else {
        log::trace!("pend_interrupt");
        drop(lock);
        state.take_pending_interrupts::<Traits>();
    }
}

/// Instantiate the port. Declares the "system" type `$SystemTraits`, which
/// must be passed to [`nil_kernel::build!`], and a `main` function that boots
/// the system.
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $SystemTraits:ident) => {
        $vis struct $SystemTraits;

        mod port_std_impl {
            use super::$SystemTraits;
            use $crate::nil_kernel::{
                PortThreading, PortTimer, RtCnt, SysTime, ThreadCb, ThreadConfig,
            };
            use $crate::{PortInstance, State, ThreadState};

            pub(super) static PORT_STATE: State = State::new();

            unsafe impl PortInstance for $SystemTraits {
                #[inline]
                fn port_state() -> &'static State {
                    &PORT_STATE
                }
            }

            // Assume `$SystemTraits: KernelTraits`
            unsafe impl PortThreading for $SystemTraits {
                type PortThreadState = ThreadState;

                unsafe fn port_init() {
                    unsafe { PORT_STATE.port_init::<Self>() }
                }

                unsafe fn setup_context(
                    thread: &'static ThreadCb<Self>,
                    config: &'static ThreadConfig,
                ) {
                    unsafe { PORT_STATE.setup_context::<Self>(thread, config) }
                }

                unsafe fn switch(new: &'static ThreadCb<Self>, old: &'static ThreadCb<Self>) {
                    unsafe { PORT_STATE.switch::<Self>(new, old) }
                }

                unsafe fn lock() {
                    unsafe { PORT_STATE.lock::<Self>() }
                }

                unsafe fn unlock() {
                    unsafe { PORT_STATE.unlock::<Self>() }
                }

                unsafe fn lock_from_isr() {
                    unsafe { PORT_STATE.lock_from_isr::<Self>() }
                }

                unsafe fn unlock_from_isr() {
                    unsafe { PORT_STATE.unlock_from_isr::<Self>() }
                }

                unsafe fn disable() {
                    unsafe { PORT_STATE.disable::<Self>() }
                }

                unsafe fn suspend() {
                    unsafe { PORT_STATE.disable::<Self>() }
                }

                unsafe fn enable() {
                    unsafe { PORT_STATE.enable::<Self>() }
                }

                fn is_irq_enabled() -> bool {
                    PORT_STATE.is_irq_enabled::<Self>()
                }

                fn is_isr_context() -> bool {
                    PORT_STATE.is_isr_context::<Self>()
                }

                unsafe fn halt(reason: &'static str) -> ! {
                    unsafe { PORT_STATE.halt::<Self>(reason) }
                }
            }

            unsafe impl PortTimer for $SystemTraits {
                fn timer_get_time() -> SysTime {
                    PORT_STATE.timer_get_time::<Self>()
                }

                unsafe fn timer_start_alarm(time: SysTime) {
                    unsafe { PORT_STATE.timer_set_alarm::<Self>(time) }
                }

                unsafe fn timer_set_alarm(time: SysTime) {
                    unsafe { PORT_STATE.timer_set_alarm::<Self>(time) }
                }

                unsafe fn timer_stop_alarm() {
                    unsafe { PORT_STATE.timer_stop_alarm::<Self>() }
                }

                fn timer_get_alarm() -> SysTime {
                    PORT_STATE.timer_get_alarm::<Self>()
                }

                fn rt_counter_value() -> RtCnt {
                    PORT_STATE.rt_counter_value::<Self>()
                }
            }
        }

        #[allow(dead_code)]
        fn main() {
            $crate::env_logger::init();

            if let Err(e) = port_std_impl::PORT_STATE.port_boot::<$SystemTraits>() {
                panic!("{}", e);
            }
        }
    };
}
