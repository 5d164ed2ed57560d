//! Threads
use core::{fmt, hash, marker::PhantomData, mem::size_of, ptr};

use crate::{
    klock::{SysLockCell, SysLockGuard, SysLockTokenRefMut},
    queue::ThreadsQueue,
    thread_ref::ThreadReference,
    time::{time_diff_x, SysInterval, SysTime},
    utils::Init,
    EventMask, KernelTraits, Msg, PortThreading, System, ThreadConfig,
};

/// *Thread control block* - the state data of a thread.
///
/// The kernel owns a table of `N + 1` thread control blocks, one for each
/// entry of the thread table passed to [`build!`] plus the idle thread. The
/// position in the table is the thread's priority: a lower index means a
/// higher priority.
#[repr(C)]
pub struct ThreadCb<Traits: PortThreading> {
    /// The port's context record of the thread.
    ///
    /// This is guaranteed to be placed at the beginning of the struct so that
    /// assembler code can refer to this easily.
    pub port_thread_state: Traits::PortThreadState,

    /// The thread state and the data associated with it.
    pub(crate) st: SysLockCell<Traits, ThreadSt<Traits>>,

    /// The remaining timeout, in ticks. Zero means no timeout is armed.
    ///
    /// In the tickless mode, the value is relative to `State::lasttime`.
    pub(crate) timeout: SysLockCell<Traits, SysInterval>,

    /// Pending events.
    pub(crate) epmask: SysLockCell<Traits, EventMask>,
}

impl<Traits: PortThreading> Init for ThreadCb<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        port_thread_state: Init::INIT,
        st: Init::INIT,
        timeout: Init::INIT,
        epmask: Init::INIT,
    };
}

impl<Traits: KernelTraits> fmt::Debug for ThreadCb<Traits>
where
    Traits::PortThreadState: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ThreadCb")
            .field("self", &(self as *const _))
            .field("port_thread_state", &self.port_thread_state)
            .field("st", &self.st)
            .field("timeout", &self.timeout)
            .field("epmask", &self.epmask)
            .finish()
    }
}

impl<Traits: KernelTraits> ThreadCb<Traits> {
    /// Get the position of `self` in the thread table.
    pub fn index(&'static self) -> usize {
        let pool = Traits::thread_cb_pool();
        let offset = (self as *const Self as usize).wrapping_sub(pool.as_ptr() as usize);
        let index = offset / size_of::<Self>();
        dbg_check!(Traits, index < pool.len(), "index");
        index
    }

    /// Get the static configuration of the thread.
    pub fn config(&'static self) -> &'static ThreadConfig {
        Thread::<Traits>::from_index_unchecked(self.index()).config()
    }
}

/// The configuration entry reported for the idle thread, which has no entry
/// in the thread table.
static IDLE_CONFIG: ThreadConfig = ThreadConfig::new("idle", idle_entry, 0);

fn idle_entry(_: usize) {}

/// The thread state with the data associated with it.
pub(crate) enum ThreadSt<Traits: 'static> {
    /// Ready to run. Carries the message delivered on wakeup.
    Ready(Msg),
    /// Sleeping for a time.
    Sleeping,
    /// Suspended on a thread reference.
    Suspended(&'static ThreadReference<Traits>),
    /// Waiting on a threads queue (or a semaphore).
    WaitingQueue(&'static ThreadsQueue<Traits>),
    /// Waiting for any of the events in the mask.
    WaitingEvents(EventMask),
}

impl<Traits> Clone for ThreadSt<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits> Copy for ThreadSt<Traits> {}

impl<Traits> Init for ThreadSt<Traits> {
    const INIT: Self = Self::Ready(Msg::OK);
}

impl<Traits> fmt::Debug for ThreadSt<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ready(msg) => f.debug_tuple("Ready").field(msg).finish(),
            Self::Sleeping => f.write_str("Sleeping"),
            Self::Suspended(r) => f.debug_tuple("Suspended").field(&(*r as *const _)).finish(),
            Self::WaitingQueue(q) => f
                .debug_tuple("WaitingQueue")
                .field(&(*q as *const _))
                .finish(),
            Self::WaitingEvents(mask) => f
                .debug_tuple("WaitingEvents")
                .field(&format_args!("{:#x}", mask))
                .finish(),
        }
    }
}

impl<Traits> ThreadSt<Traits> {
    #[inline]
    pub(crate) fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    #[inline]
    pub(crate) fn is_waiting_on(&self, queue: &ThreadsQueue<Traits>) -> bool {
        matches!(self, Self::WaitingQueue(q) if ptr::eq(*q, queue))
    }

    /// The message stored by the last wakeup.
    #[inline]
    pub(crate) fn wakeup_msg(&self) -> Msg {
        match self {
            Self::Ready(msg) => *msg,
            _ => Msg::OK,
        }
    }

    pub(crate) fn public(&self) -> ThreadState {
        match self {
            Self::Ready(_) => ThreadState::Ready,
            Self::Sleeping => ThreadState::Sleeping,
            Self::Suspended(_) => ThreadState::Suspended,
            Self::WaitingQueue(_) => ThreadState::WaitingQueue,
            Self::WaitingEvents(_) => ThreadState::WaitingEvents,
        }
    }
}

/// The observable state of a thread.
///
#[doc = svgbobdoc::transform!(
/// ```svgbob
///                    .-------.
///    .-------------->| Ready |<----------------.
///    |               '-------'                 |
///    | "ready_i"         |                     | "timeout"
///    | "resume_i"        | "sleep" "wait"      |
///    | "signal_i"        | "suspend"           |
///    |                   v                     |
///    |   .-------------------------------.     |
///    '---| Sleeping      Suspended       |-----'
///        | WaitingQueue  WaitingEvents   |
///        '-------------------------------'
/// ```
)]
///
/// A thread only leaves `Ready` by putting itself to sleep. It returns to
/// `Ready` when it's woken up by another thread or an interrupt handler, or
/// when its timeout expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// The thread is ready to run (this includes the running thread).
    Ready,
    /// The thread is sleeping.
    Sleeping,
    /// The thread is suspended on a [`ThreadReference`].
    Suspended,
    /// The thread is waiting on a [`ThreadsQueue`] or a
    /// [`Semaphore`](crate::Semaphore).
    WaitingQueue,
    /// The thread is waiting for events.
    WaitingEvents,
}

/// Represents a single thread in a system.
pub struct Thread<Traits>(usize, PhantomData<Traits>);

impl<Traits> Clone for Thread<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits> Copy for Thread<Traits> {}

impl<Traits> PartialEq for Thread<Traits> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<Traits> Eq for Thread<Traits> {}

impl<Traits> hash::Hash for Thread<Traits> {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<Traits> fmt::Debug for Thread<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Thread").field(&self.0).finish()
    }
}

impl<Traits> Thread<Traits> {
    #[inline]
    pub(crate) const fn from_index_unchecked(index: usize) -> Self {
        Self(index, PhantomData)
    }

    /// Get the position of the thread in the thread table, which is also its
    /// priority (lower is higher).
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl<Traits: KernelTraits> Thread<Traits> {
    /// Construct a `Thread` from a thread table index. The index of the idle
    /// thread is accepted.
    pub fn from_index(index: usize) -> Option<Self> {
        if index <= Traits::NUM_THREADS {
            Some(Self::from_index_unchecked(index))
        } else {
            None
        }
    }

    /// Get the idle thread.
    #[inline]
    pub fn idle() -> Self {
        Self::from_index_unchecked(Traits::NUM_THREADS)
    }

    /// Get a flag indicating whether this is the idle thread.
    #[inline]
    pub fn is_idle(self) -> bool {
        self.0 == Traits::NUM_THREADS
    }

    /// Get the thread's static configuration.
    pub fn config(self) -> &'static ThreadConfig {
        Traits::THREAD_CONFIGS.get(self.0).unwrap_or(&IDLE_CONFIG)
    }

    /// Get the thread's name.
    #[inline]
    pub fn name(self) -> &'static str {
        self.config().name
    }

    /// Get the thread's control block.
    #[inline]
    pub fn cb(self) -> &'static ThreadCb<Traits> {
        &Traits::thread_cb_pool()[self.0]
    }

    /// Get the thread's current state.
    pub fn state_i(self, lock: SysLockTokenRefMut<'_, Traits>) -> ThreadState {
        self.cb().st.read(&*lock).public()
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Get the running thread.
    ///
    /// This is the interrupted thread when called from an interrupt handler.
    #[inline]
    pub fn get_self_x() -> Thread<Traits> {
        Thread::from_index_unchecked(Traits::state().current_index())
    }

    /// Put the calling thread to sleep for `timeout` ticks.
    /// [`TIME_INFINITE`](crate::TIME_INFINITE) sleeps until another thread or
    /// an interrupt handler wakes it with [`System::ready_i`].
    pub fn sleep(timeout: SysInterval) {
        let mut lock = Self::lock();
        Self::sleep_s(&mut lock, timeout);
    }

    /// [`System::sleep`] with the lock already held.
    #[inline]
    pub fn sleep_s(lock: &mut SysLockGuard<Traits>, timeout: SysInterval) {
        Self::go_sleep_timeout_s(lock, timeout);
    }

    /// Put the calling thread to sleep until the system time reaches
    /// `abstime`.
    ///
    /// The interval is `abstime - now` with wrapping arithmetic, so an
    /// `abstime` equal to the current time sleeps forever, and an `abstime`
    /// in the recent past sleeps for almost a whole counter period.
    pub fn sleep_until(abstime: SysTime) {
        let mut lock = Self::lock();
        Self::sleep_until_s(&mut lock, abstime);
    }

    /// [`System::sleep_until`] with the lock already held.
    pub fn sleep_until_s(lock: &mut SysLockGuard<Traits>, abstime: SysTime) {
        Self::sleep_s(lock, time_diff_x(Self::get_system_time_x(), abstime));
    }

    /// Sleep for `secs` seconds.
    #[inline]
    pub fn sleep_seconds(secs: u32) {
        Self::sleep(Self::s2i(secs));
    }

    /// Sleep for `msecs` milliseconds.
    #[inline]
    pub fn sleep_milliseconds(msecs: u32) {
        Self::sleep(Self::ms2i(msecs));
    }

    /// Sleep for `usecs` microseconds.
    #[inline]
    pub fn sleep_microseconds(usecs: u32) {
        Self::sleep(Self::us2i(usecs));
    }
}
