//! Static configuration mechanism for the kernel
use crate::{time::SysInterval, PortThreading, State, ThreadCb};

/// The static properties of a thread. One entry of the thread table passed to
/// [`build!`].
#[derive(Debug, Clone, Copy)]
pub struct ThreadConfig {
    /// The thread's name.
    pub name: &'static str,
    /// The entry point of the thread. Returning from it halts the system.
    pub entry: fn(usize),
    /// The parameter passed to `entry`.
    pub arg: usize,
    /// The stack size in bytes. Zero selects the port's default.
    pub stack_size: usize,
}

impl ThreadConfig {
    /// Construct a `ThreadConfig` with the port's default stack size.
    pub const fn new(name: &'static str, entry: fn(usize), arg: usize) -> Self {
        Self {
            name,
            entry,
            arg,
            stack_size: 0,
        }
    }

    /// Override the stack size.
    pub const fn with_stack_size(self, stack_size: usize) -> Self {
        Self { stack_size, ..self }
    }
}

/// Application hooks called by the kernel at specific points. All of them are
/// optional.
#[derive(Clone, Copy)]
pub struct KernelHooks {
    /// Called by [`System::init`](crate::System::init) before anything else.
    pub system_init: Option<fn()>,
    /// Called by [`System::init`](crate::System::init) for each thread after
    /// its context is set up. Receives the thread's index.
    pub thread_init: Option<fn(usize)>,
    /// Called with the lock held when the scheduler selects the idle thread.
    pub idle_enter: Option<fn()>,
    /// Called with the lock held when the idle thread is preempted.
    pub idle_leave: Option<fn()>,
    /// Called by [`System::halt`](crate::System::halt) with interrupts
    /// disabled.
    pub system_halt: Option<fn(&'static str)>,
}

impl KernelHooks {
    /// No hooks.
    pub const NONE: Self = Self {
        system_init: None,
        thread_init: None,
        idle_enter: None,
        idle_leave: None,
        system_halt: None,
    };
}

/// Attach a static configuration to a "system" type.
///
/// ```ignore
/// nil_kernel::build!(
///     SystemTraits,
///     frequency: 1000,
///     time_delta: 0,
///     threads: [
///         ThreadConfig::new("blinker", blinker, 0),
///         ThreadConfig::new("worker", worker, 42).with_stack_size(4096),
///     ],
///     hooks: KernelHooks {
///         idle_enter: Some(idle_enter),
///         ..KernelHooks::NONE
///     },
/// );
/// ```
///
///  - `frequency` is the tick frequency in Hz.
///  - `time_delta` selects the timer mode. Zero selects the periodic tick
///    mode; any other value selects the tickless mode, and is the minimum
///    distance between the current time and a programmed alarm. `1` is
///    rejected.
///  - `threads` is the thread table, highest priority first. The idle thread
///    is added implicitly at the end.
///  - `hooks` is optional and defaults to [`KernelHooks::NONE`].
#[macro_export]
macro_rules! build {
    (
        $sys:ty,
        frequency: $frequency:expr,
        time_delta: $time_delta:expr,
        threads: $threads:expr
        $(, hooks: $hooks:expr )?
        $(,)?
    ) => {
        const _: () = {
            use $crate::{KernelCfg, KernelHooks, State, ThreadCb, ThreadConfig};

            const THREAD_CONFIGS: &[ThreadConfig] = &$threads;

            const _: () = assert!($frequency > 0, "the tick frequency must not be zero");
            const _: () = assert!($time_delta != 1, "a time delta of 1 is not supported");

            static STATE: State<$sys> = $crate::utils::Init::INIT;

            #[allow(clippy::declare_interior_mutable_const)]
            const THREAD_CB_INIT: ThreadCb<$sys> = $crate::utils::Init::INIT;

            static THREAD_CB_POOL: [ThreadCb<$sys>; THREAD_CONFIGS.len() + 1] =
                [THREAD_CB_INIT; THREAD_CONFIGS.len() + 1];

            // Safety: We are `build!`, so it's okay to `impl` this
            unsafe impl KernelCfg for $sys {
                const ST_FREQUENCY: u32 = $frequency;
                const ST_TIMEDELTA: $crate::SysInterval = $time_delta;
                const HOOKS: KernelHooks = $crate::build!(@hooks $( $hooks )?);
                const THREAD_CONFIGS: &'static [ThreadConfig] = THREAD_CONFIGS;

                #[inline(always)]
                fn state() -> &'static State<Self> {
                    &STATE
                }

                #[inline(always)]
                fn thread_cb_pool() -> &'static [ThreadCb<Self>] {
                    &THREAD_CB_POOL
                }
            }
        };
    };

    (@hooks) => { $crate::KernelHooks::NONE };
    (@hooks $hooks:expr) => { $hooks };
}

/// Associates "system" types with kernel-private data. Use [`build!`] to
/// implement.
///
/// # Safety
///
/// This is only intended to be implemented by `build!`.
pub unsafe trait KernelCfg: PortThreading {
    /// The tick frequency in Hz.
    const ST_FREQUENCY: u32;

    /// The minimum alarm distance of the tickless mode, or zero for the
    /// periodic tick mode.
    const ST_TIMEDELTA: SysInterval;

    /// The application hooks.
    const HOOKS: KernelHooks;

    #[doc(hidden)]
    const THREAD_CONFIGS: &'static [ThreadConfig];

    /// The number of threads, excluding the idle thread. The idle thread's
    /// index is `NUM_THREADS`.
    const NUM_THREADS: usize = Self::THREAD_CONFIGS.len();

    /// Access the kernel's global state.
    fn state() -> &'static State<Self>;

    // `ThreadCb` includes interior mutability and can't be referred to by
    // `const`
    #[doc(hidden)]
    fn thread_cb_pool() -> &'static [ThreadCb<Self>];
}
