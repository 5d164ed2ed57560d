use core::{
    fmt, slice, str,
    sync::atomic::{AtomicI32, AtomicPtr, AtomicU32, AtomicUsize, Ordering},
};

use crate::{
    klock::SysLockCell,
    time::SysTime,
    utils::Init,
    KernelTraits,
};

/// Global kernel state.
pub struct State<Traits> {
    /// The index of the running thread.
    ///
    /// Written only with the lock held. An atomic so that it can be read
    /// from any context (by [`System::get_self_x`]).
    ///
    /// [`System::get_self_x`]: crate::System::get_self_x
    pub(crate) current: AtomicUsize,

    /// The index of the thread to run next. Equal to `current` unless a
    /// reschedule is pending.
    pub(crate) next: SysLockCell<Traits, usize>,

    /// The system time (periodic tick mode only).
    pub(crate) systime: AtomicU32,

    /// The time of the last alarm (tickless mode only).
    pub(crate) lasttime: SysLockCell<Traits, SysTime>,

    /// The time the alarm is programmed for (tickless mode only). Equal to
    /// `lasttime` when no alarm is programmed.
    pub(crate) nexttime: SysLockCell<Traits, SysTime>,

    /// The interrupt nesting counter of the state checker.
    pub(crate) isr_cnt: AtomicI32,

    /// The lock counter of the state checker.
    pub(crate) lock_cnt: AtomicI32,

    panic_msg_ptr: AtomicPtr<u8>,
    panic_msg_len: AtomicUsize,
}

impl<Traits> Init for State<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        current: Init::INIT,
        next: Init::INIT,
        systime: Init::INIT,
        lasttime: Init::INIT,
        nexttime: Init::INIT,
        isr_cnt: Init::INIT,
        lock_cnt: Init::INIT,
        panic_msg_ptr: Init::INIT,
        panic_msg_len: Init::INIT,
    };
}

impl<Traits: KernelTraits> fmt::Debug for State<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("State")
            .field("current", &self.current_index())
            .field("next", &self.next)
            .field("systime", &self.systime)
            .field("lasttime", &self.lasttime)
            .field("nexttime", &self.nexttime)
            .field("isr_cnt", &self.isr_cnt)
            .field("lock_cnt", &self.lock_cnt)
            .field("panic_msg", &self.panic_msg())
            .finish()
    }
}

impl<Traits> State<Traits> {
    /// Get the index of the running thread.
    #[inline]
    pub fn current_index(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_current(&self, index: usize) {
        self.current.store(index, Ordering::Relaxed);
    }

    /// Get the reason passed to [`System::halt`], if the system has halted.
    ///
    /// [`System::halt`]: crate::System::halt
    pub fn panic_msg(&self) -> Option<&'static str> {
        let ptr = self.panic_msg_ptr.load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        let len = self.panic_msg_len.load(Ordering::Relaxed);

        // Safety: `ptr` and `len` were taken from a `&'static str` by
        //         `set_panic_msg`, which publishes `len` first
        Some(unsafe { str::from_utf8_unchecked(slice::from_raw_parts(ptr, len)) })
    }

    pub(crate) fn set_panic_msg(&self, reason: &'static str) {
        self.panic_msg_len.store(reason.len(), Ordering::Relaxed);
        self.panic_msg_ptr
            .store(reason.as_ptr() as *mut u8, Ordering::Release);
    }
}
