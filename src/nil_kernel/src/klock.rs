//! Kernel lock mechanism
//!
//! Every piece of mutable kernel state is stored in a [`SysLockCell`], which
//! can only be accessed with a token that exists while the kernel lock is
//! held. The two guard types mirror the two ways of taking the lock:
//! [`SysLockGuard`] from a thread and [`IsrLockGuard`] from an interrupt
//! handler.
use core::{fmt, ops};
use tokenlock::UnsyncTokenLock;

use crate::{dbg, utils::Init, KernelTraits, System};

#[doc(hidden)]
pub struct SysLockTag<Traits>(Traits);

/// The key that "unlocks" [`SysLockCell`].
pub(crate) type SysLockToken<Traits> = tokenlock::UnsyncSingletonToken<SysLockTag<Traits>>;

/// The keyhole type for [`UnsyncTokenLock`] that can be "unlocked" by
/// [`SysLockToken`].
pub(crate) type SysLockKeyhole<Traits> = tokenlock::SingletonTokenId<SysLockTag<Traits>>;

/// Borrowed form of the kernel lock, accepted by every I-class function.
///
/// Both [`SysLockGuard`] and [`IsrLockGuard`] lend one through their
/// `borrow_mut` method. Unlike `&mut _`, this is not reborrowed
/// automatically when passed to a function; call
/// [`borrow_mut`](tokenlock::UnsyncSingletonTokenRefMut::borrow_mut) to keep
/// using it afterwards.
pub type SysLockTokenRefMut<'a, Traits> =
    tokenlock::UnsyncSingletonTokenRefMut<'a, SysLockTag<Traits>>;

/// Cell type that can be accessed by [`SysLockToken`].
pub(crate) struct SysLockCell<Traits, T: ?Sized>(UnsyncTokenLock<T, SysLockKeyhole<Traits>>);

impl<Traits, T> SysLockCell<Traits, T> {
    pub(crate) const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(SysLockKeyhole::INIT, x))
    }
}

impl<Traits, T: Init> Init for SysLockCell<Traits, T> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self(Init::INIT);
}

impl<Traits, T: ?Sized> ops::Deref for SysLockCell<Traits, T> {
    type Target = UnsyncTokenLock<T, SysLockKeyhole<Traits>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<Traits, T: ?Sized> ops::DerefMut for SysLockCell<Traits, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<Traits: KernelTraits, T: fmt::Debug> fmt::Debug for SysLockCell<Traits, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(lock) = try_lock::<Traits>() {
            f.write_str("SysLockCell(")?;
            self.0.read(&*lock).fmt(f)?;
            f.write_str(")")
        } else {
            f.write_str("SysLockCell(< locked >)")
        }
    }
}

/// Enter the kernel lock from a thread context (`chSysLock`).
///
/// Halts with `SV#4` if called from an interrupt handler or with the lock
/// already held.
pub(crate) fn lock<Traits: KernelTraits>() -> SysLockGuard<Traits> {
    if Traits::is_isr_context() || !Traits::is_irq_enabled() {
        System::<Traits>::halt("SV#4");
    }

    // Safety: The lock is inactive and we are in a thread context
    unsafe { Traits::lock() };
    dbg::check_lock::<Traits>();

    // Safety: We just entered the lock, so no other guard exists
    unsafe { assume_sys_lock() }
}

/// Enter the kernel lock from an interrupt handler (`chSysLockFromISR`).
///
/// Halts with `SV#6` if called from a thread context or with the lock
/// already held.
pub(crate) fn lock_from_isr<Traits: KernelTraits>() -> IsrLockGuard<Traits> {
    if !Traits::is_isr_context() || !Traits::is_irq_enabled() {
        System::<Traits>::halt("SV#6");
    }

    // Safety: The lock is inactive and we are in an ISR
    unsafe { Traits::lock_from_isr() };
    dbg::check_lock_from_isr::<Traits>();

    // Safety: We just entered the lock, so no other guard exists
    unsafe { assume_isr_lock() }
}

/// Take the lock from a thread context if that's possible without halting.
fn try_lock<Traits: KernelTraits>() -> Option<SysLockGuard<Traits>> {
    if Traits::is_isr_context() || !Traits::is_irq_enabled() {
        None
    } else {
        Some(lock())
    }
}

/// Assume the kernel lock is held by the current thread and get
/// [`SysLockGuard`].
///
/// # Safety
///
/// The system must really be in the locked state, and there must be no other
/// instance of `SysLockGuard` or [`IsrLockGuard`] at the point of the call.
pub(crate) unsafe fn assume_sys_lock<Traits: KernelTraits>() -> SysLockGuard<Traits> {
    debug_assert!(!Traits::is_irq_enabled());

    SysLockGuard {
        // Safety: There are no other instances of `SysLockToken`; this is
        //         upheld by the caller.
        token: unsafe { SysLockToken::new_unchecked() },
    }
}

/// Assume the kernel lock is held by the current interrupt handler and get
/// [`IsrLockGuard`].
///
/// # Safety
///
/// See [`assume_sys_lock`].
pub(crate) unsafe fn assume_isr_lock<Traits: KernelTraits>() -> IsrLockGuard<Traits> {
    debug_assert!(!Traits::is_irq_enabled());

    IsrLockGuard {
        // Safety: Upheld by the caller
        token: unsafe { SysLockToken::new_unchecked() },
    }
}

/// RAII guard for the kernel lock taken from a thread context. Obtained by
/// [`System::lock`]. Dropping it leaves the lock (`chSysUnlock`).
///
/// S-class functions, which may put the calling thread to sleep, accept only
/// this guard.
pub struct SysLockGuard<Traits: KernelTraits> {
    token: SysLockToken<Traits>,
}

impl<Traits: KernelTraits> SysLockGuard<Traits> {
    /// Construct a [`SysLockTokenRefMut`] by borrowing `self`.
    #[inline]
    pub fn borrow_mut(&mut self) -> SysLockTokenRefMut<'_, Traits> {
        self.token.borrow_mut()
    }
}

impl<Traits: KernelTraits> Drop for SysLockGuard<Traits> {
    #[inline]
    fn drop(&mut self) {
        dbg::check_unlock::<Traits>();

        // Safety: The lock is active, and it's us (the kernel) who are
        //         currently controlling it
        unsafe { Traits::unlock() };
    }
}

impl<Traits: KernelTraits> ops::Deref for SysLockGuard<Traits> {
    type Target = SysLockToken<Traits>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<Traits: KernelTraits> ops::DerefMut for SysLockGuard<Traits> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

impl<Traits: KernelTraits> fmt::Debug for SysLockGuard<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("SysLockGuard")
    }
}

/// RAII guard for the kernel lock taken from an interrupt handler. Obtained
/// by [`System::lock_from_isr`]. Dropping it leaves the lock
/// (`chSysUnlockFromISR`).
pub struct IsrLockGuard<Traits: KernelTraits> {
    token: SysLockToken<Traits>,
}

impl<Traits: KernelTraits> IsrLockGuard<Traits> {
    /// Construct a [`SysLockTokenRefMut`] by borrowing `self`.
    #[inline]
    pub fn borrow_mut(&mut self) -> SysLockTokenRefMut<'_, Traits> {
        self.token.borrow_mut()
    }

    /// Leave the lock and immediately take it again, giving interrupts of a
    /// higher priority a chance to run.
    ///
    /// Taking `&mut self` ensures no borrowed [`SysLockTokenRefMut`] outlives
    /// the window.
    pub(crate) fn flash(&mut self) {
        dbg::check_unlock_from_isr::<Traits>();
        // Safety: The lock is active and we are in an ISR
        unsafe {
            Traits::unlock_from_isr();
            Traits::lock_from_isr();
        }
        dbg::check_lock_from_isr::<Traits>();
    }
}

impl<Traits: KernelTraits> Drop for IsrLockGuard<Traits> {
    #[inline]
    fn drop(&mut self) {
        dbg::check_unlock_from_isr::<Traits>();

        // Safety: The lock is active and we are in an ISR
        unsafe { Traits::unlock_from_isr() };
    }
}

impl<Traits: KernelTraits> ops::Deref for IsrLockGuard<Traits> {
    type Target = SysLockToken<Traits>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<Traits: KernelTraits> ops::DerefMut for IsrLockGuard<Traits> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

impl<Traits: KernelTraits> fmt::Debug for IsrLockGuard<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("IsrLockGuard")
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Enter the kernel lock from a thread context.
    #[inline]
    pub fn lock() -> SysLockGuard<Traits> {
        lock()
    }

    /// Enter the kernel lock from an interrupt handler.
    #[inline]
    pub fn lock_from_isr() -> IsrLockGuard<Traits> {
        lock_from_isr()
    }
}

