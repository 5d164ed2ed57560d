//! System state checker and debug assertions
//!
//! The checker tracks the interrupt nesting and the kernel lock with two
//! counters in [`State`](crate::State) and halts the system with an `SV#n`
//! code when a lock primitive or a kernel function is used from the wrong
//! context. It's only active with the `state_check` feature (and in unit
//! tests).
use core::sync::atomic::Ordering;

use crate::{KernelTraits, System};

/// Halt with `reason` unless `cond` holds. Checks the parameters of a kernel
/// function; compiled only with the `checks` feature (and in unit tests).
macro_rules! dbg_check {
    ($Traits:ty, $cond:expr, $reason:expr) => {
        if cfg!(any(test, feature = "checks")) && !$cond {
            $crate::System::<$Traits>::halt($reason);
        }
    };
}

/// Halt with `reason` unless `cond` holds. Checks an internal invariant;
/// compiled only with the `asserts` feature (and in unit tests).
macro_rules! dbg_assert {
    ($Traits:ty, $cond:expr, $reason:expr) => {
        if cfg!(any(test, feature = "asserts")) && !$cond {
            $crate::System::<$Traits>::halt($reason);
        }
    };
}

#[inline]
fn counters<Traits: KernelTraits>() -> (i32, i32) {
    let state = Traits::state();
    (
        state.isr_cnt.load(Ordering::Relaxed),
        state.lock_cnt.load(Ordering::Relaxed),
    )
}

#[inline]
fn set_lock_cnt<Traits: KernelTraits>(value: i32) {
    Traits::state().lock_cnt.store(value, Ordering::Relaxed);
}

#[inline]
fn halt_if<Traits: KernelTraits>(cond: bool, reason: &'static str) {
    if cond {
        System::<Traits>::halt(reason);
    }
}

pub(crate) fn check_disable<Traits: KernelTraits>() {
    if cfg!(any(test, feature = "state_check")) {
        let (isr, lock) = counters::<Traits>();
        halt_if::<Traits>(isr != 0 || lock != 0, "SV#1");
    }
}

pub(crate) fn check_suspend<Traits: KernelTraits>() {
    if cfg!(any(test, feature = "state_check")) {
        let (isr, lock) = counters::<Traits>();
        halt_if::<Traits>(isr != 0 || lock != 0, "SV#2");
    }
}

pub(crate) fn check_enable<Traits: KernelTraits>() {
    if cfg!(any(test, feature = "state_check")) {
        let (isr, lock) = counters::<Traits>();
        halt_if::<Traits>(isr != 0 || lock != 0, "SV#3");
    }
}

pub(crate) fn check_lock<Traits: KernelTraits>() {
    if cfg!(any(test, feature = "state_check")) {
        let (isr, lock) = counters::<Traits>();
        halt_if::<Traits>(isr != 0 || lock != 0, "SV#4");
        set_lock_cnt::<Traits>(1);
    }
}

pub(crate) fn check_unlock<Traits: KernelTraits>() {
    if cfg!(any(test, feature = "state_check")) {
        let (isr, lock) = counters::<Traits>();
        halt_if::<Traits>(isr != 0 || lock <= 0, "SV#5");
        set_lock_cnt::<Traits>(0);
    }
}

pub(crate) fn check_lock_from_isr<Traits: KernelTraits>() {
    if cfg!(any(test, feature = "state_check")) {
        let (isr, lock) = counters::<Traits>();
        halt_if::<Traits>(isr <= 0 || lock != 0, "SV#6");
        set_lock_cnt::<Traits>(1);
    }
}

pub(crate) fn check_unlock_from_isr<Traits: KernelTraits>() {
    if cfg!(any(test, feature = "state_check")) {
        let (isr, lock) = counters::<Traits>();
        halt_if::<Traits>(isr <= 0 || lock <= 0, "SV#7");
        set_lock_cnt::<Traits>(0);
    }
}

/// Called by [`PortToKernel::irq_prologue`](crate::PortToKernel::irq_prologue).
pub(crate) fn check_enter_isr<Traits: KernelTraits>() {
    if cfg!(any(test, feature = "state_check")) {
        // Safety: Brackets the counter update, we are in an ISR
        unsafe { Traits::lock_from_isr() };
        let (isr, lock) = counters::<Traits>();
        halt_if::<Traits>(isr < 0 || lock != 0, "SV#8");
        Traits::state().isr_cnt.store(isr + 1, Ordering::Relaxed);
        unsafe { Traits::unlock_from_isr() };
    }
}

/// Called by [`PortToKernel::irq_epilogue`](crate::PortToKernel::irq_epilogue).
pub(crate) fn check_leave_isr<Traits: KernelTraits>() {
    if cfg!(any(test, feature = "state_check")) {
        // Safety: Brackets the counter update, we are in an ISR
        unsafe { Traits::lock_from_isr() };
        let (isr, lock) = counters::<Traits>();
        halt_if::<Traits>(isr <= 0 || lock != 0, "SV#9");
        Traits::state().isr_cnt.store(isr - 1, Ordering::Relaxed);
        unsafe { Traits::unlock_from_isr() };
    }
}

/// I-class functions must be called with the lock held, from any context.
pub(crate) fn check_class_i<Traits: KernelTraits>() {
    if cfg!(any(test, feature = "state_check")) {
        let (isr, lock) = counters::<Traits>();
        halt_if::<Traits>(isr < 0 || lock <= 0, "SV#10");
    }
}

/// S-class functions must be called with the lock held, from a thread.
pub(crate) fn check_class_s<Traits: KernelTraits>() {
    if cfg!(any(test, feature = "state_check")) {
        let (isr, lock) = counters::<Traits>();
        halt_if::<Traits>(isr != 0 || lock <= 0, "SV#11");
    }
}

/// Set the lock counter directly. Used by `init`, which enters the locked
/// state through `suspend` rather than `lock`.
pub(crate) fn force_lock_cnt<Traits: KernelTraits>(value: i32) {
    if cfg!(any(test, feature = "state_check")) {
        set_lock_cnt::<Traits>(value);
    }
}
