#![allow(clippy::declare_interior_mutable_const)]
use core::{marker::PhantomData, sync::atomic};

/// Trait for types having a constant default value. This is essentially a
/// constant version of `Default`.
pub trait Init {
    /// The default value.
    const INIT: Self;
}

impl<T> Init for Option<T> {
    const INIT: Self = None;
}

impl<T: ?Sized> Init for PhantomData<T> {
    const INIT: Self = PhantomData;
}

impl<T> Init for atomic::AtomicPtr<T> {
    const INIT: Self = Self::new(core::ptr::null_mut());
}

impl<T: Init, I: Init> Init for tokenlock::UnsyncTokenLock<T, I> {
    const INIT: Self = Self::new(I::INIT, T::INIT);
}

impl<Tag: ?Sized> Init for tokenlock::SingletonTokenId<Tag> {
    const INIT: Self = Self::new();
}

macro_rules! impl_init {
    (
        $(
            $( #[$meta:meta] )*
            $ty:ty => $value:expr,
        )*
    ) => {
        $(
            $( #[$meta] )*
            impl Init for $ty {
                const INIT: Self = $value;
            }
        )*
    };
}

impl_init! {
    bool => false,
    u8 => 0,
    u16 => 0,
    u32 => 0,
    u64 => 0,
    i8 => 0,
    i16 => 0,
    i32 => 0,
    i64 => 0,
    usize => 0,
    isize => 0,
    () => (),
    atomic::AtomicBool => atomic::AtomicBool::new(false),
    atomic::AtomicU32 => atomic::AtomicU32::new(0),
    atomic::AtomicI32 => atomic::AtomicI32::new(0),
    atomic::AtomicUsize => atomic::AtomicUsize::new(0),
}
