//! Wakeup messages and the error codes carried by them
use core::fmt;

/// The message delivered to a thread when it leaves a sleeping or waiting
/// state.
///
/// The kernel reserves [`Msg::OK`], [`Msg::TIMEOUT`], and [`Msg::RESET`].
/// Any other value can be passed through [`ThreadReference::resume`] or
/// [`System::ready_i`].
///
/// [`ThreadReference::resume`]: crate::ThreadReference::resume
/// [`System::ready_i`]: crate::System::ready_i
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Msg(pub i32);

impl Msg {
    /// Normal wakeup.
    pub const OK: Self = Self(0);
    /// The wait timed out.
    pub const TIMEOUT: Self = Self(ResultCode::Timeout as i32);
    /// The object being waited for was reset.
    pub const RESET: Self = Self(ResultCode::Reset as i32);

    /// Get the error represented by `self`, if it's one of the reserved
    /// error codes.
    #[inline]
    pub const fn error(self) -> Option<WakeupError> {
        match self.0 {
            x if x == ResultCode::Timeout as i32 => Some(WakeupError::Timeout),
            x if x == ResultCode::Reset as i32 => Some(WakeupError::Reset),
            _ => None,
        }
    }

    /// Convert `self` to `Result`, mapping the reserved error codes to `Err`.
    #[inline]
    pub const fn into_result(self) -> Result<Self, WakeupError> {
        match self.error() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

impl fmt::Debug for Msg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::OK => f.write_str("OK"),
            Self::TIMEOUT => f.write_str("TIMEOUT"),
            Self::RESET => f.write_str("RESET"),
            Self(x) => f.debug_tuple("Msg").field(&x).finish(),
        }
    }
}

/// All the error codes a kernel operation can produce.
#[repr(i8)]
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub(crate) enum ResultCode {
    Timeout = -1,
    Reset = -2,
}

macro_rules! define_suberror {
    (
        $( #[doc $( $doc:tt )*] )*
        $( #[into( $Supererror:path )] )*
        $vis:vis enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        $( #[doc $( $doc )*] )*
        #[repr(i8)]
        #[derive(PartialEq, Eq, Copy, Clone)]
        $vis enum $Name {
            $( $Variant = ResultCode::$Variant as _ ),*
        }

        impl fmt::Debug for $Name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match *self {
                    $( Self::$Variant => fmt::Debug::fmt(&ResultCode::$Variant, f) ),*
                }
            }
        }

        impl From<$Name> for Msg {
            #[inline]
            fn from(x: $Name) -> Self {
                Self(x as i32)
            }
        }

        define_suberror! {
            @into
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    (
        @into
        #[into( $Supererror0:path )]
        $( #[into( $Supererror:path )] )*
        enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        impl From<$Name> for $Supererror0 {
            #[inline]
            fn from(x: $Name) -> Self {
                match x {
                    $( $Name::$Variant => Self::$Variant ),*
                }
            }
        }

        define_suberror! {
            @into
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    ( @into enum $($_:tt)* ) => {};
}

define_suberror! {
    /// The reason a wait ended without a normal wakeup.
    pub enum WakeupError {
        Timeout,
        Reset,
    }
}

define_suberror! {
    /// `Timeout`. Produced by waits that can't be reset, e.g., sleeping,
    /// suspension, and event waits.
    #[into(WakeupError)]
    pub enum TimeoutError {
        Timeout,
    }
}

impl TryFrom<WakeupError> for TimeoutError {
    type Error = WakeupError;

    #[inline]
    fn try_from(x: WakeupError) -> Result<Self, Self::Error> {
        match x {
            WakeupError::Timeout => Ok(Self::Timeout),
            e => Err(e),
        }
    }
}
