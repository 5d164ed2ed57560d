//! System time, intervals, and the conversions between ticks and real time
//!
//! All arithmetic on [`SysTime`] is wrapping. A point in time is only
//! meaningful relative to another point less than one counter period away.
use crate::{KernelTraits, System};

/// An absolute point of the system time, measured in ticks.
pub type SysTime = u32;

/// A time interval, measured in ticks.
pub type SysInterval = u32;

/// The value of the port's free-running realtime counter.
pub type RtCnt = u32;

/// Intermediate type for the time conversions.
type TimeConv = u64;

/// Special timeout value: do not wait at all.
pub const TIME_IMMEDIATE: SysInterval = SysInterval::MAX;

/// Special timeout value: wait forever.
pub const TIME_INFINITE: SysInterval = 0;

/// The maximum finite interval.
pub const TIME_MAX_INTERVAL: SysInterval = SysInterval::MAX - 1;

/// The maximum system time.
pub const TIME_MAX_SYSTIME: SysTime = SysTime::MAX;

/// Add an interval to a point in time.
#[inline]
pub const fn time_add_x(systime: SysTime, interval: SysInterval) -> SysTime {
    systime.wrapping_add(interval)
}

/// Get the interval between two points in time.
#[inline]
pub const fn time_diff_x(start: SysTime, end: SysTime) -> SysInterval {
    end.wrapping_sub(start)
}

/// Check if `time` lies in the half-open window `[start, end)`. The window
/// may cross the wrap-around point of the counter.
#[inline]
pub const fn time_is_in_range_x(time: SysTime, start: SysTime, end: SysTime) -> bool {
    time.wrapping_sub(start) < end.wrapping_sub(start)
}

/// Convert seconds to ticks at the tick frequency `freq`.
#[inline]
pub const fn s2i(freq: u32, secs: u32) -> SysInterval {
    (secs as TimeConv * freq as TimeConv) as SysInterval
}

/// Convert milliseconds to ticks, rounding up.
#[inline]
pub const fn ms2i(freq: u32, msecs: u32) -> SysInterval {
    ((msecs as TimeConv * freq as TimeConv + 999) / 1000) as SysInterval
}

/// Convert microseconds to ticks, rounding up.
#[inline]
pub const fn us2i(freq: u32, usecs: u32) -> SysInterval {
    ((usecs as TimeConv * freq as TimeConv + 999_999) / 1_000_000) as SysInterval
}

/// Convert ticks to seconds, rounding up.
#[inline]
pub const fn i2s(freq: u32, interval: SysInterval) -> u32 {
    ((interval as TimeConv + freq as TimeConv - 1) / freq as TimeConv) as u32
}

/// Convert ticks to milliseconds, rounding up.
#[inline]
pub const fn i2ms(freq: u32, interval: SysInterval) -> u32 {
    ((interval as TimeConv * 1000 + freq as TimeConv - 1) / freq as TimeConv) as u32
}

/// Convert ticks to microseconds, rounding up.
#[inline]
pub const fn i2us(freq: u32, interval: SysInterval) -> u32 {
    ((interval as TimeConv * 1_000_000 + freq as TimeConv - 1) / freq as TimeConv) as u32
}

impl<Traits: KernelTraits> System<Traits> {
    /// Get the current system time.
    ///
    /// In the periodic tick mode, this is the counter maintained by the tick
    /// handler. In the tickless mode, this is read from the port's timer.
    #[inline]
    pub fn get_system_time_x() -> SysTime {
        if Traits::ST_TIMEDELTA == 0 {
            Traits::state().systime.load(core::sync::atomic::Ordering::Relaxed)
        } else {
            Traits::timer_get_time()
        }
    }

    /// Get the time elapsed since `start`.
    #[inline]
    pub fn time_elapsed_since_x(start: SysTime) -> SysInterval {
        time_diff_x(start, Self::get_system_time_x())
    }

    /// [`s2i`] at the configured tick frequency.
    #[inline]
    pub const fn s2i(secs: u32) -> SysInterval {
        s2i(Traits::ST_FREQUENCY, secs)
    }

    /// [`ms2i`] at the configured tick frequency.
    #[inline]
    pub const fn ms2i(msecs: u32) -> SysInterval {
        ms2i(Traits::ST_FREQUENCY, msecs)
    }

    /// [`us2i`] at the configured tick frequency.
    #[inline]
    pub const fn us2i(usecs: u32) -> SysInterval {
        us2i(Traits::ST_FREQUENCY, usecs)
    }

    /// [`i2s`] at the configured tick frequency.
    #[inline]
    pub const fn i2s(interval: SysInterval) -> u32 {
        i2s(Traits::ST_FREQUENCY, interval)
    }

    /// [`i2ms`] at the configured tick frequency.
    #[inline]
    pub const fn i2ms(interval: SysInterval) -> u32 {
        i2ms(Traits::ST_FREQUENCY, interval)
    }

    /// [`i2us`] at the configured tick frequency.
    #[inline]
    pub const fn i2us(interval: SysInterval) -> u32 {
        i2us(Traits::ST_FREQUENCY, interval)
    }
}
