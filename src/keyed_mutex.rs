//! Keyed-mutex contract shared by the device backends and the image
//! state machine.
//!
//! A keyed mutex is bound to a shared texture. Acquire and release are
//! matched by integer key: whoever releases key `k` hands the texture to
//! whoever next acquires key `k`. The handoff protocol only ever uses
//! two keys, so ownership ping-pongs between the application and the
//! compositor.

use std::fmt;
use std::time::Duration;

use crate::error::HandoffResult;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexKey(u64);

impl MutexKey {
    /// Released by the compositor once it has finished reading; acquired
    /// by the application before drawing.
    pub const APPLICATION: Self = Self(0);

    /// Released by the application once its writes are complete; acquired
    /// by the compositor before reading.
    pub const COMPOSITOR: Self = Self(1);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for MutexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AcquireTimeout {
    #[default]
    Infinite,
    Finite(Duration),
}

impl AcquireTimeout {
    /// Millisecond form used by DXGI, where `u32::MAX` means `INFINITE`.
    /// Finite waits are clamped just below that sentinel.
    pub fn as_millis_u32(self) -> u32 {
        match self {
            Self::Infinite => u32::MAX,
            Self::Finite(duration) => {
                u32::try_from(duration.as_millis()).map_or(u32::MAX - 1, |ms| ms.min(u32::MAX - 1))
            }
        }
    }

    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::Finite(duration) => Some(duration),
        }
    }
}

/// GPU-level mutual exclusion keyed by integer values.
///
/// Implementations must be cheap to clone: the cross-API present path
/// moves a clone onto the compositor's thread inside the acquire/release
/// callbacks.
pub trait KeyedMutex: Clone + Send + Sync + 'static {
    /// Blocks until `key` has been released by the other side, or the
    /// timeout expires (`HandoffError::Timeout`).
    fn acquire(&self, key: MutexKey, timeout: AcquireTimeout) -> HandoffResult<()>;

    /// Hands ownership to whoever next acquires `key`.
    fn release(&self, key: MutexKey) -> HandoffResult<()>;
}
