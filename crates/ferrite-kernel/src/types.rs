use core::fmt;
use core::num::NonZeroU32;

/// Scheduling priority. Larger values run first.
pub type Priority = i32;

/// The lowest priority a thread can have.
pub const PRIORITY_MINIMUM: Priority = 0;
/// The highest priority a thread can have.
pub const PRIORITY_MAXIMUM: Priority = 7;
/// The priority of a newly created thread.
pub const PRIORITY_DEFAULT: Priority = 1;

/// Thread identifier
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ThreadHandle(NonZeroU32);

impl ThreadHandle {
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    pub fn val(&self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ThreadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
        pub struct $name(u32);

        impl $name {
            pub fn new(id: u32) -> Self {
                Self(id)
            }

            pub fn val(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Wait queue identifier inside the scheduler's arena
    QueueId,
    "Q"
);
id_type!(
    /// Lock identifier
    LockId,
    "L"
);
id_type!(
    /// Condition variable identifier
    ConditionId,
    "C"
);
