//! Memory budget invariant types.
//!
//! A total budget in megabytes is split into a managed-heap portion and an
//! off-heap portion. The resulting [`HeapFlags`] are valid by construction:
//! both parts are at least 1 MB and together never exceed the budget.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::EngineError;

/// Prefix of the managed-heap flag, followed by the size and `M`.
pub const MANAGED_HEAP_FLAG: &str = "-J-Xmx";

/// Prefix of the off-heap flag, followed by the size in MB.
pub const OFF_HEAP_FLAG: &str = "--off-heap-ram=";

/// Validated total memory budget in megabytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryBudget(u32);

impl MemoryBudget {
    pub fn new(total_mb: i64) -> Result<Self, EngineError> {
        if total_mb <= 0 {
            return Err(EngineError::invalid_configuration(format!(
                "memory budget must be a positive number of megabytes, got {total_mb}"
            )));
        }
        u32::try_from(total_mb).map(Self).map_err(|_| {
            EngineError::invalid_configuration(format!(
                "memory budget of {total_mb} MB exceeds the supported maximum of {} MB",
                u32::MAX
            ))
        })
    }

    #[must_use]
    pub const fn as_mb(self) -> u32 {
        self.0
    }
}

/// How a budget is divided between the managed heap and off-heap buffers.
///
/// The engine's accepted split is only known at one point (8192 MB gives
/// 4096/4096), so the ratio is an explicit constant rather than a formula
/// inferred from the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RamPolicy {
    managed_percent: u8,
}

impl Default for RamPolicy {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl RamPolicy {
    /// Half the budget to the managed heap, the remainder off-heap.
    pub const DEFAULT: Self = Self {
        managed_percent: 50,
    };

    pub fn new(managed_percent: u8) -> Result<Self, EngineError> {
        if !(1..=99).contains(&managed_percent) {
            return Err(EngineError::invalid_configuration(format!(
                "managed heap share must be between 1 and 99 percent, got {managed_percent}"
            )));
        }
        Ok(Self { managed_percent })
    }

    #[must_use]
    pub const fn managed_percent(self) -> u8 {
        self.managed_percent
    }

    /// Split a raw megabyte count. Non-positive input is rejected.
    pub fn resolve(self, total_mb: i64) -> Result<HeapFlags, EngineError> {
        self.split(MemoryBudget::new(total_mb)?)
    }

    pub fn split(self, budget: MemoryBudget) -> Result<HeapFlags, EngineError> {
        let total = u64::from(budget.as_mb());
        let managed = total * u64::from(self.managed_percent) / 100;
        let off_heap = total - managed;
        if managed == 0 || off_heap == 0 {
            return Err(EngineError::invalid_configuration(format!(
                "memory budget of {total} MB is too small to give both the managed heap and \
                 the off-heap region at least 1 MB"
            )));
        }
        Ok(HeapFlags {
            managed_mb: managed as u32,
            off_heap_mb: off_heap as u32,
        })
    }
}

/// Convert a total budget into heap flags using [`RamPolicy::DEFAULT`].
pub fn resolve_ram(total_mb: i64) -> Result<HeapFlags, EngineError> {
    RamPolicy::DEFAULT.resolve(total_mb)
}

/// The two heap-size arguments, managed heap first.
///
/// The order is part of the contract: argument construction appends
/// [`HeapFlags::as_args`] verbatim to the engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapFlags {
    managed_mb: u32,
    off_heap_mb: u32,
}

impl HeapFlags {
    #[must_use]
    pub const fn managed_mb(self) -> u32 {
        self.managed_mb
    }

    #[must_use]
    pub const fn off_heap_mb(self) -> u32 {
        self.off_heap_mb
    }

    #[must_use]
    pub fn managed_flag(self) -> String {
        format!("{MANAGED_HEAP_FLAG}{}M", self.managed_mb)
    }

    #[must_use]
    pub fn off_heap_flag(self) -> String {
        format!("{OFF_HEAP_FLAG}{}", self.off_heap_mb)
    }

    #[must_use]
    pub fn as_args(self) -> [String; 2] {
        [self.managed_flag(), self.off_heap_flag()]
    }

    #[must_use]
    pub fn into_args(self) -> Vec<String> {
        self.as_args().into()
    }
}

impl fmt::Display for HeapFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.managed_flag(), self.off_heap_flag())
    }
}

impl Serialize for HeapFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_args().serialize(serializer)
    }
}
