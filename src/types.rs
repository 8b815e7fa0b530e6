use core::cell::UnsafeCell;
use derive_more::{Deref, DerefMut, Display, From};
use indexmap::IndexSet as _IndexSet;
use rustc_hash::FxBuildHasher;
use std::collections::{HashMap as _HashMap, HashSet as _HashSet};

/// A minimal `UnsafeCell` wrapper that is `Sync` when `T: Send`.
///
/// Used for job bodies: the deque hands every job to exactly one worker, so
/// the slot is never touched by two threads at once. The value only has to
/// be movable between threads.
#[derive(Debug, Deref, DerefMut)]
#[repr(transparent)]
pub(crate) struct SyncUnsafeCell<T>(UnsafeCell<T>);

unsafe impl<T: Send> Sync for SyncUnsafeCell<T> {}

impl<T> SyncUnsafeCell<T> {
    pub(crate) fn new(val: T) -> Self {
        Self(UnsafeCell::new(val))
    }
}

/// Dense identifier of a job inside one frame graph.
///
/// Assigned in declaration order, starting at zero.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("job#{_0}")]
pub struct JobId(u32);

impl JobId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(u32::try_from(index).expect("JobId::from_index: index exceeds u32"))
    }

    /// Position of the job in declaration order.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Logical handle to a piece of state whose concurrent access is arbitrated
/// by the scheduler (a component array, a render target, ...).
///
/// The scheduler never dereferences it; it only compares ids.
#[derive(Debug, Display, From, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("res:{_0:#x}")]
pub struct ResourceId(u64);

impl ResourceId {
    /// Wrap a raw id chosen by the caller.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Derive an id from a stable name (FNV-1a).
    ///
    /// The same name always yields the same id, across runs and platforms.
    #[must_use]
    pub const fn named(name: &str) -> Self {
        const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;
        let bytes = name.as_bytes();
        let mut hash = OFFSET;
        let mut i = 0;
        while i < bytes.len() {
            hash ^= bytes[i] as u64;
            hash = hash.wrapping_mul(PRIME);
            i += 1;
        }
        Self(hash)
    }

    /// The raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Identifier of a fence scope opened with `GraphBuilder::scope`.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("scope#{_0}")]
pub struct ScopeId(pub(crate) u32);

pub(crate) type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
pub(crate) type HashSet<T> = _HashSet<T, FxBuildHasher>;
pub(crate) type IndexSet<T> = _IndexSet<T, FxBuildHasher>;
