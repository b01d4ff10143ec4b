//! Type-safe probe identifiers.
//!
//! Probe ids are dense per class; the newtype keeps them apart from node
//! indices and label ids, which are small integers too.

/// Dense probe index within one class, in `[0, probe_count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(u32);

impl ProbeId {
    /// Create a new probe ID
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the inner value
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Index into a probe array
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Hands out probe ids in visiting order
///
/// One generator is shared by all methods of a class so ids stay dense
/// across the whole class.
#[derive(Debug, Default)]
pub struct ProbeIdGenerator {
    next: u32,
}

impl ProbeIdGenerator {
    /// Start at id 0
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Allocate the next id
    pub fn next_id(&mut self) -> ProbeId {
        let id = ProbeId::new(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far
    #[must_use]
    pub const fn count(&self) -> u32 {
        self.next
    }
}
