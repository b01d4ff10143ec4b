//! Fixed-length probe arrays shared with running code.
//!
//! Flag probes may race freely: a lost store of `true` is always followed by
//! another one, and flags never go back to `false` while code runs, so
//! `Relaxed` ordering is enough. Counter probes use `fetch_add`.

use crate::config::ProbeMode;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Probe storage of one class
#[derive(Debug)]
pub enum ProbeArray {
    /// One flag per probe
    Flags(Box<[AtomicBool]>),
    /// One saturating hit counter per probe
    Counts(Box<[AtomicU32]>),
}

impl ProbeArray {
    /// Zeroed array of the given length
    #[must_use]
    pub fn new(mode: ProbeMode, len: usize) -> Self {
        match mode {
            ProbeMode::Exists => Self::Flags((0..len).map(|_| AtomicBool::new(false)).collect()),
            ProbeMode::Count => Self::Counts((0..len).map(|_| AtomicU32::new(0)).collect()),
        }
    }

    /// Flag array with the given values
    #[must_use]
    pub fn from_flags(values: &[bool]) -> Self {
        Self::Flags(values.iter().map(|v| AtomicBool::new(*v)).collect())
    }

    /// Counter array with the given values
    #[must_use]
    pub fn from_counts(values: &[u32]) -> Self {
        Self::Counts(values.iter().map(|v| AtomicU32::new(*v)).collect())
    }

    /// Representation of this array
    #[must_use]
    pub const fn mode(&self) -> ProbeMode {
        match self {
            Self::Flags(_) => ProbeMode::Exists,
            Self::Counts(_) => ProbeMode::Count,
        }
    }

    /// Number of probes
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Flags(flags) => flags.len(),
            Self::Counts(counts) => counts.len(),
        }
    }

    /// Whether the array has no probes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record one execution of probe `index`; out-of-range ids are ignored
    pub fn hit(&self, index: usize) {
        match self {
            Self::Flags(flags) => {
                if let Some(flag) = flags.get(index) {
                    flag.store(true, Ordering::Relaxed);
                }
            }
            Self::Counts(counts) => {
                if let Some(count) = counts.get(index) {
                    let _ = count.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                        Some(c.saturating_add(1))
                    });
                }
            }
        }
    }

    /// Whether probe `index` fired at least once
    #[must_use]
    pub fn is_covered(&self, index: usize) -> bool {
        self.count(index) > 0
    }

    /// Hits of probe `index` (0 or 1 for flags)
    #[must_use]
    pub fn count(&self, index: usize) -> u32 {
        match self {
            Self::Flags(flags) => flags
                .get(index)
                .map_or(0, |f| u32::from(f.load(Ordering::Relaxed))),
            Self::Counts(counts) => counts.get(index).map_or(0, |c| c.load(Ordering::Relaxed)),
        }
    }

    /// Coverage snapshot, one entry per probe
    #[must_use]
    pub fn covered(&self) -> Vec<bool> {
        (0..self.len()).map(|i| self.is_covered(i)).collect()
    }

    /// Hit count snapshot, one entry per probe
    #[must_use]
    pub fn counts(&self) -> Vec<u32> {
        (0..self.len()).map(|i| self.count(i)).collect()
    }

    /// Whether any probe fired
    #[must_use]
    pub fn has_hits(&self) -> bool {
        (0..self.len()).any(|i| self.is_covered(i))
    }

    /// Zero every probe
    pub fn reset(&self) {
        match self {
            Self::Flags(flags) => flags.iter().for_each(|f| f.store(false, Ordering::Relaxed)),
            Self::Counts(counts) => counts.iter().for_each(|c| c.store(0, Ordering::Relaxed)),
        }
    }

    /// Combine `other` into this array
    ///
    /// Additive: flags OR, counts saturating sum. Subtractive: flags set in
    /// `other` are cleared, counts subtract with a floor of zero. Callers
    /// check that length and mode agree.
    pub fn merge(&self, other: &Self, additive: bool) {
        match (self, other) {
            (Self::Flags(mine), Self::Flags(theirs)) => {
                for (a, b) in mine.iter().zip(theirs.iter()) {
                    if b.load(Ordering::Relaxed) {
                        a.store(additive, Ordering::Relaxed);
                    }
                }
            }
            (Self::Counts(mine), Self::Counts(theirs)) => {
                for (a, b) in mine.iter().zip(theirs.iter()) {
                    let delta = b.load(Ordering::Relaxed);
                    let _ = a.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                        Some(if additive {
                            v.saturating_add(delta)
                        } else {
                            v.saturating_sub(delta)
                        })
                    });
                }
            }
            _ => {}
        }
    }

    /// Independent copy of the current values
    #[must_use]
    pub fn snapshot(&self) -> Self {
        match self {
            Self::Flags(_) => Self::from_flags(&self.covered()),
            Self::Counts(_) => Self::from_counts(&self.counts()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_flags_hit_and_reset() {
        let probes = ProbeArray::new(ProbeMode::Exists, 3);
        probes.hit(1);
        probes.hit(1);
        probes.hit(99);
        assert_eq!(probes.covered(), vec![false, true, false]);
        assert_eq!(probes.count(1), 1);
        probes.reset();
        assert!(!probes.has_hits());
    }

    #[test]
    fn test_counts_saturate() {
        let probes = ProbeArray::from_counts(&[u32::MAX, 0]);
        probes.hit(0);
        assert_eq!(probes.count(0), u32::MAX);
        let more = ProbeArray::from_counts(&[5, 5]);
        probes.merge(&more, true);
        assert_eq!(probes.counts(), vec![u32::MAX, 5]);
    }

    #[test]
    fn test_subtract_floors_at_zero() {
        let probes = ProbeArray::from_counts(&[3, 1]);
        probes.merge(&ProbeArray::from_counts(&[1, 4]), false);
        assert_eq!(probes.counts(), vec![2, 0]);
    }

    #[test]
    fn test_flag_merge() {
        let probes = ProbeArray::from_flags(&[true, false, false]);
        probes.merge(&ProbeArray::from_flags(&[false, true, false]), true);
        assert_eq!(probes.covered(), vec![true, true, false]);
        probes.merge(&ProbeArray::from_flags(&[true, false, false]), false);
        assert_eq!(probes.covered(), vec![false, true, false]);
    }

    #[test]
    fn test_concurrent_counting() {
        let probes = Arc::new(ProbeArray::new(ProbeMode::Count, 1));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let probes = Arc::clone(&probes);
                thread::spawn(move || (0..1000).for_each(|_| probes.hit(0)))
            })
            .collect();
        for handle in handles {
            assert!(handle.join().is_ok());
        }
        assert_eq!(probes.count(0), 8000);
    }
}
