/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Immutable dense set of CPU ids.
//!
//! [`CpuSet`] is the currency every other module trades in: the topology
//! hands one out, the placement policy produces one per container, the
//! checkpoint persists them, and the cgroup writer renders them into the
//! kernel list format.
//!
//! The canonical string form is the kernel cpulist syntax: ascending,
//! comma-separated, with maximal runs collapsed into ranges
//! (`0-3,7`).  An empty set renders as the empty string.  Parsing accepts
//! exactly the same syntax.
//!
//! All operations that would mutate the set return a new value instead;
//! a `CpuSet` never changes after construction.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

// ── Error type ────────────────────────────────────────────────────────────────

/// A token of a cpulist string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid cpu list entry '{token}'")]
pub struct ParseCpuSetError {
    token: String,
}

// ── CpuSet ────────────────────────────────────────────────────────────────────

/// Ordered set of non-negative CPU ids.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CpuSet {
    cpus: BTreeSet<usize>,
}

impl CpuSet {
    /// The empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of CPUs in the set.
    pub fn size(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub fn contains(&self, cpu: usize) -> bool {
        self.cpus.contains(&cpu)
    }

    /// Set union, as a new value.
    pub fn union(&self, other: &CpuSet) -> CpuSet {
        self.cpus.union(&other.cpus).copied().collect()
    }

    /// Set intersection, as a new value.
    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        self.cpus.intersection(&other.cpus).copied().collect()
    }

    /// CPUs in `self` that are not in `other`, as a new value.
    pub fn difference(&self, other: &CpuSet) -> CpuSet {
        self.cpus.difference(&other.cpus).copied().collect()
    }

    pub fn is_subset_of(&self, other: &CpuSet) -> bool {
        self.cpus.is_subset(&other.cpus)
    }

    /// Iterate the CPU ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.cpus.iter().copied()
    }

    /// The CPU ids as an ascending `Vec`.
    pub fn to_vec(&self) -> Vec<usize> {
        self.cpus.iter().copied().collect()
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        CpuSet {
            cpus: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[usize; N]> for CpuSet {
    fn from(cpus: [usize; N]) -> Self {
        cpus.into_iter().collect()
    }
}

// ── Canonical string form ─────────────────────────────────────────────────────

impl fmt::Display for CpuSet {
    /// Kernel cpulist syntax: `0-3,7`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut cpus = self.cpus.iter().copied().peekable();
        while let Some(start) = cpus.next() {
            let mut end = start;
            while let Some(&next) = cpus.peek() {
                if next != end + 1 {
                    break;
                }
                end = next;
                cpus.next();
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for CpuSet {
    type Err = ParseCpuSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(CpuSet::new());
        }

        let invalid = |token: &str| ParseCpuSetError {
            token: token.to_string(),
        };

        let mut cpus = BTreeSet::new();
        for token in s.split(',') {
            match token.split_once('-') {
                Some((lo, hi)) => {
                    let lo: usize = lo.trim().parse().map_err(|_| invalid(token))?;
                    let hi: usize = hi.trim().parse().map_err(|_| invalid(token))?;
                    if lo > hi {
                        return Err(invalid(token));
                    }
                    cpus.extend(lo..=hi);
                }
                None => {
                    let cpu: usize = token.trim().parse().map_err(|_| invalid(token))?;
                    cpus.insert(cpu);
                }
            }
        }
        Ok(CpuSet { cpus })
    }
}

impl Serialize for CpuSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CpuSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_renders_as_empty_string() {
        assert_eq!(CpuSet::new().to_string(), "");
    }

    #[test]
    fn single_cpu_renders_without_range() {
        assert_eq!(CpuSet::from([5]).to_string(), "5");
    }

    #[test]
    fn consecutive_cpus_collapse_into_a_range() {
        assert_eq!(CpuSet::from([0, 1, 2, 3]).to_string(), "0-3");
    }

    #[test]
    fn mixed_runs_and_singletons_render_canonically() {
        assert_eq!(CpuSet::from([0, 1, 2, 3, 7]).to_string(), "0-3,7");
        assert_eq!(CpuSet::from([1, 3, 5]).to_string(), "1,3,5");
        assert_eq!(CpuSet::from([0, 1, 4, 5, 6, 9]).to_string(), "0-1,4-6,9");
    }

    #[test]
    fn parse_accepts_ranges_and_singletons() {
        let set: CpuSet = "0-3,7".parse().unwrap();
        assert_eq!(set, CpuSet::from([0, 1, 2, 3, 7]));
    }

    #[test]
    fn parse_empty_string_is_empty_set() {
        let set: CpuSet = "".parse().unwrap();
        assert!(set.is_empty());
        let set: CpuSet = "  ".parse().unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn parse_rejects_garbage_and_inverted_ranges() {
        assert!("abc".parse::<CpuSet>().is_err());
        assert!("3-1".parse::<CpuSet>().is_err());
        assert!("1,,2".parse::<CpuSet>().is_err());
    }

    #[test]
    fn display_parse_round_trip() {
        let set = CpuSet::from([0, 2, 3, 4, 8, 10, 11]);
        let round: CpuSet = set.to_string().parse().unwrap();
        assert_eq!(round, set);
    }

    #[test]
    fn union_intersection_difference() {
        let a = CpuSet::from([0, 1, 2]);
        let b = CpuSet::from([2, 3]);

        assert_eq!(a.union(&b), CpuSet::from([0, 1, 2, 3]));
        assert_eq!(a.intersection(&b), CpuSet::from([2]));
        assert_eq!(a.difference(&b), CpuSet::from([0, 1]));
        // operands are untouched
        assert_eq!(a.size(), 3);
        assert_eq!(b.size(), 2);
    }

    #[test]
    fn subset_relation() {
        let pool = CpuSet::from([0, 1, 2, 3]);
        assert!(CpuSet::from([1, 3]).is_subset_of(&pool));
        assert!(CpuSet::new().is_subset_of(&pool));
        assert!(!CpuSet::from([1, 4]).is_subset_of(&pool));
    }

    #[test]
    fn iteration_is_ascending() {
        let set = CpuSet::from([9, 1, 4]);
        assert_eq!(set.to_vec(), vec![1, 4, 9]);
    }

    #[test]
    fn serde_uses_canonical_string() {
        let set = CpuSet::from([1, 3]);
        let yaml = serde_yaml::to_string(&set).unwrap();
        assert_eq!(yaml.trim(), "1,3");
        let back: CpuSet = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, set);
    }
}
