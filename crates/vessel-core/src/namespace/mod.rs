//! Linux namespace management for container isolation.
//!
//! Maps the closed set of namespace kinds onto `CLONE_NEW*` flags and
//! provides the clone(2) based spawning used by every run strategy,
//! including the self re-exec bootstrap.

pub mod reexec;
pub mod spawn;
pub mod user;
pub mod uts;

use std::fmt;
use std::str::FromStr;

use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};
use vessel_common::error::{Result, VesselError};

/// A kernel isolation domain a new process can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// Hostname and domain name.
    Uts,
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Process IDs.
    Pid,
    /// Mount table.
    Mount,
    /// Network stack.
    Network,
    /// UID/GID mappings.
    User,
}

impl NamespaceKind {
    /// Every namespace kind, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Uts,
        Self::Ipc,
        Self::Pid,
        Self::Mount,
        Self::Network,
        Self::User,
    ];

    /// Returns the platform isolation flag for this kind.
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Network => CloneFlags::CLONE_NEWNET,
            Self::User => CloneFlags::CLONE_NEWUSER,
        }
    }

    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uts => "uts",
            Self::Ipc => "ipc",
            Self::Pid => "pid",
            Self::Mount => "mount",
            Self::Network => "network",
            Self::User => "user",
        };
        f.write_str(s)
    }
}

impl FromStr for NamespaceKind {
    type Err = VesselError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uts" => Ok(Self::Uts),
            "ipc" => Ok(Self::Ipc),
            "pid" => Ok(Self::Pid),
            "mount" | "mnt" => Ok(Self::Mount),
            "network" | "net" => Ok(Self::Network),
            "user" => Ok(Self::User),
            other => Err(VesselError::Config {
                message: format!("unknown namespace kind: {other}"),
            }),
        }
    }
}

/// A combination of namespace kinds, stored as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NamespaceSet(u8);

impl NamespaceSet {
    /// Returns the empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Adds a kind to the set.
    pub const fn insert(&mut self, kind: NamespaceKind) {
        self.0 |= kind.bit();
    }

    /// Returns a copy of the set with `kind` added.
    #[must_use]
    pub const fn with(mut self, kind: NamespaceKind) -> Self {
        self.insert(kind);
        self
    }

    /// Returns whether `kind` is in the set.
    #[must_use]
    pub const fn contains(self, kind: NamespaceKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Returns whether the set is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates over the members in declaration order.
    pub fn iter(self) -> impl Iterator<Item = NamespaceKind> {
        NamespaceKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }

    /// Returns the combined clone flags of the members.
    #[must_use]
    pub fn clone_flags(self) -> CloneFlags {
        flags(self.iter())
    }

    /// Returns the raw integer isolation flags of the members.
    #[must_use]
    pub fn bits(self) -> i32 {
        self.clone_flags().bits()
    }
}

impl FromIterator<NamespaceKind> for NamespaceSet {
    fn from_iter<I: IntoIterator<Item = NamespaceKind>>(iter: I) -> Self {
        let mut set = Self::empty();
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl Serialize for NamespaceSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for NamespaceSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let kinds = Vec::<NamespaceKind>::deserialize(deserializer)?;
        Ok(kinds.into_iter().collect())
    }
}

impl fmt::Display for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.iter().map(|k| k.to_string()).collect();
        write!(f, "{}", names.join(","))
    }
}

/// Combines namespace kinds into clone flags.
///
/// Order-independent; duplicates are harmless; an empty input yields no flags.
pub fn flags<I>(kinds: I) -> CloneFlags
where
    I: IntoIterator<Item = NamespaceKind>,
{
    kinds
        .into_iter()
        .fold(CloneFlags::empty(), |acc, kind| acc | kind.clone_flag())
}

/// Parses a comma-separated namespace list such as `"uts,pid,mount"`.
///
/// # Errors
///
/// Returns a configuration error for any unknown name.
pub fn parse_set(list: &str) -> Result<NamespaceSet> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(NamespaceKind::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_has_no_flags() {
        assert_eq!(flags(Vec::<NamespaceKind>::new()), CloneFlags::empty());
        assert_eq!(NamespaceSet::empty().bits(), 0);
    }

    #[test]
    fn every_subset_matches_or_of_members() {
        for mask in 0u8..64 {
            let members: Vec<NamespaceKind> = NamespaceKind::ALL
                .into_iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, k)| k)
                .collect();
            let expected = members
                .iter()
                .map(|k| k.clone_flag().bits())
                .fold(0, |acc, b| acc | b);
            assert_eq!(flags(members.iter().copied()).bits(), expected);

            let reversed: Vec<_> = members.iter().rev().copied().collect();
            assert_eq!(flags(reversed).bits(), expected);

            let set: NamespaceSet = members.into_iter().collect();
            assert_eq!(set.bits(), expected);
        }
    }

    #[test]
    fn flags_map_to_platform_constants() {
        assert_eq!(flags([NamespaceKind::Pid]).bits(), libc::CLONE_NEWPID);
        assert_eq!(flags([NamespaceKind::Mount]).bits(), libc::CLONE_NEWNS);
        assert_eq!(flags([NamespaceKind::User]).bits(), libc::CLONE_NEWUSER);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!("cgroupfs".parse::<NamespaceKind>().is_err());
        assert!(parse_set("uts,bogus").is_err());
    }

    #[test]
    fn parse_set_accepts_aliases() {
        let set = parse_set("uts, net ,mnt").expect("valid list");
        assert!(set.contains(NamespaceKind::Uts));
        assert!(set.contains(NamespaceKind::Network));
        assert!(set.contains(NamespaceKind::Mount));
        assert!(!set.contains(NamespaceKind::Pid));
    }

    #[test]
    fn set_serializes_as_list() {
        let set = NamespaceSet::empty()
            .with(NamespaceKind::Pid)
            .with(NamespaceKind::Uts);
        let json = serde_json::to_string(&set).expect("serialize");
        assert_eq!(json, r#"["uts","pid"]"#);
        let back: NamespaceSet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, set);
    }
}
