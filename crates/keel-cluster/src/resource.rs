use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// A vector of named nonnegative scalar quantities (`cpus`, `mem`, ...).
/// Zero entries are dropped on construction so that structural equality
/// ignores kinds that are not present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    kinds: BTreeMap<String, u64>,
}

impl Resources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: &str) -> u64 {
        self.kinds.get(kind).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.kinds.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// The sum of all scalars, used by allocation policies that rank
    /// frameworks by total held quantity.
    pub fn scalar_sum(&self) -> u64 {
        self.kinds.values().sum()
    }

    pub fn add(&mut self, other: &Resources) {
        for (kind, value) in other.kinds.iter() {
            if *value > 0 {
                *self.kinds.entry(kind.clone()).or_insert(0) += value;
            }
        }
    }

    /// Componentwise subtraction. Returns [None] if any component
    /// would go negative; `self` is unchanged in that case.
    pub fn checked_sub(&self, other: &Resources) -> Option<Resources> {
        let mut out = self.clone();
        for (kind, value) in other.kinds.iter() {
            let current = out.kinds.get_mut(kind)?;
            let remaining = current.checked_sub(*value)?;
            if remaining == 0 {
                out.kinds.remove(kind);
            } else {
                *current = remaining;
            }
        }
        Some(out)
    }

    /// Whether every kind in `other` is present in `self` with at least
    /// the same quantity.
    pub fn contains(&self, other: &Resources) -> bool {
        other
            .kinds
            .iter()
            .all(|(kind, value)| self.get(kind) >= *value)
    }

    fn normalize(&mut self) {
        self.kinds.retain(|_, v| *v > 0);
    }
}

impl FromIterator<(String, u64)> for Resources {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        let mut out = Self {
            kinds: iter.into_iter().collect(),
        };
        out.normalize();
        out
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kinds.is_empty() {
            return write!(f, "none");
        }
        let out = self
            .kinds
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect::<Vec<_>>()
            .join(";");
        write!(f, "{out}")
    }
}

impl FromStr for Resources {
    type Err = ClusterError;

    /// Parses the CLI form `cpus:4;mem:1024`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut kinds = BTreeMap::new();
        for part in s.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (kind, value) = part.split_once(':').ok_or_else(|| {
                ClusterError::InvalidArgument(format!("invalid resource entry: {part}"))
            })?;
            let value = value.trim().parse::<u64>().map_err(|_| {
                ClusterError::InvalidArgument(format!("invalid resource quantity: {part}"))
            })?;
            if kinds.insert(kind.trim().to_string(), value).is_some() {
                return Err(ClusterError::InvalidArgument(format!(
                    "duplicate resource kind: {kind}"
                )));
            }
        }
        let mut out = Self { kinds };
        out.normalize();
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resources(s: &str) -> Resources {
        s.parse().unwrap()
    }

    #[test]
    fn test_add() {
        let mut r = resources("cpus:2;mem:512");
        r.add(&resources("cpus:1;disk:10"));
        assert_eq!(r, resources("cpus:3;mem:512;disk:10"));
    }

    #[test]
    fn test_checked_sub() {
        let r = resources("cpus:4;mem:1024");
        assert_eq!(
            r.checked_sub(&resources("cpus:1;mem:256")),
            Some(resources("cpus:3;mem:768"))
        );
        assert_eq!(r.checked_sub(&resources("cpus:5")), None);
        assert_eq!(r.checked_sub(&resources("gpus:1")), None);
    }

    #[test]
    fn test_sub_to_zero_drops_kind() {
        let r = resources("cpus:4;mem:1024");
        let out = r.checked_sub(&resources("cpus:4")).unwrap();
        assert_eq!(out, resources("mem:1024"));
        assert_eq!(out.get("cpus"), 0);
    }

    #[test]
    fn test_contains() {
        let r = resources("cpus:4;mem:1024");
        assert!(r.contains(&resources("cpus:4;mem:1024")));
        assert!(r.contains(&resources("cpus:1")));
        assert!(r.contains(&Resources::new()));
        assert!(!r.contains(&resources("cpus:1;gpus:1")));
    }

    #[test]
    fn test_zero_entries_are_ignored() {
        assert_eq!(resources("cpus:0"), Resources::new());
        assert!(resources("cpus:0").is_empty());
    }

    #[test]
    fn test_display_and_parse() {
        let r = resources("mem:1024;cpus:4");
        assert_eq!(r.to_string(), "cpus:4;mem:1024");
        assert!("cpus:x".parse::<Resources>().is_err());
        assert!("cpus:1;cpus:2".parse::<Resources>().is_err());
    }
}
