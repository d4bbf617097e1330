use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, ClusterResult};

/// An identifier minted by the master, qualified by the master epoch
/// that minted it. Rendered as `<epoch>-<counter>`.
pub trait MintedId: Sized {
    fn mint(epoch: u64, seq: u64) -> Self;
    fn epoch(&self) -> u64;
}

macro_rules! define_minted_id {
    ($name:ident) => {
        #[derive(
            Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
        )]
        pub struct $name {
            pub epoch: u64,
            pub seq: u64,
        }

        impl MintedId for $name {
            fn mint(epoch: u64, seq: u64) -> Self {
                Self { epoch, seq }
            }

            fn epoch(&self) -> u64 {
                self.epoch
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}-{}", self.epoch, self.seq)
            }
        }

        impl FromStr for $name {
            type Err = ClusterError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let (epoch, seq) = s.split_once('-').ok_or_else(|| {
                    ClusterError::InvalidArgument(format!("invalid identifier: {s}"))
                })?;
                let epoch = epoch.parse::<u64>().map_err(|_| {
                    ClusterError::InvalidArgument(format!("invalid identifier epoch: {s}"))
                })?;
                let seq = seq.parse::<u64>().map_err(|_| {
                    ClusterError::InvalidArgument(format!("invalid identifier counter: {s}"))
                })?;
                Ok(Self { epoch, seq })
            }
        }
    };
}

define_minted_id!(FrameworkId);
define_minted_id!(SlaveId);
define_minted_id!(OfferId);

/// A task identifier, chosen by the framework that launches the task.
/// `(FrameworkId, TaskId)` is unique cluster-wide for the lifetime
/// of the framework.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TaskId(u64);

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for u64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct IdGenerator<T: MintedId> {
    epoch: u64,
    next_seq: u64,
    phantom: PhantomData<T>,
}

impl<T: MintedId> IdGenerator<T> {
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            next_seq: 1,
            phantom: PhantomData,
        }
    }

    pub fn next(&mut self) -> ClusterResult<T> {
        let seq = self.next_seq;
        self.next_seq = seq
            .checked_add(1)
            .ok_or_else(|| ClusterError::InternalError("ID overflow".to_string()))?;
        Ok(T::mint(self.epoch, seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_is_monotonic() {
        let mut generator = IdGenerator::<SlaveId>::new(3);
        let first = generator.next().unwrap();
        let second = generator.next().unwrap();
        assert_eq!(first.to_string(), "3-1");
        assert_eq!(second.to_string(), "3-2");
        assert!(first < second);
    }

    #[test]
    fn test_parse_round_trip() {
        let id: OfferId = "7-42".parse().unwrap();
        assert_eq!(id, OfferId { epoch: 7, seq: 42 });
        assert!("42".parse::<OfferId>().is_err());
        assert!("a-1".parse::<OfferId>().is_err());
    }
}
