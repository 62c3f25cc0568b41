use std::fmt;
use std::str::FromStr;

use web3::types::{H160, H256};

use crate::data::header::BlockNumber;

/// Status of a persisted storage diff. Stored as a lowercase string in the
/// database; the variants form the state machine driven by the storage
/// watchers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiffStatus {
    New,
    Pending,
    Noncanonical,
    Transformed,
    Unrecognized,
    Unwatched,
}

impl DiffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffStatus::New => "new",
            DiffStatus::Pending => "pending",
            DiffStatus::Noncanonical => "noncanonical",
            DiffStatus::Transformed => "transformed",
            DiffStatus::Unrecognized => "unrecognized",
            DiffStatus::Unwatched => "unwatched",
        }
    }
}

impl fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DiffStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(DiffStatus::New),
            "pending" => Ok(DiffStatus::Pending),
            "noncanonical" => Ok(DiffStatus::Noncanonical),
            "transformed" => Ok(DiffStatus::Transformed),
            "unrecognized" => Ok(DiffStatus::Unrecognized),
            "unwatched" => Ok(DiffStatus::Unwatched),
            other => Err(anyhow::anyhow!("unknown diff status `{}`", other)),
        }
    }
}

/// A single observed change to contract storage, as emitted by the node's
/// diff side-channel or recomputed by a back-fill.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RawDiff {
    pub address: H160,
    pub block_height: BlockNumber,
    pub block_hash: H256,
    pub storage_key: H256,
    pub storage_value: H256,
}

/// A storage diff as stored, with its id, status and provenance.
#[derive(Clone, Debug, PartialEq)]
pub struct PersistedDiff {
    pub id: i64,
    pub status: DiffStatus,
    pub from_backfill: bool,
    /// Set once the watcher has matched the diff against a canonical
    /// header; transformers read domain context through it.
    pub header_id: Option<i64>,
    pub eth_node_id: i64,
    pub raw: RawDiff,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        let statuses = [
            DiffStatus::New,
            DiffStatus::Pending,
            DiffStatus::Noncanonical,
            DiffStatus::Transformed,
            DiffStatus::Unrecognized,
            DiffStatus::Unwatched,
        ];
        for status in statuses {
            assert_eq!(status.as_str().parse::<DiffStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!("checked".parse::<DiffStatus>().is_err());
    }
}
