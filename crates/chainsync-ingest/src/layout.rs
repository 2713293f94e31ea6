//! Local and remote partition layout
//!
//! Local: `{out_dir}/btc/{blocks|transactions}/{YYYY-MM-DD}/*.parquet`
//! Remote: `{prefix}{blocks|transactions}/date={YYYY-MM-DD}/*.snappy.parquet`

use chainsync_common::PartitionDate;
use std::fmt;
use std::path::{Path, PathBuf};

const CHAIN_DIR: &str = "btc";

/// The two file families of the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Blocks,
    Transactions,
}

impl DataKind {
    pub const ALL: [DataKind; 2] = [DataKind::Blocks, DataKind::Transactions];

    pub fn dir_name(self) -> &'static str {
        match self {
            DataKind::Blocks => "blocks",
            DataKind::Transactions => "transactions",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Directory holding one day's files of one kind
pub fn partition_dir(out_dir: &Path, kind: DataKind, date: PartitionDate) -> PathBuf {
    out_dir
        .join(CHAIN_DIR)
        .join(kind.dir_name())
        .join(date.to_string())
}

/// Object key prefix for one day's files of one kind
pub fn remote_prefix(prefix: &str, kind: DataKind, date: PartitionDate) -> String {
    let mut base = prefix.trim_start_matches('/').to_string();
    if !base.is_empty() && !base.ends_with('/') {
        base.push('/');
    }
    format!("{}{}/date={}/", base, kind.dir_name(), date)
}
