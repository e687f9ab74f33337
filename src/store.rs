//! Versioned flat record storage for repository bookkeeping.
//!
//! A [`Store`] maps record names to byte contents. Records are small and
//! rewritten whole, except for append-only records which grow through
//! [`Store::append`]. A missing record is reported as an
//! [`std::io::ErrorKind::NotFound`] error, callers decide whether absence is
//! meaningful.
//!
//! The set of storage features a repository relies on is kept in the
//! [`Requirements`] record.

pub mod fsstore;
pub mod memorystore;

use std::collections::BTreeSet;
use std::io;

use crate::transaction::RepoLock;

/// Name of the record listing enabled storage features.
pub const REQUIREMENTS: &str = "requires";

/// Storage backend for repository records.
pub trait Store {
    /// Returns the full contents of `name`.
    fn read(&self, name: &str) -> io::Result<Vec<u8>>;

    /// Atomically replaces the contents of `name`.
    fn write(&mut self, name: &str, data: &[u8]) -> io::Result<()>;

    /// Appends `data` to `name`, creating the record if needed.
    fn append(&mut self, name: &str, data: &[u8]) -> io::Result<()>;

    /// Acquires the exclusive repository lock.
    ///
    /// The lock is held until the returned guard is dropped.
    fn lock(&self) -> io::Result<RepoLock>;

    /// Reads `name`, mapping a missing record to `None`.
    fn try_read(&self, name: &str) -> io::Result<Option<Vec<u8>>> {
        match self.read(name) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Storage features enabled for a repository, one name per line on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    features: BTreeSet<String>,
}

impl Requirements {
    /// Loads the requirements record, an absent record means no features.
    pub fn load<S: Store + ?Sized>(store: &S) -> io::Result<Self> {
        let Some(data) = store.try_read(REQUIREMENTS)? else {
            return Ok(Self::default());
        };
        let text = String::from_utf8(data)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        Ok(Self {
            features: text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect(),
        })
    }

    pub fn write<S: Store + ?Sized>(&self, store: &mut S) -> io::Result<()> {
        let mut data = String::new();
        for feature in &self.features {
            data.push_str(feature);
            data.push('\n');
        }
        store.write(REQUIREMENTS, data.as_bytes())
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// Returns `true` if the feature was not present before.
    pub fn insert(&mut self, feature: &str) -> bool {
        self.features.insert(feature.to_owned())
    }

    /// Returns `true` if the feature was present.
    pub fn remove(&mut self, feature: &str) -> bool {
        self.features.remove(feature)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(String::as_str)
    }
}
