use std::collections::HashMap;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::store::Store;
use crate::transaction::RepoLock;

/// Simple in-memory implementation of [`Store`].
///
/// Useful for unit tests or ephemeral repositories where persistence is not
/// required. Locking is not reentrant, a second [`Store::lock`] while the
/// first guard is alive fails with [`io::ErrorKind::WouldBlock`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub records: HashMap<String, Vec<u8>>,
    locked: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

impl Store for MemoryStore {
    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        self.records
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_owned()))
    }

    fn write(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        self.records.insert(name.to_owned(), data.to_vec());
        Ok(())
    }

    fn append(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        self.records
            .entry(name.to_owned())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn lock(&self) -> io::Result<RepoLock> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "repository is already locked",
            ));
        }
        Ok(RepoLock::flag(self.locked.clone()))
    }
}
