//! Repository lock and deferred transaction writes.
//!
//! Mutations never touch durable storage directly. They stage
//! [`PendingWrite`]s and [`PostClose`] actions on a [`Transaction`], and the
//! owner of the transaction applies them exactly once when it closes. A
//! transaction that is dropped or aborted leaves storage untouched.

use std::fs::File;
use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::store::Store;

/// Guard for the exclusive repository lock, released on drop.
#[derive(Debug)]
pub struct RepoLock {
    inner: LockInner,
}

#[derive(Debug)]
enum LockInner {
    File(File),
    Flag(Arc<AtomicBool>),
}

impl RepoLock {
    /// Wraps a file on which an exclusive lock is already held.
    pub fn file(file: File) -> Self {
        Self {
            inner: LockInner::File(file),
        }
    }

    /// Wraps an in-process flag that has already been set.
    pub fn flag(flag: Arc<AtomicBool>) -> Self {
        Self {
            inner: LockInner::Flag(flag),
        }
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        match &self.inner {
            LockInner::File(file) => {
                // Closing the file releases the lock as well.
                let _ = file.unlock();
            }
            LockInner::Flag(flag) => flag.store(false, Ordering::Release),
        }
    }
}

/// Record contents to be written when the transaction closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub records: Vec<(String, Vec<u8>)>,
}

impl PendingWrite {
    pub fn new(record: &str, data: Vec<u8>) -> Self {
        Self {
            records: vec![(record.to_owned(), data)],
        }
    }
}

/// Action run after all pending writes of a transaction succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostClose {
    /// Append the buffered additions of the all-heads set.
    FlushAllHeads,
}

/// Collects deferred effects until the transaction is closed.
///
/// File generators and post-close actions are keyed by name, registering the
/// same name again replaces the earlier entry.
#[derive(Debug)]
pub struct Transaction {
    name: String,
    generators: Vec<(String, PendingWrite)>,
    post_close: Vec<(String, PostClose)>,
}

impl Transaction {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            generators: Vec::new(),
            post_close: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_file_generator(&mut self, genid: &str, write: PendingWrite) {
        match self.generators.iter_mut().find(|(id, _)| id == genid) {
            Some((_, slot)) => *slot = write,
            None => self.generators.push((genid.to_owned(), write)),
        }
    }

    pub fn add_post_close(&mut self, category: &str, action: PostClose) {
        match self.post_close.iter_mut().find(|(id, _)| id == category) {
            Some((_, slot)) => *slot = action,
            None => self.post_close.push((category.to_owned(), action)),
        }
    }

    pub fn file_generator(&self, genid: &str) -> Option<&PendingWrite> {
        self.generators
            .iter()
            .find(|(id, _)| id == genid)
            .map(|(_, write)| write)
    }

    pub fn post_close_action(&self, category: &str) -> Option<PostClose> {
        self.post_close
            .iter()
            .find(|(id, _)| id == category)
            .map(|(_, action)| *action)
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty() && self.post_close.is_empty()
    }

    /// Writes every pending record to `store`, then runs the post-close
    /// actions through `run`.
    ///
    /// Post-close actions are skipped if any write fails.
    pub fn close<S, F>(self, store: &mut S, mut run: F) -> io::Result<()>
    where
        S: Store + ?Sized,
        F: FnMut(PostClose, &mut S) -> io::Result<()>,
    {
        for (_, write) in &self.generators {
            for (record, data) in &write.records {
                store.write(record, data)?;
            }
        }
        for (_, action) in self.post_close {
            run(action, store)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memorystore::MemoryStore;

    #[test]
    fn generators_are_replaced_by_name() {
        let mut tr = Transaction::new("test");
        tr.add_file_generator("visibility", PendingWrite::new("visibleheads", b"a".to_vec()));
        tr.add_file_generator("visibility", PendingWrite::new("visibleheads", b"b".to_vec()));
        tr.add_post_close("allheads", PostClose::FlushAllHeads);
        tr.add_post_close("allheads", PostClose::FlushAllHeads);

        let mut store = MemoryStore::new();
        let mut runs = 0;
        tr.close(&mut store, |action, _| {
            assert_eq!(action, PostClose::FlushAllHeads);
            runs += 1;
            Ok(())
        })
        .unwrap();

        assert_eq!(store.read("visibleheads").unwrap(), b"b");
        assert_eq!(runs, 1);
    }

    #[test]
    fn dropped_transaction_writes_nothing() {
        let store = MemoryStore::new();
        {
            let mut tr = Transaction::new("test");
            tr.add_file_generator("visibility", PendingWrite::new("visibleheads", b"a".to_vec()));
            assert!(!tr.is_empty());
        }
        assert!(store.records.is_empty());
    }
}
