use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use crate::store::Store;
use crate::transaction::RepoLock;

const LOCK_FILE: &str = "lock";
const TMP_SUFFIX: &str = ".tmp";

/// A [`Store`] keeping each record as a file inside a directory.
///
/// Whole record writes go to a temporary sibling which is synced and then
/// renamed over the target, so readers observe either the old or the new
/// contents. The repository lock is an exclusive advisory lock on a `lock`
/// file in the same directory.
#[derive(Debug)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Opens the store rooted at `root`, creating the directory if needed.
    pub fn open(root: &Path) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == LOCK_FILE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid record name {name:?}"),
            ));
        }
        Ok(self.root.join(name))
    }
}

impl Store for FsStore {
    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path(name)?)
    }

    fn write(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        let target = self.path(name)?;
        let tmp = self.root.join(format!("{name}{TMP_SUFFIX}"));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &target)
    }

    fn append(&mut self, name: &str, data: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(name)?)?;
        file.write_all(data)?;
        file.sync_data()
    }

    fn lock(&self) -> io::Result<RepoLock> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE))?;
        file.lock()?;
        Ok(RepoLock::file(file))
    }
}
