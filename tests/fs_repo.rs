use std::fs;
use std::fs::OpenOptions;
use std::io::Write;

use visibleheads::prelude::*;
use visibleheads::visibility::allheads::ALL_HEADS;
use visibleheads::visibility::headsfile;
use visibleheads::visibility::headsfile::VISIBLE_HEADS;

mod util;
use util::dag;
use util::n;

use visibleheads::dag::Phase::Draft;
use visibleheads::dag::Phase::Public;

fn history() -> MemoryDag {
    dag(&[
        ("p", "", Public),
        ("a", "p", Draft),
        ("b", "a", Draft),
        ("c", "a", Draft),
    ])
}

fn open(dir: &std::path::Path) -> Repo<FsStore, MemoryDag> {
    let store = FsStore::open(dir).unwrap();
    Repo::open(store, history(), Config::default()).unwrap()
}

#[test]
fn heads_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let mut repo = open(tmp.path());
        repo.start_tracking().unwrap();
        assert_eq!(repo.heads().unwrap(), &[n("b"), n("c")]);
        repo.remove([n("b")]).unwrap();
    }

    let repo = open(tmp.path());
    assert!(repo.tracking());
    assert_eq!(repo.heads().unwrap(), &[n("c")]);
    assert!(!repo.visible_heads().is_dirty());

    let data = fs::read(tmp.path().join(VISIBLE_HEADS)).unwrap();
    assert!(data.starts_with(b"v1\n"));
    assert_eq!(headsfile::decode(&data).unwrap(), vec![n("c")]);
}

#[test]
fn unclosed_transaction_is_lost() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let mut repo = open(tmp.path());
        repo.start_tracking().unwrap();
        let mut tr = repo.transaction("phase");
        repo.graph_mut().set_phase(&n("a"), Public);
        repo.graph_mut().set_phase(&n("b"), Public);
        repo.phase_adjust(&mut tr, [], [n("b")]);
        assert_eq!(repo.heads().unwrap(), &[n("c")]);
        // Dropped without closing, as if the process died.
        drop(tr);
    }

    let repo = open(tmp.path());
    assert_eq!(repo.heads().unwrap(), &[n("b"), n("c")]);
}

#[test]
fn all_heads_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let mut repo = open(tmp.path());
        repo.start_tracking().unwrap();
        repo.set_visible_heads([n("a")]).unwrap();
    }

    let repo = open(tmp.path());
    let all: Vec<NodeId> = repo.all_heads().unwrap().iter().copied().collect();
    assert_eq!(all, vec![n("b"), n("c"), n("a")]);
    assert!(!repo.all_heads().unwrap().is_dirty());

    let len = fs::metadata(tmp.path().join(ALL_HEADS)).unwrap().len();
    assert_eq!(len, 16 + 3 * 20);
}

#[test]
fn partial_all_heads_record_is_repaired() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let mut repo = open(tmp.path());
        repo.start_tracking().unwrap();
    }
    {
        let mut file = OpenOptions::new()
            .append(true)
            .open(tmp.path().join(ALL_HEADS))
            .unwrap();
        file.write_all(&[0xAB; 7]).unwrap();
    }

    let mut repo = open(tmp.path());
    assert_eq!(repo.all_heads().unwrap().len(), 2);
    assert!(repo.all_heads().unwrap().is_dirty());

    repo.set_visible_heads([n("a")]).unwrap();
    let len = fs::metadata(tmp.path().join(ALL_HEADS)).unwrap().len();
    assert_eq!(len, 16 + 3 * 20);

    let repo = open(tmp.path());
    assert_eq!(repo.all_heads().unwrap().len(), 3);
}

#[test]
fn lock_is_released_between_updates() {
    let tmp = tempfile::tempdir().unwrap();
    let mut repo = open(tmp.path());
    repo.start_tracking().unwrap();
    repo.add([n("a")]).unwrap();
    repo.remove([n("c")]).unwrap();
    assert_eq!(repo.heads().unwrap(), &[n("b")]);

    // A second handle can take the lock once the first is done.
    let other = FsStore::open(tmp.path()).unwrap();
    let guard = other.lock().unwrap();
    drop(guard);
}
