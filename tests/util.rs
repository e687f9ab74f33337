#![allow(dead_code)]

use std::collections::BTreeSet;
use std::collections::HashSet;

use visibleheads::prelude::*;

pub fn n(label: &str) -> NodeId {
    NodeId::from_content(label)
}

/// Builds a graph from `(label, parents, phase)` triples in topological
/// order. Parents are given as a whitespace separated list of labels.
pub fn dag(commits: &[(&str, &str, Phase)]) -> MemoryDag {
    let mut dag = MemoryDag::new();
    for (label, parents, phase) in commits {
        let parents: Vec<NodeId> = parents.split_whitespace().map(n).collect();
        dag.commit(n(label), &parents, *phase).unwrap();
    }
    dag
}

/// Opens an in-memory repository and switches it to explicit tracking.
pub fn tracking_repo(dag: MemoryDag) -> Repo<MemoryStore, MemoryDag> {
    let mut repo = Repo::open(MemoryStore::new(), dag, Config::default()).unwrap();
    repo.start_tracking().unwrap();
    repo
}

/// Revisions equal to or an ancestor of one of `heads`.
pub fn reachable<G: Graph>(graph: &G, heads: &[NodeId]) -> BTreeSet<Rev> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<Rev> = heads.iter().filter_map(|h| graph.rev(h)).collect();
    while let Some(rev) = stack.pop() {
        if seen.insert(rev) {
            stack.extend(graph.parent_revs(rev).into_iter().flatten());
        }
    }
    seen
}

pub fn mutable_revs<G: Graph>(graph: &G) -> BTreeSet<Rev> {
    graph
        .revs_in_phases(&[Phase::Draft, Phase::Secret])
        .into_iter()
        .collect()
}

/// Returns `true` if no head is a proper ancestor of another head and no
/// head is listed twice.
pub fn is_minimal<G: Graph>(graph: &G, heads: &[NodeId]) -> bool {
    let unique: HashSet<&NodeId> = heads.iter().collect();
    if unique.len() != heads.len() {
        return false;
    }
    heads.iter().all(|head| {
        let others: Vec<NodeId> = heads.iter().copied().filter(|h| h != head).collect();
        let Some(rev) = graph.rev(head) else {
            return true;
        };
        !reachable(graph, &others).contains(&rev)
    })
}

/// Routes `tracing` output to the test harness, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
