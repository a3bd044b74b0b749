//! Leaf enumeration and the scripting readout (`eval_tree`).
//!
//! Both walk the same reachable-header set as the serializer (`crate::walk::enumerate_all`), just
//! projected into a read-only shape meant for a host's introspection commands rather than for
//! driving a replay.

use crate::header::HeaderIdx;
use crate::state::UndoState;
use crate::walk;

/// One entry of `list_leaves()`: a header with no primary (`prev`) child, i.e. the most recent
/// change on some branch - the primary branch's `newhead`, or the tip of an alternate branch that
/// was displaced by a later edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafInfo {
    pub seq: u32,
    pub time: i64,
    /// Number of `Entry` records bundled into this header's atomic step.
    pub changes: u32,
    pub save_nr: u32,
}

/// Every leaf reachable in the DAG (e.g. two leaves after a branch).
pub fn list_leaves(state: &mut UndoState) -> Vec<LeafInfo> {
    walk::enumerate_all(state)
        .into_iter()
        .filter(|&idx| state.header(idx).map(|h| h.prev.is_none()).unwrap_or(false))
        .map(|idx| {
            let h = &state.arena[idx];
            LeafInfo {
                seq: h.seq,
                time: h.time,
                changes: h.entries.len() as u32,
                save_nr: h.save_nr,
            }
        })
        .collect()
}

/// One node of the scripting readout's nested tree: a header plus its alternate-branch subtrees.
/// Mirrors the primary chain from `oldhead` to `newhead`, with each header's `alt_next` sibling
/// chain nested under `alt` rather than flattened - the same shape `eval_tree()`'s nested
/// dict/list interface promises scripting callers.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EvalNode {
    pub seq: u32,
    pub time: i64,
    pub save_nr: u32,
    /// Alternate branches that diverged at this header, oldest-displaced first.
    pub alt: Vec<EvalNode>,
    /// The rest of this branch, continuing toward the leaf.
    pub next: Option<Box<EvalNode>>,
}

fn build_node(state: &UndoState, idx: HeaderIdx) -> EvalNode {
    let h = &state.arena[idx];
    EvalNode {
        seq: h.seq,
        time: h.time,
        save_nr: h.save_nr,
        alt: collect_alt_siblings(state, h.alt_next),
        next: h.prev.map(|p| Box::new(build_node(state, p))),
    }
}

/// Builds the flat chain of alternates that diverged at a single header, starting at `cur`
/// (that header's `alt_next`). Each sibling's own `alt_next` is the *next* item in this same
/// chain, not a second divergence of the sibling itself, so a sibling's node is built with an
/// empty `alt` - only its `prev` descent (which can have its own, unrelated divergences) recurses
/// through `build_node`.
fn collect_alt_siblings(state: &UndoState, mut cur: Option<HeaderIdx>) -> Vec<EvalNode> {
    let mut alt = Vec::new();
    while let Some(a) = cur {
        let h = &state.arena[a];
        alt.push(EvalNode {
            seq: h.seq,
            time: h.time,
            save_nr: h.save_nr,
            alt: Vec::new(),
            next: h.prev.map(|p| Box::new(build_node(state, p))),
        });
        cur = h.alt_next;
    }
    alt
}

/// Builds the nested tree rooted at `oldhead`, or `None` for an empty history.
pub fn eval_tree(state: &UndoState) -> Option<EvalNode> {
    state.oldhead.map(|root| build_node(state, root))
}

#[cfg(feature = "serde")]
pub fn eval_tree_json(state: &UndoState) -> serde_json::Value {
    match eval_tree(state) {
        Some(root) => serde_json::to_value(root).unwrap_or(serde_json::Value::Null),
        None => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;

    fn push_primary(state: &mut UndoState, time: i64) -> HeaderIdx {
        let seq = state.seq_last + 1;
        state.seq_last = seq;
        let mut h = Header::new(seq, time);
        h.next = state.newhead;
        let idx = state.arena.alloc(h);
        if let Some(old_new) = state.newhead {
            state.arena[old_new].prev = Some(idx);
        }
        state.newhead = Some(idx);
        if state.oldhead.is_none() {
            state.oldhead = Some(idx);
        }
        state.num_heads += 1;
        idx
    }

    #[test]
    fn list_leaves_finds_primary_and_alt_tips() {
        let mut state = UndoState::new();
        let root = push_primary(&mut state, 0);
        let _tip = push_primary(&mut state, 1);

        let mut alt = Header::new(10, 5);
        alt.alt_prev = Some(root);
        let alt_idx = state.arena.alloc(alt);
        state.arena[root].alt_next = Some(alt_idx);
        state.num_heads += 1;

        let mut leaves = list_leaves(&mut state);
        leaves.sort_by_key(|l| l.seq);
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].seq, 2);
        assert_eq!(leaves[1].seq, 10);
    }

    #[test]
    fn eval_tree_nests_alt_branches_under_their_divergence_point() {
        let mut state = UndoState::new();
        let root = push_primary(&mut state, 0);
        let _tip = push_primary(&mut state, 1);

        let mut alt = Header::new(10, 5);
        alt.alt_prev = Some(root);
        let alt_idx = state.arena.alloc(alt);
        state.arena[root].alt_next = Some(alt_idx);
        state.num_heads += 1;

        let tree = eval_tree(&state).unwrap();
        assert_eq!(tree.seq, 1);
        assert_eq!(tree.next.as_ref().unwrap().seq, 2);
        assert_eq!(tree.alt.len(), 1);
        assert_eq!(tree.alt[0].seq, 10);
    }
}
