//! The full-DAG traversal shared by the navigator, the serializer, and leaf enumeration.
//! Visited nodes are marked with a walk token rather than a separate visited-set, so the walk
//! doesn't need to mutate any persistent state.

use crate::header::HeaderIdx;
use crate::state::UndoState;

/// Visits every header reachable from `oldhead`, preferring a header's `prev` child before its
/// `alt_next` child - the same down-then-sideways order the on-disk writer uses. Each header is
/// stamped with a fresh walk token and appears in the result exactly once.
pub(crate) fn enumerate_all(state: &mut UndoState) -> Vec<HeaderIdx> {
    let mut result = Vec::new();
    let Some(root) = state.oldhead else { return result };

    let token = state.next_walk_token();
    let mut stack = vec![root];
    while let Some(idx) = stack.pop() {
        if state.arena[idx].walk == token {
            continue;
        }
        state.arena[idx].walk = token;
        result.push(idx);

        if let Some(a) = state.arena[idx].alt_next {
            stack.push(a);
        }
        if let Some(p) = state.arena[idx].prev {
            stack.push(p);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;

    #[test]
    fn visits_primary_before_alt_and_each_node_once() {
        let mut state = UndoState::new();
        let root = state.arena.alloc(Header::new(1, 0));
        state.oldhead = Some(root);
        state.newhead = Some(root);

        let mid = state.arena.alloc(Header::new(2, 1));
        state.arena[mid].next = Some(root);
        state.arena[root].prev = Some(mid);
        state.newhead = Some(mid);

        let alt = state.arena.alloc(Header::new(3, 2));
        state.arena[alt].alt_prev = Some(root);
        state.arena[root].alt_next = Some(alt);

        state.num_heads = 3;

        let order = enumerate_all(&mut state);
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], root);
        assert!(order.contains(&mid));
        assert!(order.contains(&alt));
    }
}
