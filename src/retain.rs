//! Retention manager: bounds the DAG to a configured history depth.

use crate::header::HeaderIdx;
use crate::state::UndoState;

impl UndoState {
    /// Enforces the bounded-history policy.
    ///
    /// `limit < 0` disables undo entirely - the caller (`record.rs`) checks for this and skips
    /// into the "mutation proceeds unrecorded" path rather than calling `trim` at all; `trim`
    /// itself only ever sees `limit >= 0`.
    ///
    /// While `num_heads > limit` and `oldhead` exists, drops one node, preferring to drop a
    /// complete alternate branch (the one attached closest to `oldhead`, i.e. the oldest
    /// divergence point, if several exist along the primary chain) over a primary-branch node
    /// with descendants still in active use. Never drops `protected`; if it would be dropped,
    /// the whole branch rooted at `protected` is dropped instead and `protected` is returned as
    /// `None` so the caller knows it no longer exists.
    pub(crate) fn trim(&mut self, limit: u32, mut protected: Option<HeaderIdx>) -> Option<HeaderIdx> {
        while self.num_heads > limit {
            let Some(old) = self.oldhead else { break };

            let victim = self.oldest_alt_branch().unwrap_or(old);

            if Some(victim) == protected {
                protected = None;
            }

            self.drop_branch(victim);
        }
        protected
    }

    /// Walks the primary chain from `oldhead` toward `newhead` looking for the first header
    /// with a non-null `alt_next`; that alternate branch is the oldest divergence point still
    /// in the DAG, so it's the preferred thing to drop.
    fn oldest_alt_branch(&self) -> Option<HeaderIdx> {
        let mut cur = self.oldhead?;
        loop {
            if let Some(alt) = self.arena[cur].alt_next {
                return Some(alt);
            }
            match self.arena[cur].prev {
                Some(next_newer) => cur = next_newer,
                None => return None,
            }
        }
    }

    /// Removes `victim` from the DAG, splicing the alt-chain it was part of back together, then
    /// frees whatever it was holding onto.
    ///
    /// `victim`'s `prev` points toward the leaf (the *newer* header), never into its own
    /// subtree, so the two cases need different treatment: dropping the primary root must free
    /// only `victim` itself (plus any alt branches hanging directly off it) and reattach
    /// `oldhead` at `victim.prev`, while dropping an alternate branch frees everything reachable
    /// from it via `prev`/`alt_next` - that *is* its own subtree, since an alt branch's `prev`
    /// chain never rejoins the primary chain.
    fn drop_branch(&mut self, victim: HeaderIdx) {
        let victim_alt_prev = self.arena[victim].alt_prev;
        let is_primary_root = self.oldhead == Some(victim);

        match victim_alt_prev {
            Some(ap) => self.arena[ap].alt_next = None,
            None => debug_assert!(is_primary_root, "only the primary root has no alt_prev"),
        }

        if is_primary_root {
            // By invariant 3, `victim.prev` (if any) is the unique header whose `next` points at
            // `victim`, so it's the new root directly - no backward search needed.
            let new_oldhead = self.arena[victim].prev;
            let num_dropped = self.free_alt_chain(victim);
            self.num_heads = self.num_heads.saturating_sub(num_dropped);
            self.oldhead = new_oldhead;
            if let Some(new_root) = new_oldhead {
                self.arena[new_root].next = None;
            }
        } else {
            let num_dropped = self.count_subdag(victim);
            self.free_subdag(victim);
            self.num_heads = self.num_heads.saturating_sub(num_dropped);
        }
    }

    /// Frees `victim` plus any alt branches hanging directly off it, without following
    /// `victim.prev` (the oldest-alt-branch search in `trim` should already have picked off any
    /// such branch before the primary root itself is ever chosen as `victim`, but handling it
    /// here too costs nothing and keeps this function correct on its own). Returns the number of
    /// headers freed.
    fn free_alt_chain(&mut self, victim: HeaderIdx) -> u32 {
        let mut count = 1;
        let mut cur = self.arena[victim].alt_next;
        while let Some(a) = cur {
            cur = self.arena[a].alt_next;
            count += self.count_subdag(a);
            self.free_subdag(a);
        }
        self.arena.free(victim);
        count
    }

    fn count_subdag(&self, root: HeaderIdx) -> u32 {
        let mut count = 0;
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            count += 1;
            let h = &self.arena[idx];
            if let Some(p) = h.prev {
                stack.push(p);
            }
            if let Some(a) = h.alt_next {
                stack.push(a);
            }
        }
        count
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
        h.prev = None;
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
    fn trim_drops_oldest_when_no_alt_branches() {
        let mut state = UndoState::new();
        for t in 0..5 {
            push_primary(&mut state, t);
        }
        assert_eq!(state.num_heads, 5);

        let protected = state.trim(3, None);
        assert!(protected.is_none());
        assert_eq!(state.num_heads, 3);
        // the surviving primary root's `next` must be None (invariant 4).
        let root = state.oldhead.unwrap();
        assert_eq!(state.arena[root].next, None);
    }

    #[test]
    fn trim_prefers_alt_branch_over_primary() {
        let mut state = UndoState::new();
        let a = push_primary(&mut state, 0);
        let b = push_primary(&mut state, 1);
        let _c = push_primary(&mut state, 2);

        // Attach a 2-node alt branch at `a` (the oldest primary node).
        let mut alt1 = Header::new(10, 5);
        alt1.alt_prev = Some(a);
        let alt1_idx = state.arena.alloc(alt1);
        state.arena[a].alt_next = Some(alt1_idx);
        state.num_heads += 1;

        let before = state.num_heads;
        let protected = state.trim(before - 1, None);
        assert!(protected.is_none());
        // The alt branch should be gone, primary chain intact.
        assert_eq!(state.arena[a].alt_next, None);
        assert!(state.arena.contains(a));
        assert!(state.arena.contains(b));
    }

    #[test]
    fn trim_reroutes_protected_header() {
        let mut state = UndoState::new();
        for t in 0..3 {
            push_primary(&mut state, t);
        }
        let root = state.oldhead.unwrap();
        let protected = state.trim(0, Some(root));
        // Protected was exactly the dropped victim, so it comes back as None.
        assert!(protected.is_none());
        assert_eq!(state.num_heads, 0);
        assert!(state.oldhead.is_none());
    }
}
