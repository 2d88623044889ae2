// pulseboard-core/src/identity.rs
//
// Union-find identity graph: merges raw identifiers (userId/email/anonymousId)
// into stable profile roots.
//
// Built on `petgraph::unionfind::UnionFind` rather than a hand-rolled
// parent/rank map — it already does path-compressed union-by-rank over a
// dense index space. Identifiers arrive as strings, so a small interner
// sits in front of it (string <-> dense index) and grows the backing
// `UnionFind` as new identifiers show up, replaying existing equivalences on
// growth so no element's canonical root moves as a side effect of resizing.
//
// Unlike ProfileStore/RollingCounter below, union-find mutations are not
// independent per key: `union(a, b)` touches both a's and b's chains, and
// `find` with path compression can rewrite an arbitrary number of parent
// pointers along the way to the root. Sharding this per key, the way a
// sharded map shards independent per-account state, would not keep those
// multi-key mutations atomic, so the whole table sits behind one
// `parking_lot::RwLock` — a single-writer design.

use std::collections::HashMap;

use parking_lot::RwLock;
use petgraph::unionfind::UnionFind;

struct Interner {
    index_of: HashMap<String, usize>,
    strings: Vec<String>,
}

impl Interner {
    fn new() -> Self {
        Self { index_of: HashMap::new(), strings: Vec::new() }
    }

    fn intern(&mut self, id: &str) -> usize {
        if let Some(&i) = self.index_of.get(id) {
            return i;
        }
        let i = self.strings.len();
        self.strings.push(id.to_string());
        self.index_of.insert(id.to_string(), i);
        i
    }

    fn str_of(&self, i: usize) -> &str {
        &self.strings[i]
    }
}

struct Inner {
    interner: Interner,
    uf: UnionFind<usize>,
    capacity: usize,
}

impl Inner {
    fn new() -> Self {
        Self { interner: Interner::new(), uf: UnionFind::new(0), capacity: 0 }
    }

    /// Grow the union-find's backing storage to hold at least `min_len`
    /// elements, replaying existing equivalences into the larger table so
    /// every element's canonical root is preserved exactly — a pure resize
    /// must never look like a merge to a caller.
    fn ensure_capacity(&mut self, min_len: usize) {
        if min_len <= self.capacity {
            return;
        }
        let next_capacity = min_len.max(self.capacity * 2).max(16);
        let old_uf = std::mem::replace(&mut self.uf, UnionFind::new(0));
        let labeling = old_uf.into_labeling();
        let mut grown = UnionFind::new(next_capacity);
        for (i, &root) in labeling.iter().enumerate() {
            if root != i {
                grown.union(root, i);
            }
        }
        self.uf = grown;
        self.capacity = next_capacity;
    }

    fn index_for(&mut self, id: &str) -> usize {
        let idx = self.interner.intern(id);
        self.ensure_capacity(idx + 1);
        idx
    }

    fn find_str(&mut self, id: &str) -> String {
        let idx = self.index_for(id);
        let root = self.uf.find_mut(idx);
        self.interner.str_of(root).to_string()
    }

    /// Union the sets containing `a` and `b`. Returns `Some((absorbed,
    /// survivor))` naming which root was absorbed into which, or `None` if
    /// `a` and `b` were already in the same set.
    fn union_str(&mut self, a: &str, b: &str) -> Option<(String, String)> {
        let ia = self.index_for(a);
        let ib = self.index_for(b);
        let ra = self.uf.find_mut(ia);
        let rb = self.uf.find_mut(ib);
        if ra == rb {
            return None;
        }

        // `UnionFind::union(x, y)` keeps x's representative as the root when
        // both sides have equal rank, so pass the lexicographically smaller
        // root first to get a deterministic tie-break independent of rank.
        let (x, y) = if self.interner.str_of(ra) <= self.interner.str_of(rb) { (ra, rb) } else { (rb, ra) };
        self.uf.union(x, y);

        let survivor_idx = self.uf.find_mut(x);
        let absorbed_idx = if survivor_idx == ra { rb } else { ra };
        let survivor = self.interner.str_of(survivor_idx).to_string();
        let absorbed = self.interner.str_of(absorbed_idx).to_string();
        Some((absorbed, survivor))
    }
}

pub struct IdentityGraph {
    inner: RwLock<Inner>,
}

impl IdentityGraph {
    pub fn new() -> Self {
        Self { inner: RwLock::new(Inner::new()) }
    }

    /// Normalize a raw identifier string into canonical `scheme:value` form.
    /// Idempotent: normalizing an already-normalized id returns it unchanged.
    /// Strings without a recognized `scheme:` prefix are classified by shape
    /// (contains '@' → email, starts with "anon"/"anonymous" → anon, else
    /// user) and never rejected — invalid input degrades to a user-scheme id.
    pub fn normalize(raw: &str) -> String {
        let raw = raw.trim();
        if let Some(rest) = raw.strip_prefix("user:") {
            return format!("user:{}", rest.trim());
        }
        if let Some(rest) = raw.strip_prefix("email:") {
            return format!("email:{}", rest.trim().to_lowercase());
        }
        if let Some(rest) = raw.strip_prefix("anon:") {
            return format!("anon:{}", rest.trim());
        }

        let lower = raw.to_lowercase();
        if raw.contains('@') {
            format!("email:{lower}")
        } else if lower.starts_with("anonymous") || lower.starts_with("anon") {
            format!("anon:{raw}")
        } else {
            format!("user:{raw}")
        }
    }

    /// Find the canonical root for `raw`, inserting it as a fresh singleton
    /// node if unseen. Applies path compression along the way.
    pub fn find(&self, raw: &str) -> String {
        let id = Self::normalize(raw);
        self.inner.write().find_str(&id)
    }

    /// Union the sets containing `a` and `b`. No-op if already in the same
    /// set. Union-by-rank; ties broken by lexicographically smaller
    /// identifier becoming the new root, for determinism across input order.
    /// Returns `Some((absorbed_root, surviving_root))` when a real merge
    /// happened, so callers can migrate any state keyed by the absorbed root.
    pub fn union(&self, a: &str, b: &str) -> Option<(String, String)> {
        let a = Self::normalize(a);
        let b = Self::normalize(b);
        self.inner.write().union_str(&a, &b)
    }

    /// Normalize and union all of `ids` pairwise (consecutively), returning
    /// the canonical id for the resulting set plus every `(absorbed,
    /// survivor)` merge that occurred along the way. Stable across
    /// permutations of `ids`.
    pub fn canonical_id_for(&self, ids: &[String]) -> (String, Vec<(String, String)>) {
        if ids.is_empty() {
            return (Self::normalize(""), Vec::new());
        }
        let mut merges = Vec::new();
        if ids.len() >= 2 {
            for pair in ids.windows(2) {
                if let Some(merge) = self.union(&pair[0], &pair[1]) {
                    merges.push(merge);
                }
            }
        }
        (self.find(&ids[0]), merges)
    }
}

impl Default for IdentityGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_lowercases_email_only() {
        assert_eq!(IdentityGraph::normalize("  Foo@Bar.com "), "email:foo@bar.com");
        assert_eq!(IdentityGraph::normalize("  U1  "), "user:U1");
        assert_eq!(IdentityGraph::normalize("anon-xyz"), "anon:anon-xyz");
    }

    #[test]
    fn normalize_is_idempotent() {
        let once = IdentityGraph::normalize("Foo@Bar.com");
        let twice = IdentityGraph::normalize(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn find_inserts_singleton_and_returns_self() {
        let g = IdentityGraph::new();
        assert_eq!(g.find("user:u1"), "user:u1");
    }

    #[test]
    fn union_makes_find_agree() {
        let g = IdentityGraph::new();
        g.union("user:u1", "email:a@b.com");
        assert_eq!(g.find("user:u1"), g.find("email:a@b.com"));
    }

    #[test]
    fn union_transitivity() {
        let g = IdentityGraph::new();
        g.union("user:a", "user:b");
        g.union("user:b", "user:c");
        assert_eq!(g.find("user:a"), g.find("user:c"));
    }

    #[test]
    fn canonical_id_stable_across_permutations() {
        let ids = vec!["user:u1".to_string(), "email:a@b.com".to_string(), "anon:anon1".to_string()];
        let g1 = IdentityGraph::new();
        let (c1, _) = g1.canonical_id_for(&ids);

        let mut reordered = ids.clone();
        reordered.reverse();
        let g2 = IdentityGraph::new();
        let (c2, _) = g2.canonical_id_for(&reordered);

        assert_eq!(c1, c2);
    }

    #[test]
    fn equal_rank_tie_break_is_lexicographic() {
        let g = IdentityGraph::new();
        // Both singletons, rank 0 — smaller string becomes root.
        g.union("user:bbb", "user:aaa");
        assert_eq!(g.find("user:bbb"), "user:aaa");
    }

    #[test]
    fn invalid_identifier_degrades_to_user_scheme() {
        let id = IdentityGraph::normalize("not-an-email-or-anon");
        assert_eq!(id, "user:not-an-email-or-anon");
    }

    #[test]
    fn union_reports_absorbed_and_surviving_root() {
        let g = IdentityGraph::new();
        let merge = g.union("user:bbb", "user:aaa");
        assert_eq!(merge, Some(("user:bbb".to_string(), "user:aaa".to_string())));
    }

    #[test]
    fn union_of_already_merged_pair_reports_no_merge() {
        let g = IdentityGraph::new();
        g.union("user:a", "user:b");
        assert_eq!(g.union("user:a", "user:b"), None);
    }

    #[test]
    fn growth_does_not_move_existing_roots() {
        let g = IdentityGraph::new();
        g.union("user:a", "user:b");
        let root_before = g.find("user:a");
        // Force several resizes by interning many fresh singletons.
        for i in 0..64 {
            g.find(&format!("user:fresh{i}"));
        }
        assert_eq!(g.find("user:a"), root_before);
        assert_eq!(g.find("user:b"), root_before);
    }

    #[test]
    fn canonical_id_for_reports_every_merge_in_a_chain() {
        let g = IdentityGraph::new();
        let ids = vec!["user:u1".to_string(), "email:a@b.com".to_string(), "anon:anon1".to_string()];
        let (_, merges) = g.canonical_id_for(&ids);
        assert_eq!(merges.len(), 2);
    }
}
