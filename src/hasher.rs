// SPDX-License-Identifier: Apache-2.0

//! Structural equality and hashing over vertex subtrees.
//!
//! Both operations memoize per vertex (pair) so shared fan-in is visited
//! once per invocation, not once per path. The caches are keyed by vertex
//! handle and are only valid while the upstream (source-side) subgraph is
//! unchanged: drop the `VertexHasher` after any structural mutation of the
//! region it has seen.
//!
//! Variable vertices hash and compare by variable identity alone, never
//! through their driver. Everything else recurses position-sensitively over
//! its sources.

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};

use crate::dfg::{DfgGraph, VertexId, VertexKind};

/// Fixed seeds so hash values are stable run to run. Correctness never
/// depends on the values: every hash consumer verifies with `equals`.
const SEEDS: (u64, u64, u64, u64) = (
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

pub struct VertexHasher {
    build: ahash::RandomState,
    hash_cache: HashMap<VertexId, u64, ahash::RandomState>,
    equals_cache: HashMap<(VertexId, VertexId), bool, ahash::RandomState>,
}

impl Default for VertexHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl VertexHasher {
    pub fn new() -> Self {
        let build = ahash::RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3);
        Self {
            build,
            hash_cache: HashMap::with_hasher(ahash::RandomState::with_seeds(
                SEEDS.1, SEEDS.2, SEEDS.3, SEEDS.0,
            )),
            equals_cache: HashMap::with_hasher(ahash::RandomState::with_seeds(
                SEEDS.2, SEEDS.3, SEEDS.0, SEEDS.1,
            )),
        }
    }

    /// Structural hash of the subtree rooted at `id`. Structurally equal
    /// vertices hash equal; the converse may not hold.
    pub fn hash(&mut self, dfg: &DfgGraph, id: VertexId) -> u64 {
        if let Some(&cached) = self.hash_cache.get(&id) {
            return cached;
        }
        let mut state = self.build.build_hasher();
        state.write_u32(dfg.width(id));
        match dfg.kind(id) {
            VertexKind::Const(value) => {
                state.write_u8(0);
                value.hash(&mut state);
            }
            VertexKind::Var(info) => {
                // Defined by identity; sources deliberately not hashed.
                state.write_u8(1);
                state.write_u32(info.var.0);
            }
            VertexKind::Unary(op) => {
                state.write_u8(2);
                state.write_u8(*op as u8);
                self.hash_sources(dfg, id, &mut state);
            }
            VertexKind::Binary(op) => {
                state.write_u8(3);
                state.write_u8(*op as u8);
                self.hash_sources(dfg, id, &mut state);
            }
            VertexKind::Mux => {
                state.write_u8(4);
                self.hash_sources(dfg, id, &mut state);
            }
            VertexKind::Sel { lsb } => {
                state.write_u8(5);
                state.write_u32(*lsb);
                self.hash_sources(dfg, id, &mut state);
            }
        }
        let result = state.finish();
        self.hash_cache.insert(id, result);
        result
    }

    fn hash_sources(&mut self, dfg: &DfgGraph, id: VertexId, state: &mut impl Hasher) {
        for slot in 0..dfg.arity(id) {
            match dfg.source(id, slot) {
                Some(src) => state.write_u64(self.hash(dfg, src)),
                None => state.write_u8(0xff),
            }
        }
    }

    /// Whether `a` and `b` can be substituted for each other without
    /// changing the semantics of the logic.
    pub fn equals(&mut self, dfg: &DfgGraph, a: VertexId, b: VertexId) -> bool {
        if a == b {
            return true;
        }
        if dfg.width(a) != dfg.width(b) {
            return false;
        }
        let self_equal = match (dfg.kind(a), dfg.kind(b)) {
            (VertexKind::Const(va), VertexKind::Const(vb)) => va == vb,
            // Distinct variable vertices are distinct storage.
            (VertexKind::Var(ia), VertexKind::Var(ib)) => ia.var == ib.var,
            (VertexKind::Unary(oa), VertexKind::Unary(ob)) => oa == ob,
            (VertexKind::Binary(oa), VertexKind::Binary(ob)) => oa == ob,
            (VertexKind::Mux, VertexKind::Mux) => true,
            (VertexKind::Sel { lsb: la }, VertexKind::Sel { lsb: lb }) => la == lb,
            _ => false,
        };
        if !self_equal {
            return false;
        }
        if matches!(dfg.kind(a), VertexKind::Var(_) | VertexKind::Const(_)) {
            return true;
        }
        let key = if a < b { (a, b) } else { (b, a) };
        if let Some(&cached) = self.equals_cache.get(&key) {
            return cached;
        }
        debug_assert_eq!(dfg.arity(a), dfg.arity(b), "same kind, different arity");
        let mut equal = true;
        for slot in 0..dfg.arity(a) {
            equal = match (dfg.source(a, slot), dfg.source(b, slot)) {
                (Some(sa), Some(sb)) => self.equals(dfg, sa, sb),
                (None, None) => true,
                _ => false,
            };
            if !equal {
                break;
            }
        }
        self.equals_cache.insert(key, equal);
        equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VarId;
    use crate::kind::{BinaryOp, UnaryOp};
    use crate::loc::Loc;
    use crate::value::PackedVal;

    fn loc() -> Loc {
        Loc::none()
    }

    #[test]
    fn test_equal_subtrees_hash_and_compare_equal() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 4, loc());
        let b = dfg.new_var(VarId(1), "b", 4, loc());
        let mk = |dfg: &mut DfgGraph| {
            let and = dfg.new_binary(BinaryOp::And, 4, loc());
            dfg.relink_source(and, 0, Some(a));
            dfg.relink_source(and, 1, Some(b));
            let not = dfg.new_unary(UnaryOp::Not, 4, loc());
            dfg.relink_source(not, 0, Some(and));
            not
        };
        let x = mk(&mut dfg);
        let y = mk(&mut dfg);
        let mut hasher = VertexHasher::new();
        assert_eq!(hasher.hash(&dfg, x), hasher.hash(&dfg, y));
        assert!(hasher.equals(&dfg, x, y));
    }

    #[test]
    fn test_operand_order_is_significant() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 4, loc());
        let b = dfg.new_var(VarId(1), "b", 4, loc());
        let x = dfg.new_binary(BinaryOp::Sub, 4, loc());
        dfg.relink_source(x, 0, Some(a));
        dfg.relink_source(x, 1, Some(b));
        let y = dfg.new_binary(BinaryOp::Sub, 4, loc());
        dfg.relink_source(y, 0, Some(b));
        dfg.relink_source(y, 1, Some(a));
        let mut hasher = VertexHasher::new();
        assert!(!hasher.equals(&dfg, x, y));
    }

    #[test]
    fn test_unconnected_source_mismatch() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 4, loc());
        let x = dfg.new_unary(UnaryOp::Not, 4, loc());
        dfg.relink_source(x, 0, Some(a));
        let y = dfg.new_unary(UnaryOp::Not, 4, loc());
        let mut hasher = VertexHasher::new();
        assert!(!hasher.equals(&dfg, x, y));
        let z = dfg.new_unary(UnaryOp::Not, 4, loc());
        assert!(hasher.equals(&dfg, y, z));
    }

    #[test]
    fn test_var_identity_not_structure() {
        let mut dfg = DfgGraph::new("m", "g");
        let c = dfg.new_const(PackedVal::from_u64(4, 7), loc());
        let a = dfg.new_var(VarId(0), "a", 4, loc());
        dfg.relink_source(a, 0, Some(c));
        let b = dfg.new_var(VarId(1), "b", 4, loc());
        let c2 = dfg.new_const(PackedVal::from_u64(4, 7), loc());
        dfg.relink_source(b, 0, Some(c2));
        // Same driver structure, different storage: not equal.
        let mut hasher = VertexHasher::new();
        assert!(!hasher.equals(&dfg, a, b));
    }

    #[test]
    fn test_shared_fanin_is_linear() {
        // A deep ladder where each level is consumed twice; without the
        // caches this comparison would be exponential.
        let mut dfg = DfgGraph::new("m", "g");
        let base = dfg.new_var(VarId(0), "a", 4, loc());
        let build = |dfg: &mut DfgGraph| {
            let mut cur = base;
            for _ in 0..64 {
                let next = dfg.new_binary(BinaryOp::Xor, 4, loc());
                dfg.relink_source(next, 0, Some(cur));
                dfg.relink_source(next, 1, Some(cur));
                cur = next;
            }
            cur
        };
        let x = build(&mut dfg);
        let y = build(&mut dfg);
        let mut hasher = VertexHasher::new();
        assert_eq!(hasher.hash(&dfg, x), hasher.hash(&dfg, y));
        assert!(hasher.equals(&dfg, x, y));
    }
}
