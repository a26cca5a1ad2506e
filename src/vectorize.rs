// SPDX-License-Identifier: Apache-2.0

//! SLP-style vectorization.
//!
//! Combines bit-adjacent, isomorphic scalar operations into single wider
//! vector operations. The pass proceeds by forming 'packs': every vertex
//! belongs to at most one pack, linked through per-vertex low/high
//! neighbour pointers in bit-index order. Initial packs are adjacent
//! bit-selects of a common source; packs are then extended through sinks
//! while the operand positions match and no path exists between the
//! prospective members (packing reachable vertices would create a cycle).
//! Finally each pack is replaced by one wide operation, non-packed
//! consumers are given unpacking bit-selects, and the originals deleted.

use std::collections::{HashMap, HashSet};

use crate::dfg::{DfgGraph, SinkRef, VertexId, VertexKind};
use crate::kind::BinaryOp;
use crate::passes::{OptContext, peephole};

#[derive(Default)]
struct Vectorizer {
    /// Lower / higher bit-index neighbour within a pack.
    lo: HashMap<VertexId, VertexId>,
    hi: HashMap<VertexId, VertexId>,
    /// Longest path from the leaves; sinks rank strictly above sources.
    rank: HashMap<VertexId, u32>,
    /// Pack start vertices (lowest bit index member of each pack).
    packs: Vec<VertexId>,
    /// Pack member -> (vectorized vertex, lsb offset within it).
    vec_map: HashMap<VertexId, (VertexId, u32)>,
}

pub fn vectorize(dfg: &mut DfgGraph, ctx: &mut OptContext) {
    let mut v = Vectorizer::default();
    v.construct_initial_packs(dfg, ctx);
    if v.packs.is_empty() {
        return;
    }
    v.dump(dfg, ctx, "vectorize-initial");
    v.extend_packs_through_sinks(dfg, ctx);
    v.dump(dfg, ctx, "vectorize-extended");
    v.convert_packs(dfg, ctx);
    v.dump(dfg, ctx, "vectorize-converted");
    // The retrofitted selects and concatenations are prime simplification
    // targets; run one more peephole round over the result.
    peephole::peephole(dfg, ctx);
}

fn can_vectorize(dfg: &DfgGraph, vtx: VertexId) -> bool {
    match *dfg.kind(vtx) {
        VertexKind::Unary(op) => op.is_vectorizable(),
        VertexKind::Binary(op) => op.is_vectorizable(),
        _ => false,
    }
}

fn same_op(dfg: &DfgGraph, a: VertexId, b: VertexId) -> bool {
    match (dfg.kind(a), dfg.kind(b)) {
        (VertexKind::Unary(oa), VertexKind::Unary(ob)) => oa == ob,
        (VertexKind::Binary(oa), VertexKind::Binary(ob)) => oa == ob,
        _ => false,
    }
}

impl Vectorizer {
    fn is_pack_start(&self, vtx: VertexId) -> bool {
        self.hi.contains_key(&vtx) && !self.lo.contains_key(&vtx)
    }

    fn is_pack_member(&self, vtx: VertexId) -> bool {
        self.hi.contains_key(&vtx) || self.lo.contains_key(&vtx)
    }

    /// Longest-path-from-leaves rank, computed demand-driven with an
    /// explicit stack.
    fn rank(&mut self, dfg: &DfgGraph, vtx: VertexId) -> u32 {
        if let Some(&r) = self.rank.get(&vtx) {
            return r;
        }
        let mut stack = vec![vtx];
        while let Some(&top) = stack.last() {
            if self.rank.contains_key(&top) {
                stack.pop();
                continue;
            }
            let mut ready = true;
            let mut max = 0u32;
            for slot in 0..dfg.arity(top) {
                if let Some(src) = dfg.source(top, slot) {
                    match self.rank.get(&src) {
                        Some(&r) => max = max.max(r + 1),
                        None => {
                            stack.push(src);
                            ready = false;
                        }
                    }
                }
            }
            if ready {
                self.rank.insert(top, max);
                stack.pop();
            }
        }
        self.rank[&vtx]
    }

    /// Whether a directed path exists from one vertex to the other (in
    /// either orientation). Rank-bounded sink traversal: a sink always
    /// ranks strictly above its source, so the search never walks past the
    /// target's rank.
    fn path_exists(&mut self, dfg: &DfgGraph, a: VertexId, b: VertexId) -> bool {
        if a == b {
            return true;
        }
        let ra = self.rank(dfg, a);
        let rb = self.rank(dfg, b);
        if ra == rb {
            return false;
        }
        let (from, to) = if ra < rb { (a, b) } else { (b, a) };
        let to_rank = self.rank(dfg, to);
        let mut stack = vec![from];
        let mut visited: HashSet<VertexId> = HashSet::new();
        while let Some(cur) = stack.pop() {
            if cur == to {
                return true;
            }
            if !visited.insert(cur) {
                continue;
            }
            if self.rank(dfg, cur) >= to_rank {
                continue;
            }
            for sink_ref in dfg.sinks(cur) {
                stack.push(sink_ref.sink);
            }
        }
        false
    }

    /// Groups single-use bit-selects by the vertex they select from, and
    /// links exactly-adjacent ones into the initial packs.
    fn construct_initial_packs(&mut self, dfg: &DfgGraph, ctx: &mut OptContext) {
        let mut groups: HashMap<VertexId, Vec<VertexId>> = HashMap::new();
        // Group keys in first-seen order, for deterministic enumeration.
        let mut fromps: Vec<VertexId> = Vec::new();

        for vtx in dfg.iter_ids() {
            // Only single-use sub-expressions are vectorized, to avoid
            // excessive unpacking.
            if dfg.single_sink(vtx).is_none() {
                continue;
            }
            if let VertexKind::Sel { .. } = dfg.kind(vtx) {
                let from = dfg.source(vtx, 0).expect("sel without source");
                let group = groups.entry(from).or_default();
                if group.is_empty() {
                    fromps.push(from);
                }
                group.push(vtx);
            }
        }

        for from in fromps {
            let mut sels = groups.remove(&from).unwrap();
            if sels.len() <= 1 {
                continue;
            }
            // Stable, so equal lsbs keep insertion order.
            sels.sort_by_key(|&sel| dfg.sel_lsb(sel));

            let mut prev = sels[0];
            for &curr in &sels[1..] {
                if !self.hi.contains_key(&prev)
                    && dfg.sel_lsb(curr) == dfg.sel_lsb(prev) + dfg.width(prev)
                    && !self.lo.contains_key(&curr)
                {
                    self.hi.insert(prev, curr);
                    self.lo.insert(curr, prev);
                    // If the previous select is the lowest, a new pack starts.
                    if !self.lo.contains_key(&prev) {
                        ctx.stats.initial_packs += 1;
                        self.packs.push(prev);
                    }
                }
                prev = curr;
            }
        }
    }

    /// Work-list pack extension: for each adjacent member pair, try to pack
    /// their consumers as well. Newly formed packs go back on the list, so
    /// the extension runs to a fixed point.
    fn extend_packs_through_sinks(&mut self, dfg: &DfgGraph, ctx: &mut OptContext) {
        let mut work = std::mem::take(&mut self.packs);
        self.packs.reserve(work.len());
        while let Some(start) = work.pop() {
            debug_assert!(self.is_pack_start(start), "work item must start a pack");
            self.packs.push(start);
            let mut curr = start;
            loop {
                let Some(&next) = self.hi.get(&curr) else {
                    break;
                };
                self.try_pack_sinks(dfg, ctx, curr, next, &mut work);
                curr = next;
            }
        }
    }

    fn try_pack_sinks(
        &mut self,
        dfg: &DfgGraph,
        ctx: &mut OptContext,
        curr: VertexId,
        next: VertexId,
        work: &mut Vec<VertexId>,
    ) {
        // Only pack sinks that are the single consumer and themselves have
        // a single consumer; anything else needs too much unpacking.
        let Some(sink_curr) = dfg.single_sink(curr) else {
            return;
        };
        if !can_vectorize(dfg, sink_curr) || dfg.single_sink(sink_curr).is_none() {
            return;
        }
        let Some(sink_next) = dfg.single_sink(next) else {
            return;
        };
        if !same_op(dfg, sink_next, sink_curr) || dfg.single_sink(sink_next).is_none() {
            return;
        }
        // The high-side sink must be entirely unpacked; the low-side one may
        // be the top of a growing pack, but must not have a high neighbour.
        if self.is_pack_member(sink_next) {
            return;
        }
        // Possibly the same vertex, e.g. a[0] & a[1].
        if sink_next == sink_curr {
            return;
        }
        // A path between the sinks, e.g. (a[0] & _) & a[1], would turn into
        // a combinational cycle if packed.
        if self.path_exists(dfg, sink_next, sink_curr) {
            return;
        }
        // Only vectorize operands in the same position: (a[0] & _, a[1] & _)
        // but not (a[0] & _, _ & a[1]). Commutativity is deliberately not
        // exploited; conversion relies on positional correspondence.
        let idx_curr = dfg
            .source_index(curr, sink_curr)
            .expect("member is not an operand of its sink");
        let idx_next = dfg
            .source_index(next, sink_next)
            .expect("member is not an operand of its sink");
        if idx_curr != idx_next {
            return;
        }
        if self.hi.contains_key(&sink_curr) || self.lo.contains_key(&sink_next) {
            return;
        }
        self.hi.insert(sink_curr, sink_next);
        self.lo.insert(sink_next, sink_curr);
        // If this sink is the lowest member, it starts a new pack.
        if !self.lo.contains_key(&sink_curr) {
            ctx.stats.sink_packs += 1;
            work.push(sink_curr);
        }
    }

    fn pack_width(&self, dfg: &DfgGraph, start: VertexId) -> u32 {
        debug_assert!(self.is_pack_start(start), "not a pack start");
        let mut width = 0;
        let mut curr = Some(start);
        while let Some(vtx) = curr {
            width += dfg.width(vtx);
            curr = self.hi.get(&vtx).copied();
        }
        width
    }

    /// Lazily constructs (memoized) the vectorized vertex for a pack
    /// member; returns it together with the member's lsb offset within it.
    fn vectorized(&mut self, dfg: &mut DfgGraph, vtx: VertexId) -> (VertexId, u32) {
        debug_assert!(self.is_pack_member(vtx), "not a pack member");
        if let Some(&pair) = self.vec_map.get(&vtx) {
            return pair;
        }
        // Rewind to the head of the pack, accumulating the offset.
        let mut lsb = 0;
        let mut head = vtx;
        while let Some(&prev) = self.lo.get(&head) {
            lsb += dfg.width(prev);
            head = prev;
        }
        let pair = if lsb != 0 {
            (self.vectorized(dfg, head).0, lsb)
        } else {
            let width = self.pack_width(dfg, head);
            let loc = dfg.loc(head);
            let vec = match *dfg.kind(head) {
                // The select's from/lsb are connected during conversion.
                VertexKind::Sel { .. } => dfg.new_sel(0, width, loc),
                VertexKind::Unary(op) => dfg.new_unary(op, width, loc),
                VertexKind::Binary(op) => dfg.new_binary(op, width, loc),
                _ => panic!("non-vectorizable pack head {}", head),
            };
            (vec, 0)
        };
        self.vec_map.insert(vtx, pair);
        pair
    }

    /// Builds the `slot` operand of the vectorized vertex for the pack
    /// starting at `start`, concatenating per-member inputs with selection
    /// or truncation where a source is itself (part of) a pack.
    fn input_pack(&mut self, dfg: &mut DfgGraph, start: VertexId, slot: usize) -> VertexId {
        debug_assert!(self.is_pack_start(start), "not a pack start");
        let mut terms: Vec<VertexId> = Vec::new();
        let mut remaining = self.pack_width(dfg, start);
        let mut vtx = Some(start);
        while remaining > 0 {
            let member = vtx.expect("ran past the end of the pack");
            let src = dfg
                .source(member, slot)
                .expect("pack member without operand");
            let loc = dfg.loc(src);
            let mut term_width;
            if self.is_pack_start(src) {
                let (vec_src, off) = self.vectorized(dfg, src);
                debug_assert_eq!(off, 0, "pack start with nonzero offset");
                if dfg.width(vec_src) > remaining {
                    // The vectorized source is wider than needed; truncate.
                    term_width = remaining;
                    let sel = dfg.new_sel(0, remaining, loc);
                    dfg.relink_source(sel, 0, Some(vec_src));
                    terms.push(sel);
                } else {
                    term_width = dfg.width(vec_src);
                    terms.push(vec_src);
                }
            } else if self.is_pack_member(src) {
                let (vec_src, off) = self.vectorized(dfg, src);
                debug_assert!(off > 0, "mid-pack member with zero offset");
                term_width = (dfg.width(vec_src) - off).min(remaining);
                let sel = dfg.new_sel(off, term_width, loc);
                dfg.relink_source(sel, 0, Some(vec_src));
                terms.push(sel);
            } else {
                term_width = dfg.width(src);
                terms.push(src);
            }
            remaining -= term_width;
            // Skip the pack members covered by the term just added.
            loop {
                let member = vtx.expect("term wider than the remaining pack");
                let mw = dfg.width(member);
                debug_assert!(term_width >= mw, "term narrower than pack member");
                term_width -= mw;
                vtx = self.hi.get(&member).copied();
                if term_width == 0 {
                    break;
                }
            }
        }

        // Concatenate the terms; terms[0] holds the least significant bits.
        let mut result = terms.pop().expect("empty input pack");
        while let Some(term) = terms.pop() {
            let width = dfg.width(result) + dfg.width(term);
            let loc = dfg.loc(term);
            let cat = dfg.new_binary(BinaryOp::Concat, width, loc);
            dfg.relink_source(cat, 0, Some(result));
            dfg.relink_source(cat, 1, Some(term));
            result = cat;
        }
        result
    }

    fn convert_packs(&mut self, dfg: &mut DfgGraph, ctx: &mut OptContext) {
        // Create and connect the vectorized vertices.
        let packs = self.packs.clone();
        for &start in &packs {
            debug_assert!(self.is_pack_start(start), "not a pack start");
            ctx.stats.converted_packs += 1;
            match *dfg.kind(start) {
                VertexKind::Sel { lsb } => {
                    let from = dfg.source(start, 0).expect("sel without source");
                    let (vec, _) = self.vectorized(dfg, start);
                    dfg.relink_source(vec, 0, Some(from));
                    dfg.set_sel_lsb(vec, lsb);
                }
                VertexKind::Unary(_) => {
                    let (vec, _) = self.vectorized(dfg, start);
                    let input = self.input_pack(dfg, start, 0);
                    dfg.relink_source(vec, 0, Some(input));
                }
                VertexKind::Binary(_) => {
                    let (vec, _) = self.vectorized(dfg, start);
                    let lhs = self.input_pack(dfg, start, 0);
                    dfg.relink_source(vec, 0, Some(lhs));
                    let rhs = self.input_pack(dfg, start, 1);
                    dfg.relink_source(vec, 1, Some(rhs));
                }
                _ => panic!("non-vectorizable pack start {}", start),
            }
        }

        // Retrofit unpacking selects for consumers outside any pack.
        for &start in &packs {
            let (vec, _) = self.vectorized(dfg, start);
            let mut lsb = 0;
            let mut curr = Some(start);
            while let Some(member) = curr {
                let next = self.hi.get(&member).copied();
                let mut unpack: Option<VertexId> = None;
                let sink_refs: Vec<SinkRef> = dfg.sinks(member).to_vec();
                for sink_ref in sink_refs {
                    // Pack inputs were rebuilt above; they need no unpacking.
                    if self.is_pack_member(sink_ref.sink) {
                        continue;
                    }
                    let sel = *unpack.get_or_insert_with(|| {
                        let sel = dfg.new_sel(lsb, dfg.width(member), dfg.loc(member));
                        dfg.relink_source(sel, 0, Some(vec));
                        sel
                    });
                    dfg.relink_source(sink_ref.sink, sink_ref.slot as usize, Some(sel));
                }
                lsb += dfg.width(member);
                curr = next;
            }
        }

        // Finally delete the replaced pack members.
        for &start in &packs {
            let mut chain = Vec::new();
            let mut curr = Some(start);
            while let Some(member) = curr {
                chain.push(member);
                curr = self.hi.get(&member).copied();
            }
            for member in chain {
                dfg.unlink_delete(member);
            }
        }
    }

    fn dump(&self, dfg: &DfgGraph, ctx: &OptContext, label: &str) {
        if ctx.config.dump_level < 3 {
            return;
        }
        let Some(dir) = &ctx.config.dump_dir else {
            return;
        };
        let clusters: Vec<Vec<VertexId>> = self
            .packs
            .iter()
            .map(|&start| {
                let mut chain = Vec::new();
                let mut curr = Some(start);
                while let Some(member) = curr {
                    chain.push(member);
                    curr = self.hi.get(&member).copied();
                }
                chain
            })
            .collect();
        if let Err(err) = crate::dump::dump_dot_file_with_packs(dfg, dir, label, &clusters) {
            log::warn!("cannot dump '{}-{}': {}", dfg.name(), label, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VarId;
    use crate::loc::Loc;
    use crate::passes::DfgConfig;

    /// The canonical example: a[0] = b[0] & c[0]; a[1] = b[1] & c[1], with
    /// separate single-bit result variables.
    fn bit_blasted_and(dfg: &mut DfgGraph) -> (VertexId, VertexId, Vec<VertexId>) {
        let b = dfg.new_var(VarId(0), "b", 2, Loc::none());
        let c = dfg.new_var(VarId(1), "c", 2, Loc::none());
        let mut outs = Vec::new();
        for i in 0..2u32 {
            let sb = dfg.new_sel(i, 1, Loc::none());
            dfg.relink_source(sb, 0, Some(b));
            let sc = dfg.new_sel(i, 1, Loc::none());
            dfg.relink_source(sc, 0, Some(c));
            let and = dfg.new_binary(BinaryOp::And, 1, Loc::none());
            dfg.relink_source(and, 0, Some(sb));
            dfg.relink_source(and, 1, Some(sc));
            let o = dfg.new_var(VarId(2 + i), format!("a{}", i), 1, Loc::none());
            dfg.relink_source(o, 0, Some(and));
            outs.push(o);
        }
        (b, c, outs)
    }

    #[test]
    fn test_packs_adjacent_selects_and_sinks() {
        let mut dfg = DfgGraph::new("m", "g");
        let (_b, _c, outs) = bit_blasted_and(&mut dfg);
        let config = DfgConfig::default();
        let mut ctx = OptContext::new(&config);
        vectorize(&mut dfg, &mut ctx);
        dfg.debug_check();
        // Two select packs (over b and c) extended through the ANDs.
        assert_eq!(ctx.stats.initial_packs, 2);
        assert_eq!(ctx.stats.sink_packs, 1);
        assert_eq!(ctx.stats.converted_packs, 3);
        // Exactly one AND remains and it is 2 bits wide.
        let ands: Vec<VertexId> = dfg
            .iter_ids()
            .filter(|&v| matches!(*dfg.kind(v), VertexKind::Binary(BinaryOp::And)))
            .collect();
        assert_eq!(ands.len(), 1);
        assert_eq!(dfg.width(ands[0]), 2);
        // Each output still reads a 1-bit value.
        for (i, &o) in outs.iter().enumerate() {
            let driver = dfg.source(o, 0).unwrap();
            assert_eq!(dfg.width(driver), 1);
            assert!(
                matches!(*dfg.kind(driver), VertexKind::Sel { lsb } if lsb == i as u32),
                "output {} driver: {:?}",
                i,
                dfg.kind(driver)
            );
        }
    }

    #[test]
    fn test_no_packing_across_reachability() {
        // (b[0] & x) where x depends on b[1]'s sink would create a cycle;
        // here: and0 = b[0] & c[0]; and1 = b[1] & and0-dependent value.
        let mut dfg = DfgGraph::new("m", "g");
        let b = dfg.new_var(VarId(0), "b", 2, Loc::none());
        let c = dfg.new_var(VarId(1), "c", 1, Loc::none());
        let s0 = dfg.new_sel(0, 1, Loc::none());
        dfg.relink_source(s0, 0, Some(b));
        let s1 = dfg.new_sel(1, 1, Loc::none());
        dfg.relink_source(s1, 0, Some(b));
        let and0 = dfg.new_binary(BinaryOp::And, 1, Loc::none());
        dfg.relink_source(and0, 0, Some(s0));
        dfg.relink_source(and0, 1, Some(c));
        // and1 consumes and0: a path exists from and0 to and1.
        let and1 = dfg.new_binary(BinaryOp::And, 1, Loc::none());
        dfg.relink_source(and1, 0, Some(s1));
        dfg.relink_source(and1, 1, Some(and0));
        let o = dfg.new_var(VarId(2), "o", 1, Loc::none());
        dfg.relink_source(o, 0, Some(and1));

        let config = DfgConfig::default();
        let mut ctx = OptContext::new(&config);
        vectorize(&mut dfg, &mut ctx);
        dfg.debug_check();
        // The selects pack, but the sinks must not.
        assert_eq!(ctx.stats.sink_packs, 0);
    }

    #[test]
    fn test_operand_position_restriction() {
        // a[0] & x next to x & a[1]: commutative, but operand positions
        // differ, so the sinks are not packed.
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 2, Loc::none());
        let x = dfg.new_var(VarId(1), "x", 1, Loc::none());
        let y = dfg.new_var(VarId(2), "y", 1, Loc::none());
        let s0 = dfg.new_sel(0, 1, Loc::none());
        dfg.relink_source(s0, 0, Some(a));
        let s1 = dfg.new_sel(1, 1, Loc::none());
        dfg.relink_source(s1, 0, Some(a));
        let and0 = dfg.new_binary(BinaryOp::And, 1, Loc::none());
        dfg.relink_source(and0, 0, Some(s0)); // position 0
        dfg.relink_source(and0, 1, Some(x));
        let and1 = dfg.new_binary(BinaryOp::And, 1, Loc::none());
        dfg.relink_source(and1, 0, Some(y));
        dfg.relink_source(and1, 1, Some(s1)); // position 1
        let o0 = dfg.new_var(VarId(3), "o0", 1, Loc::none());
        dfg.relink_source(o0, 0, Some(and0));
        let o1 = dfg.new_var(VarId(4), "o1", 1, Loc::none());
        dfg.relink_source(o1, 0, Some(and1));

        let config = DfgConfig::default();
        let mut ctx = OptContext::new(&config);
        vectorize(&mut dfg, &mut ctx);
        dfg.debug_check();
        assert_eq!(ctx.stats.sink_packs, 0);
    }

    #[test]
    fn test_multi_sink_selects_not_packed() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 2, Loc::none());
        let s0 = dfg.new_sel(0, 1, Loc::none());
        dfg.relink_source(s0, 0, Some(a));
        let s1 = dfg.new_sel(1, 1, Loc::none());
        dfg.relink_source(s1, 0, Some(a));
        // s0 has two consumers.
        let o0 = dfg.new_var(VarId(1), "o0", 1, Loc::none());
        dfg.relink_source(o0, 0, Some(s0));
        let o1 = dfg.new_var(VarId(2), "o1", 1, Loc::none());
        dfg.relink_source(o1, 0, Some(s0));
        let o2 = dfg.new_var(VarId(3), "o2", 1, Loc::none());
        dfg.relink_source(o2, 0, Some(s1));

        let config = DfgConfig::default();
        let mut ctx = OptContext::new(&config);
        vectorize(&mut dfg, &mut ctx);
        assert_eq!(ctx.stats.initial_packs, 0);
    }
}
