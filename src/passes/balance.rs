// SPDX-License-Identifier: Apache-2.0

//! Binary tree balancing.
//!
//! Rewrites maximal right-leaning chains of the same associative operator
//! (`a OP (b OP (c OP d))`) into balanced trees by combining adjacent terms
//! pairwise at increasing strides. Only chain roots are rewritten: a vertex
//! interior to a chain is the rhs operand of its single same-operator sink.
//! Locations of synthesized nodes are taken from the original chain nodes.

use crate::dfg::{DfgGraph, VertexId, VertexKind};
use crate::kind::BinaryOp;
use crate::loc::Loc;
use crate::passes::OptContext;

struct Chain {
    op: BinaryOp,
    /// Leaf terms, left to right (for concatenation: msb to lsb).
    terms: Vec<VertexId>,
    /// The original chain nodes, root first.
    nodes: Vec<VertexId>,
    locs: Vec<Loc>,
}

fn chain_op(dfg: &DfgGraph, vtx: VertexId) -> Option<BinaryOp> {
    match *dfg.kind(vtx) {
        VertexKind::Binary(op) if op.is_balanceable() => Some(op),
        _ => None,
    }
}

/// A chain root is a balanceable vertex that does not continue a chain
/// upward: its consumer is a different operator, or it has several
/// consumers, or it sits on the left of its own parent.
fn is_chain_root(dfg: &DfgGraph, vtx: VertexId, op: BinaryOp) -> bool {
    match dfg.single_sink(vtx) {
        Some(sink) => !(chain_op(dfg, sink) == Some(op) && dfg.source(sink, 1) == Some(vtx)),
        None => true,
    }
}

fn collect_chain(dfg: &DfgGraph, root: VertexId, op: BinaryOp) -> Option<Chain> {
    let mut terms = Vec::new();
    let mut nodes = Vec::new();
    let mut locs = Vec::new();
    let mut cur = root;
    loop {
        nodes.push(cur);
        locs.push(dfg.loc(cur));
        let lhs = dfg.source(cur, 0)?;
        let rhs = dfg.source(cur, 1)?;
        terms.push(lhs);
        // Descend while the rhs is an unshared node of the same operator.
        if chain_op(dfg, rhs) == Some(op) && dfg.single_sink(rhs) == Some(cur) {
            cur = rhs;
        } else {
            terms.push(rhs);
            break;
        }
    }
    // A single binary node is already as balanced as it gets.
    if nodes.len() < 2 {
        return None;
    }
    Some(Chain {
        op,
        terms,
        nodes,
        locs,
    })
}

fn rebuild_balanced(dfg: &mut DfgGraph, chain: &Chain) -> VertexId {
    let mut nodes = chain.terms.clone();
    let mut loc_idx = 0usize;
    while nodes.len() > 1 {
        let mut next = Vec::with_capacity(nodes.len() / 2 + 1);
        let mut i = 0;
        while i + 1 < nodes.len() {
            let lhs = nodes[i];
            let rhs = nodes[i + 1];
            let width = if chain.op == BinaryOp::Concat {
                dfg.width(lhs) + dfg.width(rhs)
            } else {
                debug_assert_eq!(dfg.width(lhs), dfg.width(rhs), "unbalanced term widths");
                dfg.width(lhs)
            };
            let loc = chain.locs[loc_idx.min(chain.locs.len() - 1)];
            loc_idx += 1;
            let combined = dfg.new_binary(chain.op, width, loc);
            dfg.relink_source(combined, 0, Some(lhs));
            dfg.relink_source(combined, 1, Some(rhs));
            next.push(combined);
            i += 2;
        }
        if i < nodes.len() {
            next.push(nodes[i]);
        }
        nodes = next;
    }
    nodes[0]
}

pub fn balance(dfg: &mut DfgGraph, ctx: &mut OptContext) {
    // Gather roots first: rewriting never deletes another chain's root, but
    // it does delete chain interiors, so interiors must not be work items.
    let mut roots = Vec::new();
    for vtx in dfg.iter_ids() {
        if let Some(op) = chain_op(dfg, vtx) {
            if is_chain_root(dfg, vtx, op) {
                roots.push((vtx, op));
            }
        }
    }
    for (root, op) in roots {
        if !dfg.is_valid(root) || chain_op(dfg, root) != Some(op) {
            continue;
        }
        if !is_chain_root(dfg, root, op) {
            continue;
        }
        let Some(chain) = collect_chain(dfg, root, op) else {
            continue;
        };
        let new_root = rebuild_balanced(dfg, &chain);
        debug_assert_eq!(
            dfg.width(new_root),
            dfg.width(root),
            "balanced tree changed width"
        );
        dfg.replace_with(root, new_root);
        // The old chain nodes are now unused; delete root-first so each
        // deletion detaches the next node's last sink.
        for &node in &chain.nodes {
            debug_assert!(!dfg.has_sinks(node), "stale sink on replaced chain node");
            dfg.unlink_delete(node);
        }
        ctx.stats.trees_balanced += 1;
        log::trace!(
            "balanced {} chain of {} terms",
            chain.op,
            chain.terms.len()
        );
    }
}
