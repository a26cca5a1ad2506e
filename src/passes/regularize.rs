// SPDX-License-Identifier: Apache-2.0

//! Regularization.
//!
//! Ensures intermediate values with multiple consumers are materialized
//! through named variables (reusing an existing fully-driven variable where
//! one exists, minting a deterministic temporary otherwise), so later stages
//! can assume shared values always have an explicit name.
//!
//! On the final run it additionally splits overly wide concatenation drivers
//! of variables into multiple partial drivers, preferring storage-word
//! boundaries, to bound the size of any single generated assignment. Doing
//! this earlier would be wasted work: the next optimization round would just
//! coalesce the pieces again.

use crate::ast::{Direction, Module};
use crate::dfg::{DfgGraph, VertexId, VertexKind};
use crate::kind::BinaryOp;
use crate::loc::Loc;
use crate::passes::OptContext;

/// Bit alignment preferred when splitting wide concatenations; matches the
/// storage word of the value representation.
const SPLIT_WORD_BITS: u32 = 64;

fn is_concat(dfg: &DfgGraph, vtx: VertexId) -> bool {
    matches!(*dfg.kind(vtx), VertexKind::Binary(BinaryOp::Concat))
}

fn needs_variable(dfg: &DfgGraph, vtx: VertexId, last_run: bool, limit: u32) -> bool {
    // Bit selects applied directly to a variable are plain references into
    // existing storage; they never need their own name.
    if let VertexKind::Sel { .. } = dfg.kind(vtx) {
        if dfg.source(vtx, 0).is_some_and(|from| dfg.is_var(from)) {
            return false;
        }
    }
    if dfg.has_multiple_sinks(vtx) {
        return true;
    }
    // Roots of over-wide concat trees get a variable so the driver can be
    // split below.
    if last_run && is_concat(dfg, vtx) && dfg.width(vtx) > limit {
        return match dfg.single_sink(vtx) {
            Some(sink) => !is_concat(dfg, sink),
            None => true,
        };
    }
    false
}

pub fn regularize(dfg: &mut DfgGraph, module: &mut Module, ctx: &mut OptContext, last_run: bool) {
    let limit = ctx.config.wide_concat_limit;
    let tmp_prefix = format!("__VdfgRegularize_{}_", ctx.tmp_prefix(dfg.name()));
    let mut n_tmps = 0usize;

    // Ensure intermediate values are written to variables.
    let ids = dfg.vertex_ids();
    for vtx in ids {
        if !dfg.is_valid(vtx) {
            continue;
        }
        if dfg.is_var(vtx) || dfg.is_const(vtx) {
            continue;
        }
        if !needs_variable(dfg, vtx, last_run, limit) {
            continue;
        }

        match dfg.result_var(vtx) {
            Some(canon) => {
                // Reuse the existing variable: detach its driver (this very
                // vertex), point every consumer at the variable, then hook
                // the vertex back up as the sole driver.
                debug_assert_eq!(dfg.full_driver(canon), Some(vtx));
                let driver_loc = dfg.drivers(canon)[0].loc;
                dfg.reset_var_sources(canon);
                dfg.replace_with(vtx, canon);
                dfg.add_driver(canon, 0, driver_loc, vtx);
            }
            None => {
                let name = format!("{}{}", tmp_prefix, n_tmps);
                n_tmps += 1;
                let loc = dfg.loc(vtx);
                let width = dfg.width(vtx);
                let var = module.add_var(name.clone(), width, Direction::None, loc);
                let canon = dfg.new_var(var, name, width, loc);
                dfg.replace_with(vtx, canon);
                dfg.relink_source(canon, 0, Some(vtx));
                ctx.stats.temporaries_introduced += 1;
            }
        }
    }

    // Only split concats on the last run.
    if !last_run {
        return;
    }

    let ids = dfg.vertex_ids();
    for vtx in ids {
        if !dfg.is_valid(vtx) || !dfg.is_var(vtx) {
            continue;
        }
        let arity = dfg.arity(vtx);
        let current: Vec<(Loc, u32, Option<VertexId>)> = (0..arity)
            .map(|slot| {
                let info = dfg.drivers(vtx)[slot];
                (info.loc, info.lsb, dfg.source(vtx, slot))
            })
            .collect();
        if !current.iter().any(|(_, _, src)| src.is_some()) {
            continue; // undriven; nothing to rebuild
        }
        let any_wide = current.iter().any(|(_, _, src)| {
            src.is_some_and(|s| is_concat(dfg, s) && dfg.width(s) > limit)
        });
        if !any_wide {
            continue;
        }

        let mut drivers: Vec<(Loc, u32, VertexId)> = Vec::new();
        dfg.reset_var_sources(vtx);
        for (loc, lsb, src) in current {
            let Some(src) = src else { continue };
            if is_concat(dfg, src) && dfg.width(src) > limit {
                split_driver(dfg, ctx, src, loc, lsb, limit, &mut drivers);
            } else {
                drivers.push((loc, lsb, src));
            }
        }
        for (loc, lsb, src) in drivers {
            dfg.add_driver(vtx, lsb, loc, src);
        }
    }
}

/// Gathers the leaf terms of a concat tree right to left (lsb first),
/// deleting the interior concat nodes. Shared interior nodes are treated as
/// leaves; after the materialization phase they have their own variable.
fn deconstruct_concat(
    dfg: &mut DfgGraph,
    vtx: VertexId,
    offset: u32,
    terms: &mut Vec<(VertexId, u32)>,
) -> u32 {
    // The parent edge is already detached, so an unshared interior node has
    // no sinks left; anything still consumed elsewhere stays a leaf.
    if is_concat(dfg, vtx) && !dfg.has_sinks(vtx) {
        let rhs = dfg.source(vtx, 1).expect("concat without rhs");
        let lhs = dfg.source(vtx, 0).expect("concat without lhs");
        let offset = deconstruct_concat(dfg, rhs, offset, terms);
        let offset = deconstruct_concat(dfg, lhs, offset, terms);
        dfg.unlink_delete(vtx);
        return offset;
    }
    terms.push((vtx, offset));
    offset + dfg.width(vtx)
}

/// Splits one wide concatenation driver into chunked drivers no wider than
/// `limit`, breaking at word-aligned term boundaries where one exists.
fn split_driver(
    dfg: &mut DfgGraph,
    ctx: &mut OptContext,
    root: VertexId,
    loc: Loc,
    lsb: u32,
    limit: u32,
    out: &mut Vec<(Loc, u32, VertexId)>,
) {
    let rhs = dfg.source(root, 1).expect("concat without rhs");
    let lhs = dfg.source(root, 0).expect("concat without lhs");
    // Detach the root first so its children see it gone.
    dfg.unlink_delete(root);

    let mut terms: Vec<(VertexId, u32)> = Vec::new();
    let offset = deconstruct_concat(dfg, rhs, lsb, &mut terms);
    let end_offset = deconstruct_concat(dfg, lhs, offset, &mut terms);

    let n = terms.len();
    let offset_at = |i: usize| if i < n { terms[i].1 } else { end_offset };

    let mut make_driver = |dfg: &mut DfgGraph, begin: usize, end: usize| {
        assert!(end > begin, "empty driver chunk");
        let mut driver = terms[begin].0;
        for &(term, _) in &terms[begin + 1..end] {
            let width = dfg.width(term) + dfg.width(driver);
            let cat = dfg.new_binary(BinaryOp::Concat, width, loc);
            dfg.relink_source(cat, 0, Some(term));
            dfg.relink_source(cat, 1, Some(driver));
            driver = cat;
        }
        debug_assert!(
            end == begin + 1 || dfg.width(driver) <= limit,
            "split chunk exceeds the configured limit"
        );
        out.push((loc, terms[begin].1, driver));
        ctx.stats.concats_split += 1;
    };

    // Emit ranges not wider than the limit (except unsplittable single
    // terms), preferring to break where a term starts on a word boundary.
    let mut begin = 0usize;
    let mut end = 0usize;
    let mut boundary = 0usize;
    loop {
        end += 1;
        if end > n {
            break;
        }
        if offset_at(end) - offset_at(begin) <= limit {
            if offset_at(end) % SPLIT_WORD_BITS == 0 {
                boundary = end;
            }
            continue;
        }
        if end == begin + 1 {
            // Single over-wide term; emit as is.
        } else if boundary > begin {
            end = boundary;
        } else {
            end -= 1;
        }
        make_driver(dfg, begin, end);
        begin = end;
        boundary = 0;
    }
    if begin < n {
        make_driver(dfg, begin, n);
    }
}
