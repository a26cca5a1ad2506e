// SPDX-License-Identifier: Apache-2.0

//! Dead vertex removal: deletes non-variable vertices with no consumers, to
//! a fixed point (removing a vertex can make its sources newly dead).

use crate::dfg::{DfgGraph, VertexId};
use crate::passes::OptContext;

pub fn remove_unused(dfg: &mut DfgGraph, ctx: &mut OptContext) {
    let mut work: Vec<VertexId> = Vec::new();
    for vtx in dfg.iter_ids() {
        if !dfg.is_var(vtx) && !dfg.has_sinks(vtx) {
            work.push(vtx);
        }
    }
    while let Some(vtx) = work.pop() {
        if !dfg.is_valid(vtx) {
            continue;
        }
        if dfg.is_var(vtx) || dfg.has_sinks(vtx) {
            continue;
        }
        for slot in 0..dfg.arity(vtx) {
            if let Some(src) = dfg.source(vtx, slot) {
                if !dfg.is_var(src) {
                    work.push(src);
                }
            }
        }
        dfg.unlink_delete(vtx);
        ctx.stats.unused_removed += 1;
    }
}
