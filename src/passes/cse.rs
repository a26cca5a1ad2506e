// SPDX-License-Identifier: Apache-2.0

//! Common subexpression elimination.
//!
//! Probes a hash-bucket multimap with the structural hash of each vertex and
//! merges it into the earliest structurally equal vertex found. Hash values
//! are never trusted on their own: every candidate is verified with the
//! cached `equals`. Constants are never merged; which site should own a
//! canonical constant is decided later, by inlining.

use std::collections::HashMap;

use crate::dfg::{DfgGraph, VertexId};
use crate::hasher::VertexHasher;
use crate::passes::OptContext;

pub fn cse(dfg: &mut DfgGraph, ctx: &mut OptContext) {
    let mut hasher = VertexHasher::new();
    let mut buckets: HashMap<u64, Vec<VertexId>, ahash::RandomState> = HashMap::default();

    let mut cursor = dfg.head();
    while let Some(vtx) = cursor {
        cursor = dfg.next_of(vtx);
        if dfg.is_const(vtx) {
            continue;
        }
        let hash = hasher.hash(dfg, vtx);
        let bucket = buckets.entry(hash).or_default();
        let mut merged = false;
        for &candidate in bucket.iter() {
            if hasher.equals(dfg, candidate, vtx) {
                // Merging preserves hashes: every cached hash that went
                // through 'vtx' is equal to the one through 'candidate'.
                dfg.replace_with(vtx, candidate);
                dfg.unlink_delete(vtx);
                ctx.stats.cse_eliminated += 1;
                merged = true;
                break;
            }
        }
        if !merged {
            bucket.push(vtx);
        }
    }
}
