// SPDX-License-Identifier: Apache-2.0

//! Pass orchestration over a `DfgGraph`, plus the configuration surface and
//! the per-run statistics counters.

pub mod balance;
pub mod cse;
pub mod inline_vars;
pub mod peephole;
pub mod regularize;
pub mod remove_unused;
pub mod remove_vars;

use std::collections::HashMap;
use std::hash::BuildHasher;
use std::path::PathBuf;

use serde::Serialize;

use crate::ast::Module;
use crate::ast_to_dfg::ast_to_dfg;
use crate::dfg::DfgGraph;
use crate::dfg_to_ast::{TmpNames, dfg_to_ast};
use crate::dump;
use crate::vectorize::vectorize;

/// Read-only configuration of the optimization pipeline.
#[derive(Debug, Clone)]
pub struct DfgConfig {
    pub peephole: bool,
    pub vectorize: bool,
    /// Concatenation trees wider than this many bits are split into
    /// multiple partial drivers during the final regularization run.
    pub wide_concat_limit: u32,
    /// 0 = no dumps, 2 = per-pass dumps, 3 = vectorizer stage dumps.
    pub dump_level: u8,
    pub dump_dir: Option<PathBuf>,
}

impl Default for DfgConfig {
    fn default() -> Self {
        Self {
            peephole: true,
            vectorize: false,
            wide_concat_limit: 256,
            dump_level: 0,
            dump_dir: None,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct OptStats {
    pub stmts_captured: u64,
    pub stmts_rejected: u64,
    pub cse_eliminated: u64,
    pub peephole_rewrites: u64,
    pub unused_removed: u64,
    pub vars_removed: u64,
    pub trees_balanced: u64,
    pub temporaries_introduced: u64,
    pub concats_split: u64,
    pub initial_packs: u64,
    pub sink_packs: u64,
    pub converted_packs: u64,
}

/// Mutable state threaded through one optimization invocation. All naming
/// state lives here rather than in globals so concurrent invocations over
/// different modules cannot interfere.
pub struct OptContext<'a> {
    pub config: &'a DfgConfig,
    pub stats: OptStats,
    tmp_seq: HashMap<String, u32>,
}

impl<'a> OptContext<'a> {
    pub fn new(config: &'a DfgConfig) -> Self {
        Self {
            config,
            stats: OptStats::default(),
            tmp_seq: HashMap::new(),
        }
    }

    /// Deterministic per-graph stub for temporary variable names. Repeated
    /// requests for the same graph name get distinct sequence numbers.
    pub fn tmp_prefix(&mut self, graph_name: &str) -> String {
        let state = ahash::RandomState::with_seeds(1, 2, 3, 4);
        let hash = state.hash_one(graph_name) as u32;
        let seq = self.tmp_seq.entry(graph_name.to_string()).or_insert(0);
        let prefix = format!("{:08x}_{}", hash, *seq);
        *seq += 1;
        prefix
    }
}

fn dump_stage(dfg: &DfgGraph, ctx: &OptContext, label: &str) {
    if ctx.config.dump_level < 2 {
        return;
    }
    let Some(dir) = &ctx.config.dump_dir else {
        return;
    };
    if let Err(err) = dump::dump_dot_file(dfg, dir, label) {
        log::warn!("cannot dump '{}-{}': {}", dfg.name(), label, err);
    }
}

/// Runs the fixed optimization sequence over one connected graph.
/// Graphs with at most 2 vertices hold nothing optimizable and are skipped.
pub fn optimize_graph(dfg: &mut DfgGraph, ctx: &mut OptContext) {
    if dfg.len() <= 2 {
        return;
    }
    dfg.debug_check();
    dump_stage(dfg, ctx, "input");
    inline_vars::inline_vars(dfg);
    dump_stage(dfg, ctx, "inline");
    cse::cse(dfg, ctx);
    dump_stage(dfg, ctx, "cse0");
    if ctx.config.peephole {
        peephole::peephole(dfg, ctx);
        dump_stage(dfg, ctx, "peephole");
        remove_vars::remove_vars(dfg, ctx);
        dump_stage(dfg, ctx, "remove-vars");
        cse::cse(dfg, ctx);
        dump_stage(dfg, ctx, "cse1");
    }
    balance::balance(dfg, ctx);
    dump_stage(dfg, ctx, "balance");
    remove_unused::remove_unused(dfg, ctx);
    dump_stage(dfg, ctx, "remove-unused");
    dfg.debug_check();
}

/// The driving routine: extracts the representable combinational logic of
/// `module`, optimizes each connected component independently, and converts
/// the results back into statement form.
pub fn optimize_module(module: &mut Module, config: &DfgConfig) -> OptStats {
    let mut ctx = OptContext::new(config);
    let mut graph = ast_to_dfg(module, &mut ctx.stats);
    log::debug!(
        "module '{}': captured {} statements into {} vertices",
        module.name,
        ctx.stats.stmts_captured,
        graph.len()
    );
    let components = graph.split_into_components();
    let mut tmps = TmpNames::default();
    for mut comp in components {
        optimize_graph(&mut comp, &mut ctx);
        if config.vectorize {
            vectorize(&mut comp, &mut ctx);
        }
        regularize::regularize(&mut comp, module, &mut ctx, true);
        comp.debug_check();
        dfg_to_ast(comp, module, &mut tmps);
    }
    ctx.stats
}
