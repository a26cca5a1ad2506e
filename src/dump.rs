// SPDX-License-Identifier: Apache-2.0

//! Graphviz rendering of a graph, for engineer debugging only.
//!
//! Output is deterministic: vertices are emitted in insertion order with
//! stable handle-based node ids, and files are named from the graph and the
//! pass label.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::dfg::{DfgGraph, VertexId, VertexKind};

fn dot_id(vtx: VertexId) -> String {
    format!("\"{}\"", vtx)
}

fn write_vertex(os: &mut String, dfg: &DfgGraph, vtx: VertexId) {
    let _ = write!(os, "{} [label=\"", dot_id(vtx));
    match dfg.kind(vtx) {
        VertexKind::Var(info) => {
            let _ = write!(
                os,
                "{}\\n{} / F{}\"",
                info.name,
                dfg.width(vtx),
                dfg.fanout(vtx)
            );
            if info.has_ext_refs {
                let _ = write!(os, ", shape=box, style=filled, fillcolor=firebrick2");
            } else if info.has_mod_refs {
                let _ = write!(os, ", shape=box, style=filled, fillcolor=darkorange1");
            } else {
                let _ = write!(os, ", shape=box");
            }
        }
        VertexKind::Const(value) => {
            let _ = write!(os, "{}\", shape=plain", value);
        }
        VertexKind::Sel { lsb } => {
            let msb = lsb + dfg.width(vtx) - 1;
            let _ = write!(
                os,
                "SEL _[{}:{}]\\n{} / F{}\"",
                msb,
                lsb,
                dfg.width(vtx),
                dfg.fanout(vtx)
            );
            let shape = if dfg.has_multiple_sinks(vtx) {
                "doublecircle"
            } else {
                "circle"
            };
            let _ = write!(os, ", shape={}", shape);
        }
        kind => {
            let _ = write!(
                os,
                "{}\\n{} / F{}\"",
                kind.type_name(),
                dfg.width(vtx),
                dfg.fanout(vtx)
            );
            let shape = if dfg.has_multiple_sinks(vtx) {
                "doublecircle"
            } else {
                "circle"
            };
            let _ = write!(os, ", shape={}", shape);
        }
    }
    os.push_str("]\n");
}

/// Renders the graph, clustering each given pack of vertices.
pub fn dump_dot_string_with_packs(dfg: &DfgGraph, packs: &[Vec<VertexId>]) -> String {
    let mut os = String::new();
    os.push_str("digraph dfg {\n");
    os.push_str("rankdir=LR\n");

    for (i, pack) in packs.iter().enumerate() {
        let _ = write!(os, "subgraph cluster_{} {{\n", i);
        let _ = write!(os, "label=\"{}\"\n", i);
        os.push_str("color=black\n");
        for &vtx in pack {
            let _ = write!(os, "{}\n", dot_id(vtx));
        }
        os.push_str("}\n");
    }

    for vtx in dfg.iter_ids() {
        write_vertex(&mut os, dfg, vtx);
    }
    for vtx in dfg.iter_ids() {
        for slot in 0..dfg.arity(vtx) {
            if let Some(src) = dfg.source(vtx, slot) {
                let _ = write!(
                    os,
                    "{} -> {} [headlabel=\"{}\"]\n",
                    dot_id(src),
                    dot_id(vtx),
                    dfg.kind(vtx).src_name(slot)
                );
            }
        }
    }

    let _ = write!(os, "label=\"{}\"\n", dfg.name());
    os.push_str("labelloc=t\n");
    os.push_str("labeljust=l\n");
    os.push_str("}\n");
    os
}

pub fn dump_dot_string(dfg: &DfgGraph) -> String {
    dump_dot_string_with_packs(dfg, &[])
}

/// Writes `<graph>-<label>.dot` under `dir`; returns the path written.
pub fn dump_dot_file(dfg: &DfgGraph, dir: &Path, label: &str) -> anyhow::Result<PathBuf> {
    dump_dot_file_with_packs(dfg, dir, label, &[])
}

pub fn dump_dot_file_with_packs(
    dfg: &DfgGraph,
    dir: &Path,
    label: &str,
    packs: &[Vec<VertexId>],
) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("{}-{}.dot", dfg.name(), label));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create dump directory {}", dir.display()))?;
    std::fs::write(&path, dump_dot_string_with_packs(dfg, packs))
        .with_context(|| format!("cannot write {}", path.display()))?;
    Ok(path)
}
