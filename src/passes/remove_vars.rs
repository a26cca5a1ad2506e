// SPDX-License-Identifier: Apache-2.0

//! Redundant variable removal.
//!
//! A variable vertex can go if nothing in the graph consumes it and nothing
//! outside the graph can see it. One exception: when its driver also feeds
//! non-variable consumers, the first variable sink of that driver is kept as
//! the materialization point, so regularization does not have to mint an
//! otherwise unnecessary temporary later.

use crate::dfg::DfgGraph;
use crate::passes::OptContext;

pub fn remove_vars(dfg: &mut DfgGraph, ctx: &mut OptContext) {
    // Deleting a variable can leave an upstream variable without sinks, so
    // sweep until settled; the pass must reach its fixed point in one call.
    loop {
        let mut changed = false;
        let mut cursor = dfg.head();
        while let Some(vtx) = cursor {
            cursor = dfg.next_of(vtx);
            let Some(info) = dfg.var_info(vtx) else {
                continue;
            };
            if info.has_ext_refs || info.has_mod_refs {
                continue;
            }
            if dfg.has_sinks(vtx) {
                continue;
            }
            // Partially driven variables only exist after the final
            // regularization run; leave them alone.
            if info.drivers.len() > 1 {
                continue;
            }
            if dfg.arity(vtx) > 0 {
                if dfg.source(vtx, 0).is_some() && dfg.full_driver(vtx).is_none() {
                    continue;
                }
                if let Some(driver) = dfg.full_driver(vtx) {
                    let sinks = dfg.sinks(driver);
                    let has_non_var_sink = sinks.iter().any(|s| !dfg.is_var(s.sink));
                    if has_non_var_sink {
                        let first_var =
                            sinks.iter().find(|s| dfg.is_var(s.sink)).map(|s| s.sink);
                        if first_var == Some(vtx) {
                            continue;
                        }
                    }
                }
            }
            dfg.unlink_delete(vtx);
            ctx.stats.vars_removed += 1;
            changed = true;
        }
        if !changed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VarId;
    use crate::kind::BinaryOp;
    use crate::loc::Loc;
    use crate::passes::DfgConfig;

    #[test]
    fn test_removes_unreferenced_var() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 4, Loc::none());
        let dead = dfg.new_var(VarId(1), "dead", 4, Loc::none());
        dfg.relink_source(dead, 0, Some(a));
        let config = DfgConfig::default();
        let mut ctx = OptContext::new(&config);
        remove_vars(&mut dfg, &mut ctx);
        // Both have no sinks and no outside references.
        assert_eq!(ctx.stats.vars_removed, 2);
        assert!(!dfg.is_valid(dead));
        assert!(!dfg.is_valid(a));
    }

    #[test]
    fn test_keeps_externally_referenced_var() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 4, Loc::none());
        dfg.var_info_mut(a).unwrap().has_ext_refs = true;
        let b = dfg.new_var(VarId(1), "b", 4, Loc::none());
        dfg.var_info_mut(b).unwrap().has_mod_refs = true;
        let config = DfgConfig::default();
        let mut ctx = OptContext::new(&config);
        remove_vars(&mut dfg, &mut ctx);
        assert_eq!(ctx.stats.vars_removed, 0);
    }

    #[test]
    fn test_keeps_one_materialization_point() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 4, Loc::none());
        dfg.var_info_mut(a).unwrap().has_ext_refs = true;
        let and = dfg.new_binary(BinaryOp::And, 4, Loc::none());
        dfg.relink_source(and, 0, Some(a));
        dfg.relink_source(and, 1, Some(a));
        // The shared driver feeds two local variables and one operation.
        let v1 = dfg.new_var(VarId(1), "v1", 4, Loc::none());
        dfg.relink_source(v1, 0, Some(and));
        let v2 = dfg.new_var(VarId(2), "v2", 4, Loc::none());
        dfg.relink_source(v2, 0, Some(and));
        let user = dfg.new_binary(BinaryOp::Xor, 4, Loc::none());
        dfg.relink_source(user, 0, Some(and));
        dfg.relink_source(user, 1, Some(a));
        let o = dfg.new_var(VarId(3), "o", 4, Loc::none());
        dfg.var_info_mut(o).unwrap().has_ext_refs = true;
        dfg.relink_source(o, 0, Some(user));

        let config = DfgConfig::default();
        let mut ctx = OptContext::new(&config);
        remove_vars(&mut dfg, &mut ctx);
        // Exactly one of v1/v2 is retained as the materialization point.
        let kept = [v1, v2]
            .iter()
            .filter(|&&v| dfg.is_valid(v))
            .count();
        assert_eq!(kept, 1);
        assert_eq!(ctx.stats.vars_removed, 1);
        dfg.debug_check();

        // Fixed point.
        remove_vars(&mut dfg, &mut ctx);
        assert_eq!(ctx.stats.vars_removed, 1);
    }
}
