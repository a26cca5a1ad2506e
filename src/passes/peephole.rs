// SPDX-License-Identifier: Apache-2.0

//! Peephole rewriting: local, always-equivalent simplifications applied to
//! small vertex neighbourhoods, driven by a worklist to a fixed point.
//!
//! Every rule preserves the width and semantics of the rewritten vertex.
//! Dead upstream vertices exposed by a rewrite are left for dead-vertex
//! removal.

use crate::dfg::{DfgGraph, VertexId, VertexKind};
use crate::kind::{self, BinaryOp, UnaryOp};
use crate::passes::OptContext;
use crate::value::PackedVal;

/// Runs the rewriter to a fixed point. Returns whether anything changed.
pub fn peephole(dfg: &mut DfgGraph, ctx: &mut OptContext) -> bool {
    let mut work = dfg.vertex_ids();
    work.reverse(); // pop order = insertion order
    let mut changed = false;
    while let Some(vtx) = work.pop() {
        if !dfg.is_valid(vtx) {
            continue;
        }
        if try_rewrite(dfg, ctx, vtx, &mut work) {
            changed = true;
        }
    }
    changed
}

/// Redirects the consumers of `old` to the (already existing or newly
/// created) `new`, deletes `old`, and requeues the affected neighbourhood.
fn subst(
    dfg: &mut DfgGraph,
    ctx: &mut OptContext,
    old: VertexId,
    new: VertexId,
    rule: &'static str,
    work: &mut Vec<VertexId>,
) -> bool {
    debug_assert_eq!(dfg.width(old), dfg.width(new), "rewrite changed width");
    log::trace!("peephole {}: {} -> {}", rule, old, new);
    for sink_ref in dfg.sinks(old) {
        work.push(sink_ref.sink);
    }
    work.push(new);
    dfg.replace_with(old, new);
    dfg.unlink_delete(old);
    ctx.stats.peephole_rewrites += 1;
    true
}

fn subst_const(
    dfg: &mut DfgGraph,
    ctx: &mut OptContext,
    old: VertexId,
    value: PackedVal,
    rule: &'static str,
    work: &mut Vec<VertexId>,
) -> bool {
    let loc = dfg.loc(old);
    let vtx = dfg.new_const(value, loc);
    subst(dfg, ctx, old, vtx, rule, work)
}

fn const_of(dfg: &DfgGraph, vtx: VertexId, slot: usize) -> Option<PackedVal> {
    let src = dfg.source(vtx, slot)?;
    dfg.const_value(src).cloned()
}

fn try_rewrite(
    dfg: &mut DfgGraph,
    ctx: &mut OptContext,
    vtx: VertexId,
    work: &mut Vec<VertexId>,
) -> bool {
    let width = dfg.width(vtx);
    match *dfg.kind(vtx) {
        VertexKind::Const(_) | VertexKind::Var(_) => false,

        VertexKind::Unary(op) => {
            let Some(src) = dfg.source(vtx, 0) else {
                return false;
            };
            if let Some(value) = dfg.const_value(src) {
                let folded = kind::eval_unary(op, value, width);
                return subst_const(dfg, ctx, vtx, folded, "fold-unary", work);
            }
            match op {
                UnaryOp::Not => {
                    // !!x
                    if let VertexKind::Unary(UnaryOp::Not) = dfg.kind(src) {
                        if let Some(inner) = dfg.source(src, 0) {
                            return subst(dfg, ctx, vtx, inner, "not-not", work);
                        }
                    }
                    false
                }
                UnaryOp::Extend | UnaryOp::ExtendS => {
                    if dfg.width(src) == width {
                        return subst(dfg, ctx, vtx, src, "extend-noop", work);
                    }
                    false
                }
                _ => false,
            }
        }

        VertexKind::Binary(op) => {
            let (Some(lhs), Some(rhs)) = (dfg.source(vtx, 0), dfg.source(vtx, 1)) else {
                return false;
            };
            if let (Some(lv), Some(rv)) = (const_of(dfg, vtx, 0), const_of(dfg, vtx, 1)) {
                let folded = kind::eval_binary(op, &lv, &rv, width);
                return subst_const(dfg, ctx, vtx, folded, "fold-binary", work);
            }
            let lhs_const = dfg.const_value(lhs).cloned();
            let rhs_const = dfg.const_value(rhs).cloned();
            match op {
                BinaryOp::And => {
                    if lhs == rhs {
                        return subst(dfg, ctx, vtx, lhs, "and-same", work);
                    }
                    for (c, other) in [(&lhs_const, rhs), (&rhs_const, lhs)] {
                        if let Some(c) = c {
                            if c.is_zero() {
                                return subst_const(
                                    dfg,
                                    ctx,
                                    vtx,
                                    PackedVal::zeros(width),
                                    "and-zero",
                                    work,
                                );
                            }
                            if c.is_ones() {
                                return subst(dfg, ctx, vtx, other, "and-ones", work);
                            }
                        }
                    }
                    false
                }
                BinaryOp::Or => {
                    if lhs == rhs {
                        return subst(dfg, ctx, vtx, lhs, "or-same", work);
                    }
                    for (c, other) in [(&lhs_const, rhs), (&rhs_const, lhs)] {
                        if let Some(c) = c {
                            if c.is_ones() {
                                return subst_const(
                                    dfg,
                                    ctx,
                                    vtx,
                                    PackedVal::ones(width),
                                    "or-ones",
                                    work,
                                );
                            }
                            if c.is_zero() {
                                return subst(dfg, ctx, vtx, other, "or-zero", work);
                            }
                        }
                    }
                    false
                }
                BinaryOp::Xor => {
                    if lhs == rhs {
                        return subst_const(
                            dfg,
                            ctx,
                            vtx,
                            PackedVal::zeros(width),
                            "xor-same",
                            work,
                        );
                    }
                    for (c, other) in [(&lhs_const, rhs), (&rhs_const, lhs)] {
                        if let Some(c) = c {
                            if c.is_zero() {
                                return subst(dfg, ctx, vtx, other, "xor-zero", work);
                            }
                        }
                    }
                    false
                }
                BinaryOp::Add => {
                    for (c, other) in [(&lhs_const, rhs), (&rhs_const, lhs)] {
                        if let Some(c) = c {
                            if c.is_zero() {
                                return subst(dfg, ctx, vtx, other, "add-zero", work);
                            }
                        }
                    }
                    false
                }
                BinaryOp::Sub => {
                    if lhs == rhs {
                        return subst_const(
                            dfg,
                            ctx,
                            vtx,
                            PackedVal::zeros(width),
                            "sub-same",
                            work,
                        );
                    }
                    if let Some(c) = &rhs_const {
                        if c.is_zero() {
                            return subst(dfg, ctx, vtx, lhs, "sub-zero", work);
                        }
                    }
                    false
                }
                BinaryOp::Eq | BinaryOp::Ne => {
                    if lhs == rhs {
                        let value = PackedVal::from_bool(op == BinaryOp::Eq);
                        return subst_const(dfg, ctx, vtx, value, "cmp-same", work);
                    }
                    false
                }
                BinaryOp::Shl | BinaryOp::Shr | BinaryOp::ShrS => {
                    if let Some(amount) = &rhs_const {
                        let amount = amount.to_u64_saturating();
                        if amount == 0 {
                            return subst(dfg, ctx, vtx, lhs, "shift-zero", work);
                        }
                        if amount >= width as u64 && op != BinaryOp::ShrS {
                            return subst_const(
                                dfg,
                                ctx,
                                vtx,
                                PackedVal::zeros(width),
                                "shift-out",
                                work,
                            );
                        }
                    }
                    false
                }
                BinaryOp::Concat => false,
            }
        }

        VertexKind::Mux => {
            let (Some(cond), Some(then_v), Some(else_v)) = (
                dfg.source(vtx, 0),
                dfg.source(vtx, 1),
                dfg.source(vtx, 2),
            ) else {
                return false;
            };
            if let Some(c) = dfg.const_value(cond) {
                let pick = if c.bit(0) { then_v } else { else_v };
                return subst(dfg, ctx, vtx, pick, "mux-const-cond", work);
            }
            if then_v == else_v {
                return subst(dfg, ctx, vtx, then_v, "mux-same", work);
            }
            false
        }

        VertexKind::Sel { lsb } => {
            let Some(from) = dfg.source(vtx, 0) else {
                return false;
            };
            if let Some(value) = dfg.const_value(from) {
                let folded = value.select(lsb, width);
                return subst_const(dfg, ctx, vtx, folded, "fold-sel", work);
            }
            if lsb == 0 && width == dfg.width(from) {
                return subst(dfg, ctx, vtx, from, "sel-whole", work);
            }
            // sel(sel(x, a), b) = sel(x, a + b)
            if let VertexKind::Sel { lsb: inner_lsb } = *dfg.kind(from) {
                if let Some(inner_from) = dfg.source(from, 0) {
                    let loc = dfg.loc(vtx);
                    let combined = dfg.new_sel(lsb + inner_lsb, width, loc);
                    dfg.relink_source(combined, 0, Some(inner_from));
                    return subst(dfg, ctx, vtx, combined, "sel-sel", work);
                }
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VarId;
    use crate::loc::Loc;
    use crate::passes::DfgConfig;

    fn ctx_pair() -> DfgConfig {
        DfgConfig::default()
    }

    #[test]
    fn test_folds_constant_tree() {
        let mut dfg = DfgGraph::new("m", "g");
        let c1 = dfg.new_const(PackedVal::from_u64(4, 0b1100), Loc::none());
        let c2 = dfg.new_const(PackedVal::from_u64(4, 0b1010), Loc::none());
        let and = dfg.new_binary(BinaryOp::And, 4, Loc::none());
        dfg.relink_source(and, 0, Some(c1));
        dfg.relink_source(and, 1, Some(c2));
        let not = dfg.new_unary(UnaryOp::Not, 4, Loc::none());
        dfg.relink_source(not, 0, Some(and));
        let o = dfg.new_var(VarId(0), "o", 4, Loc::none());
        dfg.relink_source(o, 0, Some(not));

        let config = ctx_pair();
        let mut ctx = OptContext::new(&config);
        assert!(peephole(&mut dfg, &mut ctx));
        let driver = dfg.source(o, 0).unwrap();
        assert_eq!(
            dfg.const_value(driver),
            Some(&PackedVal::from_u64(4, 0b0111))
        );
        dfg.debug_check();
    }

    #[test]
    fn test_not_not_elimination() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 4, Loc::none());
        let n1 = dfg.new_unary(UnaryOp::Not, 4, Loc::none());
        dfg.relink_source(n1, 0, Some(a));
        let n2 = dfg.new_unary(UnaryOp::Not, 4, Loc::none());
        dfg.relink_source(n2, 0, Some(n1));
        let o = dfg.new_var(VarId(1), "o", 4, Loc::none());
        dfg.relink_source(o, 0, Some(n2));

        let config = ctx_pair();
        let mut ctx = OptContext::new(&config);
        assert!(peephole(&mut dfg, &mut ctx));
        assert_eq!(dfg.source(o, 0), Some(a));
    }

    #[test]
    fn test_and_with_ones_and_zero() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 4, Loc::none());
        let ones = dfg.new_const(PackedVal::ones(4), Loc::none());
        let and1 = dfg.new_binary(BinaryOp::And, 4, Loc::none());
        dfg.relink_source(and1, 0, Some(a));
        dfg.relink_source(and1, 1, Some(ones));
        let o1 = dfg.new_var(VarId(1), "o1", 4, Loc::none());
        dfg.relink_source(o1, 0, Some(and1));

        let zero = dfg.new_const(PackedVal::zeros(4), Loc::none());
        let and2 = dfg.new_binary(BinaryOp::And, 4, Loc::none());
        dfg.relink_source(and2, 0, Some(zero));
        dfg.relink_source(and2, 1, Some(a));
        let o2 = dfg.new_var(VarId(2), "o2", 4, Loc::none());
        dfg.relink_source(o2, 0, Some(and2));

        let config = ctx_pair();
        let mut ctx = OptContext::new(&config);
        assert!(peephole(&mut dfg, &mut ctx));
        assert_eq!(dfg.source(o1, 0), Some(a));
        let z = dfg.source(o2, 0).unwrap();
        assert!(dfg.const_value(z).unwrap().is_zero());
    }

    #[test]
    fn test_mux_const_cond() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 4, Loc::none());
        let b = dfg.new_var(VarId(1), "b", 4, Loc::none());
        let cond = dfg.new_const(PackedVal::from_u64(1, 1), Loc::none());
        let mux = dfg.new_mux(4, Loc::none());
        dfg.relink_source(mux, 0, Some(cond));
        dfg.relink_source(mux, 1, Some(a));
        dfg.relink_source(mux, 2, Some(b));
        let o = dfg.new_var(VarId(2), "o", 4, Loc::none());
        dfg.relink_source(o, 0, Some(mux));

        let config = ctx_pair();
        let mut ctx = OptContext::new(&config);
        assert!(peephole(&mut dfg, &mut ctx));
        assert_eq!(dfg.source(o, 0), Some(a));
    }

    #[test]
    fn test_sel_of_sel_collapses() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 16, Loc::none());
        let outer_src = dfg.new_sel(4, 8, Loc::none());
        dfg.relink_source(outer_src, 0, Some(a));
        let sel = dfg.new_sel(2, 2, Loc::none());
        dfg.relink_source(sel, 0, Some(outer_src));
        let o = dfg.new_var(VarId(1), "o", 2, Loc::none());
        dfg.relink_source(o, 0, Some(sel));

        let config = ctx_pair();
        let mut ctx = OptContext::new(&config);
        assert!(peephole(&mut dfg, &mut ctx));
        let driver = dfg.source(o, 0).unwrap();
        assert!(matches!(*dfg.kind(driver), VertexKind::Sel { lsb: 6 }));
        assert_eq!(dfg.source(driver, 0), Some(a));
    }

    #[test]
    fn test_whole_width_sel_removed() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 4, Loc::none());
        let sel = dfg.new_sel(0, 4, Loc::none());
        dfg.relink_source(sel, 0, Some(a));
        let o = dfg.new_var(VarId(1), "o", 4, Loc::none());
        dfg.relink_source(o, 0, Some(sel));

        let config = ctx_pair();
        let mut ctx = OptContext::new(&config);
        assert!(peephole(&mut dfg, &mut ctx));
        assert_eq!(dfg.source(o, 0), Some(a));
    }

    #[test]
    fn test_no_change_reports_false() {
        let mut dfg = DfgGraph::new("m", "g");
        let a = dfg.new_var(VarId(0), "a", 4, Loc::none());
        let b = dfg.new_var(VarId(1), "b", 4, Loc::none());
        let and = dfg.new_binary(BinaryOp::And, 4, Loc::none());
        dfg.relink_source(and, 0, Some(a));
        dfg.relink_source(and, 1, Some(b));
        let o = dfg.new_var(VarId(2), "o", 4, Loc::none());
        dfg.relink_source(o, 0, Some(and));

        let config = ctx_pair();
        let mut ctx = OptContext::new(&config);
        assert!(!peephole(&mut dfg, &mut ctx));
        assert_eq!(ctx.stats.peephole_rewrites, 0);
    }
}
