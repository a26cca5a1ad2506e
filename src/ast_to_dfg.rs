// SPDX-License-Identifier: Apache-2.0

//! Ast to Dfg translation.
//!
//! Captures as much of a module's single-assignment combinational logic as
//! the graph can represent, and leaves everything else untouched in tree
//! form. Failure to capture is never an error: the attempt is reverted and
//! every variable the statement touches is marked as referenced by module
//! logic so later passes keep it.

use std::collections::HashMap;

use crate::ast::{Assign, Expr, LValue, Module, Stmt, VarId};
use crate::dfg::{DfgGraph, VertexId};
use crate::passes::OptStats;

struct AstToDfg<'a> {
    module: &'a mut Module,
    dfg: DfgGraph,
    var_map: HashMap<VarId, VertexId>,
    /// Vertices created for the assignment currently being attempted; bulk
    /// deleted if the attempt fails. Variable vertices are never listed
    /// here: they are cached per variable and survive any revert.
    uncommitted: Vec<VertexId>,
}

/// Builds a graph of the representable combinational logic of `module`,
/// removing the captured statements from the statement list.
pub fn ast_to_dfg(module: &mut Module, stats: &mut OptStats) -> DfgGraph {
    let name = module.name.clone();
    let mut translator = AstToDfg {
        module,
        dfg: DfgGraph::new(name.clone(), name),
        var_map: HashMap::new(),
        uncommitted: Vec::new(),
    };
    translator.translate(stats);
    debug_assert!(
        translator.uncommitted.is_empty(),
        "uncommitted vertices remain after translation"
    );
    translator.dfg
}

impl AstToDfg<'_> {
    fn translate(&mut self, stats: &mut OptStats) {
        // Ports and hierarchically referenced variables can be accessed by
        // logic no graph will ever see; mark them eagerly.
        for var in self.module.var_ids() {
            if self.module.var(var).dir.is_port() || self.module.var(var).has_hier_refs {
                self.mark_var(var, true);
            }
        }

        let stmts = std::mem::take(&mut self.module.stmts);
        let mut kept = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            match stmt {
                Stmt::Assign(assign) => {
                    if self.try_capture(&assign) {
                        stats.stmts_captured += 1;
                        // Captured: the statement is now represented by the
                        // graph and is dropped from the tree.
                    } else {
                        stats.stmts_rejected += 1;
                        self.mark_assign_refs(&assign);
                        kept.push(Stmt::Assign(assign));
                    }
                }
                Stmt::Opaque { loc, exprs } => {
                    for expr in &exprs {
                        self.mark_expr_refs(expr);
                    }
                    kept.push(Stmt::Opaque { loc, exprs });
                }
            }
        }
        self.module.stmts = kept;
    }

    /// Attempts to capture one assignment. On failure all provisionally
    /// created vertices are deleted and the statement is left alone.
    fn try_capture(&mut self, assign: &Assign) -> bool {
        // Only whole variables on the left, with matching widths.
        let LValue::Var(lhs_var) = assign.lhs else {
            return false;
        };
        if self.module.var(lhs_var).width != assign.rhs.width() {
            return false;
        }
        let lhs_vtx = self.get_var_vertex(lhs_var);
        if self.dfg.source(lhs_vtx, 0).is_some() {
            // Multiply driven; cannot represent the resolution.
            return false;
        }

        match self.build_expr(&assign.rhs) {
            Some(rhs_vtx) => {
                self.dfg.relink_source(lhs_vtx, 0, Some(rhs_vtx));
                if let Some(info) = self.dfg.var_info_mut(lhs_vtx) {
                    info.drivers[0].loc = assign.loc;
                }
                self.uncommitted.clear();
                true
            }
            None => {
                self.revert();
                false
            }
        }
    }

    fn revert(&mut self) {
        for vtx in std::mem::take(&mut self.uncommitted) {
            self.dfg.unlink_delete(vtx);
        }
    }

    /// Builds the vertex subtree for an expression, or `None` if any part
    /// of it is not representable.
    fn build_expr(&mut self, expr: &Expr) -> Option<VertexId> {
        match expr {
            Expr::VarRef {
                var, width, hier, ..
            } => {
                if *hier {
                    self.mark_var(*var, true);
                    return None;
                }
                let vtx = self.get_var_vertex(*var);
                if self.dfg.width(vtx) != *width {
                    return None;
                }
                Some(vtx)
            }
            Expr::Const { value, loc } => {
                let vtx = self.dfg.new_const(value.clone(), *loc);
                self.uncommitted.push(vtx);
                Some(vtx)
            }
            Expr::Unary {
                op,
                width,
                arg,
                loc,
            } => {
                if !op.widths_ok(*width, arg.width()) {
                    return None;
                }
                let arg_vtx = self.build_expr(arg)?;
                let vtx = self.dfg.new_unary(*op, *width, *loc);
                self.uncommitted.push(vtx);
                self.dfg.relink_source(vtx, 0, Some(arg_vtx));
                Some(vtx)
            }
            Expr::Binary {
                op,
                width,
                lhs,
                rhs,
                loc,
            } => {
                if !op.widths_ok(*width, lhs.width(), rhs.width()) {
                    return None;
                }
                let lhs_vtx = self.build_expr(lhs)?;
                let rhs_vtx = self.build_expr(rhs)?;
                let vtx = self.dfg.new_binary(*op, *width, *loc);
                self.uncommitted.push(vtx);
                self.dfg.relink_source(vtx, 0, Some(lhs_vtx));
                self.dfg.relink_source(vtx, 1, Some(rhs_vtx));
                Some(vtx)
            }
            Expr::Mux {
                width,
                cond,
                then_e,
                else_e,
                loc,
            } => {
                if cond.width() != 1 || then_e.width() != *width || else_e.width() != *width {
                    return None;
                }
                let cond_vtx = self.build_expr(cond)?;
                let then_vtx = self.build_expr(then_e)?;
                let else_vtx = self.build_expr(else_e)?;
                let vtx = self.dfg.new_mux(*width, *loc);
                self.uncommitted.push(vtx);
                self.dfg.relink_source(vtx, 0, Some(cond_vtx));
                self.dfg.relink_source(vtx, 1, Some(then_vtx));
                self.dfg.relink_source(vtx, 2, Some(else_vtx));
                Some(vtx)
            }
            Expr::Sel {
                width,
                from,
                lsb,
                loc,
            } => {
                if lsb + width > from.width() {
                    return None;
                }
                let from_vtx = self.build_expr(from)?;
                let vtx = self.dfg.new_sel(*lsb, *width, *loc);
                self.uncommitted.push(vtx);
                self.dfg.relink_source(vtx, 0, Some(from_vtx));
                Some(vtx)
            }
            // Unknown to the graph, pure or not. Refuse.
            Expr::Call { .. } => None,
        }
    }

    fn get_var_vertex(&mut self, var: VarId) -> VertexId {
        if let Some(&vtx) = self.var_map.get(&var) {
            return vtx;
        }
        let info = self.module.var(var);
        let vtx = self
            .dfg
            .new_var(var, info.name.clone(), info.width, info.loc);
        self.var_map.insert(var, vtx);
        vtx
    }

    fn mark_var(&mut self, var: VarId, ext: bool) {
        let vtx = self.get_var_vertex(var);
        let info = self.dfg.var_info_mut(vtx).expect("var vertex");
        if ext {
            info.has_ext_refs = true;
        } else {
            info.has_mod_refs = true;
        }
    }

    fn mark_expr_refs(&mut self, expr: &Expr) {
        let mut refs = Vec::new();
        expr.for_each_var_ref(&mut |var, hier| refs.push((var, hier)));
        for (var, hier) in refs {
            self.mark_var(var, hier);
        }
    }

    fn mark_assign_refs(&mut self, assign: &Assign) {
        self.mark_var(assign.lhs.var(), false);
        self.mark_expr_refs(&assign.rhs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Direction;
    use crate::kind::BinaryOp;
    use crate::loc::Loc;
    use crate::value::PackedVal;

    fn loc(line: u32) -> Loc {
        Loc::new(line, 1)
    }

    fn two_input_module() -> (Module, VarId, VarId, VarId) {
        let mut m = Module::new("t");
        let o = m.add_var("o", 4, Direction::Output, loc(1));
        let a = m.add_var("a", 4, Direction::Input, loc(2));
        let b = m.add_var("b", 4, Direction::Input, loc(3));
        (m, o, a, b)
    }

    #[test]
    fn test_captures_simple_assign() {
        let (mut m, o, a, b) = two_input_module();
        let rhs = Expr::Binary {
            op: BinaryOp::Xor,
            width: 4,
            lhs: Box::new(m.var_ref(a, loc(4))),
            rhs: Box::new(m.var_ref(b, loc(4))),
            loc: loc(4),
        };
        m.stmts.push(Stmt::Assign(Assign {
            lhs: LValue::Var(o),
            rhs,
            loc: loc(4),
        }));
        let mut stats = OptStats::default();
        let dfg = ast_to_dfg(&mut m, &mut stats);
        assert_eq!(stats.stmts_captured, 1);
        assert!(m.stmts.is_empty());
        // 3 variables + 1 operation.
        assert_eq!(dfg.len(), 4);
        dfg.debug_check();
    }

    #[test]
    fn test_rejects_call_and_reverts() {
        let (mut m, o, a, _b) = two_input_module();
        let rhs = Expr::Binary {
            op: BinaryOp::And,
            width: 4,
            lhs: Box::new(m.var_ref(a, loc(4))),
            rhs: Box::new(Expr::Call {
                name: "f".into(),
                width: 4,
                args: vec![],
                pure: false,
                loc: loc(4),
            }),
            loc: loc(4),
        };
        m.stmts.push(Stmt::Assign(Assign {
            lhs: LValue::Var(o),
            rhs,
            loc: loc(4),
        }));
        let mut stats = OptStats::default();
        let dfg = ast_to_dfg(&mut m, &mut stats);
        assert_eq!(stats.stmts_rejected, 1);
        assert_eq!(m.stmts.len(), 1);
        // Only variable vertices remain (ports were eagerly created); no
        // operation vertex leaked from the reverted attempt.
        for id in dfg.iter_ids() {
            assert!(dfg.is_var(id), "leaked operation vertex {}", id);
        }
        // Variables of the failed statement are kept alive.
        let o_vtx = dfg.iter_ids().find(|&v| dfg.var_info(v).unwrap().var == o);
        assert!(dfg.var_info(o_vtx.unwrap()).unwrap().has_mod_refs);
    }

    #[test]
    fn test_rejects_width_mismatch() {
        let (mut m, o, a, _b) = two_input_module();
        // o is 4 bits, rhs is 1 bit: refuse rather than mis-translate.
        let rhs = Expr::Sel {
            width: 1,
            from: Box::new(m.var_ref(a, loc(4))),
            lsb: 0,
            loc: loc(4),
        };
        m.stmts.push(Stmt::Assign(Assign {
            lhs: LValue::Var(o),
            rhs,
            loc: loc(4),
        }));
        let mut stats = OptStats::default();
        ast_to_dfg(&mut m, &mut stats);
        assert_eq!(stats.stmts_captured, 0);
        assert_eq!(m.stmts.len(), 1);
    }

    #[test]
    fn test_rejects_second_driver() {
        let (mut m, o, a, b) = two_input_module();
        m.stmts.push(Stmt::Assign(Assign {
            lhs: LValue::Var(o),
            rhs: m.var_ref(a, loc(4)),
            loc: loc(4),
        }));
        m.stmts.push(Stmt::Assign(Assign {
            lhs: LValue::Var(o),
            rhs: m.var_ref(b, loc(5)),
            loc: loc(5),
        }));
        let mut stats = OptStats::default();
        ast_to_dfg(&mut m, &mut stats);
        assert_eq!(stats.stmts_captured, 1);
        assert_eq!(m.stmts.len(), 1);
    }

    #[test]
    fn test_var_vertices_are_shared() {
        let (mut m, o, a, _b) = two_input_module();
        let rhs = Expr::Binary {
            op: BinaryOp::And,
            width: 4,
            lhs: Box::new(m.var_ref(a, loc(4))),
            rhs: Box::new(m.var_ref(a, loc(4))),
            loc: loc(4),
        };
        m.stmts.push(Stmt::Assign(Assign {
            lhs: LValue::Var(o),
            rhs,
            loc: loc(4),
        }));
        let mut stats = OptStats::default();
        let dfg = ast_to_dfg(&mut m, &mut stats);
        let a_vtx = dfg
            .iter_ids()
            .find(|&v| dfg.var_info(v).map(|i| i.var) == Some(a))
            .unwrap();
        assert_eq!(dfg.fanout(a_vtx), 2);
    }

    #[test]
    fn test_hier_ref_marks_external() {
        let (mut m, o, a, _b) = two_input_module();
        let w = m.add_var("w", 4, Direction::None, loc(9));
        let rhs = Expr::VarRef {
            var: w,
            width: 4,
            hier: true,
            loc: loc(4),
        };
        m.stmts.push(Stmt::Assign(Assign {
            lhs: LValue::Var(o),
            rhs,
            loc: loc(4),
        }));
        let mut stats = OptStats::default();
        let dfg = ast_to_dfg(&mut m, &mut stats);
        assert_eq!(stats.stmts_captured, 0);
        let w_vtx = dfg
            .iter_ids()
            .find(|&v| dfg.var_info(v).map(|i| i.var) == Some(w))
            .unwrap();
        assert!(dfg.var_info(w_vtx).unwrap().has_ext_refs);
        let _ = (o, a);
    }
}
