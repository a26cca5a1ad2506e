// SPDX-License-Identifier: Apache-2.0

//! Dfg to Ast conversion.
//!
//! Every driven variable vertex becomes an assignment. A driver shared by
//! several variables is computed once, into a deterministically chosen
//! canonical variable, with the others assigned from it. Non-variable
//! vertices with several consumers must materialize into a named temporary
//! (tree form has no value sharing); single-consumer vertices are inlined at
//! their point of use.

use std::collections::HashMap;

use crate::ast::{Assign, Direction, Expr, LValue, Module, Stmt, VarId};
use crate::dfg::{DfgGraph, VertexId, VertexKind};
use crate::loc::Loc;

/// Temporary-name allocator, shared across all graphs converted into one
/// module so names never collide.
#[derive(Debug, Default)]
pub struct TmpNames {
    n: usize,
}

impl TmpNames {
    fn next(&mut self) -> String {
        self.n += 1;
        format!("__VdfgTmp_{}", self.n)
    }
}

/// Constants and bit selects straight off a variable are re-emitted at
/// every point of use; naming them would cost more than recomputing them.
fn is_cheap(dfg: &DfgGraph, vtx: VertexId) -> bool {
    if dfg.is_const(vtx) {
        return true;
    }
    if let VertexKind::Sel { .. } = dfg.kind(vtx) {
        return dfg.source(vtx, 0).is_some_and(|from| dfg.is_var(from));
    }
    false
}

struct DfgToAst<'a> {
    dfg: &'a DfgGraph,
    module: &'a mut Module,
    tmps: &'a mut TmpNames,
    result_vars: HashMap<VertexId, VarId>,
}

/// Converts the graph into assignments appended to `module`. The graph is
/// consumed: after conversion it has no further use.
pub fn dfg_to_ast(dfg: DfgGraph, module: &mut Module, tmps: &mut TmpNames) {
    let mut conv = DfgToAst {
        dfg: &dfg,
        module,
        tmps,
        result_vars: HashMap::new(),
    };
    conv.convert();
}

impl DfgToAst<'_> {
    fn convert(&mut self) {
        for vtx in self.dfg.iter_ids() {
            if let Some(info) = self.dfg.var_info(vtx) {
                let var = info.var;
                for slot in 0..self.dfg.arity(vtx) {
                    let Some(driver) = self.dfg.source(vtx, slot) else {
                        continue; // an input of the graph, not computed here
                    };
                    let dinfo = self.dfg.drivers(vtx)[slot];
                    if self.dfg.full_driver(vtx) == Some(driver) {
                        self.emit_full_assign(var, driver, dinfo.loc);
                    } else {
                        // Partial driver recorded by regularization.
                        let rhs = self.convert_source(driver);
                        self.emit(
                            LValue::Slice {
                                var,
                                lsb: dinfo.lsb,
                                width: self.dfg.width(driver),
                            },
                            rhs,
                            dinfo.loc,
                        );
                    }
                }
            } else if !is_cheap(self.dfg, vtx)
                && self.dfg.has_multiple_sinks(vtx)
                && self.dfg.result_var(vtx).is_none()
            {
                // Shared value with no variable sink: materialize through a
                // temporary so consumers can reference it by name.
                let var = self.get_result_var(vtx);
                let rhs = self.convert_expr(vtx);
                self.emit(LValue::Var(var), rhs, self.dfg.loc(vtx));
            }
        }
    }

    /// One whole-variable assignment. If the driver is shared by several
    /// variables only the canonical one computes it; the rest copy from the
    /// canonical variable.
    fn emit_full_assign(&mut self, var: VarId, driver: VertexId, loc: Loc) {
        let canon = self.get_result_var(driver);
        let rhs = if canon == var {
            self.convert_expr(driver)
        } else {
            self.module.var_ref(canon, loc)
        };
        self.emit(LValue::Var(var), rhs, loc);
    }

    fn emit(&mut self, lhs: LValue, rhs: Expr, loc: Loc) {
        debug_assert_eq!(
            lhs.width(self.module),
            rhs.width(),
            "assignment width mismatch during conversion"
        );
        self.module.stmts.push(Stmt::Assign(Assign { lhs, rhs, loc }));
    }

    /// The variable that holds the value of `vtx` once conversion is done:
    /// the variable itself, its canonical variable sink, or a fresh
    /// temporary.
    fn get_result_var(&mut self, vtx: VertexId) -> VarId {
        if let Some(&var) = self.result_vars.get(&vtx) {
            return var;
        }
        let var = match self.dfg.result_var(vtx) {
            Some(var_vtx) => self.dfg.var_info(var_vtx).expect("var vertex").var,
            None => {
                let name = self.tmps.next();
                self.module.add_var(
                    name,
                    self.dfg.width(vtx),
                    Direction::None,
                    self.dfg.loc(vtx),
                )
            }
        };
        self.result_vars.insert(vtx, var);
        var
    }

    /// Converts one operand: shared vertices become a reference to their
    /// result variable, unshared (or cheap) ones are inlined.
    fn convert_source(&mut self, vtx: VertexId) -> Expr {
        if self.dfg.has_multiple_sinks(vtx) && !is_cheap(self.dfg, vtx) {
            let var = self.get_result_var(vtx);
            self.module.var_ref(var, self.dfg.loc(vtx))
        } else {
            self.convert_expr(vtx)
        }
    }

    fn convert_expr(&mut self, vtx: VertexId) -> Expr {
        let width = self.dfg.width(vtx);
        let loc = self.dfg.loc(vtx);
        let source = |conv: &mut Self, slot: usize| {
            let src = conv
                .dfg
                .source(vtx, slot)
                .unwrap_or_else(|| panic!("{}: missing operand {} at {}", vtx, slot, loc));
            conv.convert_source(src)
        };
        match self.dfg.kind(vtx) {
            VertexKind::Var(info) => self.module.var_ref(info.var, loc),
            VertexKind::Const(value) => Expr::Const {
                value: value.clone(),
                loc,
            },
            VertexKind::Unary(op) => {
                let op = *op;
                Expr::Unary {
                    op,
                    width,
                    arg: Box::new(source(self, 0)),
                    loc,
                }
            }
            VertexKind::Binary(op) => {
                let op = *op;
                Expr::Binary {
                    op,
                    width,
                    lhs: Box::new(source(self, 0)),
                    rhs: Box::new(source(self, 1)),
                    loc,
                }
            }
            VertexKind::Mux => Expr::Mux {
                width,
                cond: Box::new(source(self, 0)),
                then_e: Box::new(source(self, 1)),
                else_e: Box::new(source(self, 2)),
                loc,
            },
            VertexKind::Sel { lsb } => {
                let lsb = *lsb;
                Expr::Sel {
                    width,
                    from: Box::new(source(self, 0)),
                    lsb,
                    loc,
                }
            }
        }
    }
}
