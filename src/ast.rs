// SPDX-License-Identifier: Apache-2.0

//! The statement-tree IR consumed and produced by the translators.
//!
//! This is the narrow surface the graph side needs from the surrounding
//! compiler: a module is a container of named storage locations and an
//! ordered list of statements; expressions expose kind, width and purity.
//! It is deliberately minimal and is not a front end.

use std::fmt;

use crate::kind::{BinaryOp, UnaryOp};
use crate::loc::Loc;
use crate::value::PackedVal;

/// Handle of a storage location within its module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    None,
    Input,
    Output,
    Inout,
}

impl Direction {
    pub fn is_port(self) -> bool {
        !matches!(self, Direction::None)
    }
}

#[derive(Debug, Clone)]
pub struct AstVar {
    pub name: String,
    pub width: u32,
    pub dir: Direction,
    /// Target of a hierarchical (cross-module) reference. The graph side can
    /// never reason about such accesses.
    pub has_hier_refs: bool,
    pub loc: Loc,
}

/// Assignment target. The forward translator only captures whole-variable
/// targets; slice targets appear when regularization splits wide drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LValue {
    Var(VarId),
    Slice { var: VarId, lsb: u32, width: u32 },
}

impl LValue {
    pub fn var(&self) -> VarId {
        match *self {
            LValue::Var(var) => var,
            LValue::Slice { var, .. } => var,
        }
    }

    pub fn width(&self, module: &Module) -> u32 {
        match *self {
            LValue::Var(var) => module.var(var).width,
            LValue::Slice { width, .. } => width,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Assign {
    pub lhs: LValue,
    pub rhs: Expr,
    pub loc: Loc,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    /// Continuous, single-assignment-style statement.
    Assign(Assign),
    /// Logic not in single-assignment form (procedural blocks, instances,
    /// anything else). The graph side inspects it only for the variables it
    /// references.
    Opaque { loc: Loc, exprs: Vec<Expr> },
}

#[derive(Debug, Clone)]
pub enum Expr {
    VarRef {
        var: VarId,
        width: u32,
        /// Reference through the module hierarchy; not representable.
        hier: bool,
        loc: Loc,
    },
    Const {
        value: PackedVal,
        loc: Loc,
    },
    Unary {
        op: UnaryOp,
        width: u32,
        arg: Box<Expr>,
        loc: Loc,
    },
    Binary {
        op: BinaryOp,
        width: u32,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        loc: Loc,
    },
    Mux {
        width: u32,
        cond: Box<Expr>,
        then_e: Box<Expr>,
        else_e: Box<Expr>,
        loc: Loc,
    },
    Sel {
        width: u32,
        from: Box<Expr>,
        lsb: u32,
        loc: Loc,
    },
    /// Call to a function the graph side knows nothing about.
    Call {
        name: String,
        width: u32,
        args: Vec<Expr>,
        pure: bool,
        loc: Loc,
    },
}

impl Expr {
    pub fn width(&self) -> u32 {
        match self {
            Expr::VarRef { width, .. } => *width,
            Expr::Const { value, .. } => value.width(),
            Expr::Unary { width, .. } => *width,
            Expr::Binary { width, .. } => *width,
            Expr::Mux { width, .. } => *width,
            Expr::Sel { width, .. } => *width,
            Expr::Call { width, .. } => *width,
        }
    }

    pub fn loc(&self) -> Loc {
        match self {
            Expr::VarRef { loc, .. }
            | Expr::Const { loc, .. }
            | Expr::Unary { loc, .. }
            | Expr::Binary { loc, .. }
            | Expr::Mux { loc, .. }
            | Expr::Sel { loc, .. }
            | Expr::Call { loc, .. } => *loc,
        }
    }

    /// Whether evaluating this expression is free of side effects.
    pub fn is_pure(&self) -> bool {
        match self {
            Expr::VarRef { .. } | Expr::Const { .. } => true,
            Expr::Unary { arg, .. } => arg.is_pure(),
            Expr::Binary { lhs, rhs, .. } => lhs.is_pure() && rhs.is_pure(),
            Expr::Mux {
                cond,
                then_e,
                else_e,
                ..
            } => cond.is_pure() && then_e.is_pure() && else_e.is_pure(),
            Expr::Sel { from, .. } => from.is_pure(),
            Expr::Call { pure, args, .. } => *pure && args.iter().all(Expr::is_pure),
        }
    }

    /// Calls `f` for every variable reference in this expression.
    pub fn for_each_var_ref(&self, f: &mut impl FnMut(VarId, bool)) {
        match self {
            Expr::VarRef { var, hier, .. } => f(*var, *hier),
            Expr::Const { .. } => {}
            Expr::Unary { arg, .. } => arg.for_each_var_ref(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.for_each_var_ref(f);
                rhs.for_each_var_ref(f);
            }
            Expr::Mux {
                cond,
                then_e,
                else_e,
                ..
            } => {
                cond.for_each_var_ref(f);
                then_e.for_each_var_ref(f);
                else_e.for_each_var_ref(f);
            }
            Expr::Sel { from, .. } => from.for_each_var_ref(f),
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.for_each_var_ref(f);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    vars: Vec<AstVar>,
    pub stmts: Vec<Stmt>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vars: Vec::new(),
            stmts: Vec::new(),
        }
    }

    pub fn add_var(
        &mut self,
        name: impl Into<String>,
        width: u32,
        dir: Direction,
        loc: Loc,
    ) -> VarId {
        assert!(width > 0, "zero-width variables are not representable");
        let id = VarId(self.vars.len() as u32);
        self.vars.push(AstVar {
            name: name.into(),
            width,
            dir,
            has_hier_refs: false,
            loc,
        });
        id
    }

    pub fn var(&self, id: VarId) -> &AstVar {
        &self.vars[id.0 as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut AstVar {
        &mut self.vars[id.0 as usize]
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    pub fn var_ids(&self) -> impl Iterator<Item = VarId> + use<> {
        (0..self.vars.len() as u32).map(VarId)
    }

    pub fn find_var(&self, name: &str) -> Option<VarId> {
        self.vars
            .iter()
            .position(|v| v.name == name)
            .map(|i| VarId(i as u32))
    }

    /// Convenience reference to a whole variable.
    pub fn var_ref(&self, var: VarId, loc: Loc) -> Expr {
        Expr::VarRef {
            var,
            width: self.var(var).width,
            hier: false,
            loc,
        }
    }
}

fn fmt_expr(expr: &Expr, module: &Module, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match expr {
        Expr::VarRef { var, hier, .. } => {
            if *hier {
                write!(f, "$hier.{}", module.var(*var).name)
            } else {
                f.write_str(&module.var(*var).name)
            }
        }
        Expr::Const { value, .. } => write!(f, "{}", value),
        Expr::Unary { op, arg, .. } => {
            write!(f, "{}(", op)?;
            fmt_expr(arg, module, f)?;
            f.write_str(")")
        }
        Expr::Binary { op, lhs, rhs, .. } => {
            write!(f, "{}(", op)?;
            fmt_expr(lhs, module, f)?;
            f.write_str(", ")?;
            fmt_expr(rhs, module, f)?;
            f.write_str(")")
        }
        Expr::Mux {
            cond,
            then_e,
            else_e,
            ..
        } => {
            f.write_str("mux(")?;
            fmt_expr(cond, module, f)?;
            f.write_str(", ")?;
            fmt_expr(then_e, module, f)?;
            f.write_str(", ")?;
            fmt_expr(else_e, module, f)?;
            f.write_str(")")
        }
        Expr::Sel {
            width, from, lsb, ..
        } => {
            fmt_expr(from, module, f)?;
            write!(f, "[{}:{}]", lsb + width - 1, lsb)
        }
        Expr::Call { name, args, .. } => {
            write!(f, "{}(", name)?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                fmt_expr(arg, module, f)?;
            }
            f.write_str(")")
        }
    }
}

/// Renders one statement against its module (for names).
pub struct StmtDisplay<'a> {
    pub module: &'a Module,
    pub stmt: &'a Stmt,
}

impl fmt::Display for StmtDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stmt {
            Stmt::Assign(assign) => {
                match assign.lhs {
                    LValue::Var(var) => write!(f, "assign {} = ", self.module.var(var).name)?,
                    LValue::Slice { var, lsb, width } => write!(
                        f,
                        "assign {}[{}:{}] = ",
                        self.module.var(var).name,
                        lsb + width - 1,
                        lsb
                    )?,
                }
                fmt_expr(&assign.rhs, self.module, f)?;
                f.write_str(";")
            }
            Stmt::Opaque { exprs, .. } => {
                f.write_str("/* opaque */ [")?;
                for (i, expr) in exprs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    fmt_expr(expr, self.module, f)?;
                }
                f.write_str("];")
            }
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {};", self.name)?;
        for var in &self.vars {
            let dir = match var.dir {
                Direction::None => "wire",
                Direction::Input => "input wire",
                Direction::Output => "output wire",
                Direction::Inout => "inout wire",
            };
            if var.width == 1 {
                writeln!(f, "  {} {};", dir, var.name)?;
            } else {
                writeln!(f, "  {} [{}:0] {};", dir, var.width - 1, var.name)?;
            }
        }
        for stmt in &self.stmts {
            writeln!(
                f,
                "  {}",
                StmtDisplay {
                    module: self,
                    stmt
                }
            )?;
        }
        f.write_str("endmodule\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_module_display() {
        let mut m = Module::new("top");
        let a = m.add_var("a", 8, Direction::Output, Loc::new(1, 1));
        let b = m.add_var("b", 8, Direction::Input, Loc::new(2, 1));
        let c = m.add_var("c", 8, Direction::Input, Loc::new(3, 1));
        let rhs = Expr::Binary {
            op: BinaryOp::And,
            width: 8,
            lhs: Box::new(m.var_ref(b, Loc::new(4, 12))),
            rhs: Box::new(m.var_ref(c, Loc::new(4, 16))),
            loc: Loc::new(4, 14),
        };
        m.stmts.push(Stmt::Assign(Assign {
            lhs: LValue::Var(a),
            rhs,
            loc: Loc::new(4, 1),
        }));
        let expected = "module top;\n  output wire [7:0] a;\n  input wire [7:0] b;\n  \
                        input wire [7:0] c;\n  assign a = and(b, c);\nendmodule\n";
        assert_eq!(m.to_string(), expected);
    }

    #[test]
    fn test_expr_purity() {
        let call = Expr::Call {
            name: "rand".into(),
            width: 1,
            args: vec![],
            pure: false,
            loc: Loc::none(),
        };
        assert!(!call.is_pure());
        let wrapped = Expr::Unary {
            op: UnaryOp::Not,
            width: 1,
            arg: Box::new(call),
            loc: Loc::none(),
        };
        assert!(!wrapped.is_pure());
    }
}
