// SPDX-License-Identifier: Apache-2.0

//! Dataflow graph (DFG) optimization mid-end for HDL compilation.
//!
//! The crate pulls the pure combinational logic of a module out of a
//! tree-shaped statement IR ([`ast`]) into a graph IR ([`dfg`]), runs a
//! sequence of canonicalizing and simplifying passes ([`passes`], optionally
//! [`vectorize`]), and converts the result back into statement form. The
//! translation is conservative: anything the graph cannot represent is left
//! untouched in the tree.
//!
//! Basic example usage:
//! ```
//! use dfgopt::ast::{Assign, Direction, Expr, LValue, Module, Stmt};
//! use dfgopt::kind::BinaryOp;
//! use dfgopt::loc::Loc;
//! use dfgopt::passes::{DfgConfig, optimize_module};
//!
//! let mut m = Module::new("demo");
//! let a = m.add_var("a", 8, Direction::Input, Loc::new(1, 1));
//! let b = m.add_var("b", 8, Direction::Input, Loc::new(2, 1));
//! let o = m.add_var("o", 8, Direction::Output, Loc::new(3, 1));
//! let rhs = Expr::Binary {
//!     op: BinaryOp::And,
//!     width: 8,
//!     lhs: Box::new(m.var_ref(a, Loc::new(4, 1))),
//!     rhs: Box::new(m.var_ref(b, Loc::new(4, 1))),
//!     loc: Loc::new(4, 1),
//! };
//! m.stmts.push(Stmt::Assign(Assign { lhs: LValue::Var(o), rhs, loc: Loc::new(4, 1) }));
//! let stats = optimize_module(&mut m, &DfgConfig::default());
//! assert_eq!(stats.stmts_captured, 1);
//! assert!(m.to_string().contains("assign o = and(a, b);"));
//! ```

pub mod ast;
pub mod ast_to_dfg;
pub mod dfg;
pub mod dfg_to_ast;
pub mod dump;
pub mod hasher;
pub mod kind;
pub mod loc;
pub mod passes;
pub mod sim;
pub mod value;
pub mod vectorize;
