// SPDX-License-Identifier: Apache-2.0

//! Reference evaluator for a module's combinational statements.
//!
//! Statements are single-assignment and acyclic, but not necessarily in
//! dependency order (conversion from graph form emits them in graph
//! iteration order), so evaluation sweeps until every assignment has run.
//! A variable assembled from several slice assignments only becomes
//! readable once all of them have executed.
//!
//! This is the test oracle for the semantic-equivalence properties of the
//! translation and optimization pipeline; it is not a performance-relevant
//! simulator.

use std::collections::HashMap;

use crate::ast::{Expr, LValue, Module, Stmt, VarId};
use crate::kind;
use crate::value::PackedVal;

/// Evaluates the module for one input binding. `inputs` must provide a
/// value for every variable that is read but never assigned. Returns the
/// final value of every bound variable.
pub fn eval_module(module: &Module, inputs: &HashMap<VarId, PackedVal>) -> HashMap<VarId, PackedVal> {
    let assigns: Vec<&crate::ast::Assign> = module
        .stmts
        .iter()
        .filter_map(|stmt| match stmt {
            Stmt::Assign(assign) => Some(assign),
            Stmt::Opaque { .. } => None,
        })
        .collect();

    // How many assignments still have to run before each variable's value
    // is complete.
    let mut remaining: HashMap<VarId, usize> = HashMap::new();
    for assign in &assigns {
        *remaining.entry(assign.lhs.var()).or_insert(0) += 1;
    }

    let mut env: HashMap<VarId, PackedVal> = HashMap::new();
    for (&var, value) in inputs {
        assert_eq!(
            value.width(),
            module.var(var).width,
            "input width mismatch for {}",
            module.var(var).name
        );
        // Assigned variables are computed; an input binding for them is
        // ignored rather than merged.
        if !remaining.contains_key(&var) {
            env.insert(var, value.clone());
        }
    }

    // Partial results of variables with slice assignments.
    let mut partial: HashMap<VarId, PackedVal> = HashMap::new();
    let mut done = vec![false; assigns.len()];
    let mut n_done = 0;
    loop {
        let mut progress = false;
        for (i, assign) in assigns.iter().enumerate() {
            if done[i] {
                continue;
            }
            let mut ready = true;
            assign.rhs.for_each_var_ref(&mut |var, _| {
                if !env.contains_key(&var) {
                    ready = false;
                }
            });
            if !ready {
                continue;
            }
            let value = eval_expr(module, &env, &assign.rhs);
            let target = assign.lhs.var();
            let width = module.var(target).width;
            let acc = partial
                .entry(target)
                .or_insert_with(|| PackedVal::zeros(width));
            match assign.lhs {
                LValue::Var(_) => {
                    assert_eq!(value.width(), width, "assignment width mismatch");
                    *acc = value;
                }
                LValue::Slice { lsb, width: w, .. } => {
                    assert_eq!(value.width(), w, "slice assignment width mismatch");
                    for bit in 0..w {
                        acc.set_bit(lsb + bit, value.bit(bit));
                    }
                }
            }
            done[i] = true;
            n_done += 1;
            progress = true;
            let left = remaining.get_mut(&target).unwrap();
            *left -= 1;
            if *left == 0 {
                env.insert(target, partial.remove(&target).unwrap());
            }
        }
        if n_done == assigns.len() {
            break;
        }
        assert!(
            progress,
            "no progress evaluating '{}': undriven variable or cyclic logic",
            module.name
        );
    }
    env
}

pub fn eval_expr(module: &Module, env: &HashMap<VarId, PackedVal>, expr: &Expr) -> PackedVal {
    match expr {
        Expr::VarRef { var, .. } => env
            .get(var)
            .unwrap_or_else(|| panic!("unbound variable '{}'", module.var(*var).name))
            .clone(),
        Expr::Const { value, .. } => value.clone(),
        Expr::Unary { op, width, arg, .. } => {
            let arg = eval_expr(module, env, arg);
            kind::eval_unary(*op, &arg, *width)
        }
        Expr::Binary {
            op,
            width,
            lhs,
            rhs,
            ..
        } => {
            let lhs = eval_expr(module, env, lhs);
            let rhs = eval_expr(module, env, rhs);
            kind::eval_binary(*op, &lhs, &rhs, *width)
        }
        Expr::Mux {
            cond,
            then_e,
            else_e,
            ..
        } => {
            if eval_expr(module, env, cond).bit(0) {
                eval_expr(module, env, then_e)
            } else {
                eval_expr(module, env, else_e)
            }
        }
        Expr::Sel {
            width, from, lsb, ..
        } => eval_expr(module, env, from).select(*lsb, *width),
        Expr::Call { name, .. } => panic!("cannot evaluate call to '{}'", name),
    }
}
