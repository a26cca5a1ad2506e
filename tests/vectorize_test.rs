// SPDX-License-Identifier: Apache-2.0

//! Vectorization soundness through the whole pipeline: bit-blasted scalar
//! operations are fused into wider ones without changing any output value.

use std::collections::HashMap;

use dfgopt::ast::{Assign, Direction, Expr, LValue, Module, Stmt, VarId};
use dfgopt::kind::BinaryOp;
use dfgopt::loc::Loc;
use dfgopt::passes::{DfgConfig, optimize_module};
use dfgopt::sim::eval_module;
use dfgopt::value::PackedVal;

fn loc(line: u32) -> Loc {
    Loc::new(line, 1)
}

/// o<i> = b[i] OP c[i] for every bit of the inputs.
fn bit_blasted(op: BinaryOp, width: u32) -> (Module, VarId, VarId, Vec<VarId>) {
    let mut m = Module::new("blast");
    let b = m.add_var("b", width, Direction::Input, loc(1));
    let c = m.add_var("c", width, Direction::Input, loc(2));
    let mut outs = Vec::new();
    for i in 0..width {
        let o = m.add_var(format!("o{}", i), 1, Direction::Output, loc(3 + i));
        let sel_b = Expr::Sel {
            width: 1,
            from: Box::new(m.var_ref(b, loc(10 + i))),
            lsb: i,
            loc: loc(10 + i),
        };
        let sel_c = Expr::Sel {
            width: 1,
            from: Box::new(m.var_ref(c, loc(10 + i))),
            lsb: i,
            loc: loc(10 + i),
        };
        m.stmts.push(Stmt::Assign(Assign {
            lhs: LValue::Var(o),
            rhs: Expr::Binary {
                op,
                width: 1,
                lhs: Box::new(sel_b),
                rhs: Box::new(sel_c),
                loc: loc(10 + i),
            },
            loc: loc(10 + i),
        }));
        outs.push(o);
    }
    (m, b, c, outs)
}

fn vectorizing_config() -> DfgConfig {
    DfgConfig {
        vectorize: true,
        ..DfgConfig::default()
    }
}

#[test]
fn test_two_bit_and_soundness() {
    let (original, b, c, outs) = bit_blasted(BinaryOp::And, 2);
    let mut optimized = original.clone();
    let stats = optimize_module(&mut optimized, &vectorizing_config());
    assert_eq!(stats.initial_packs, 2, "selects over b and over c");
    assert_eq!(stats.sink_packs, 1, "the two ANDs fuse");
    assert_eq!(stats.converted_packs, 3);

    // One wide AND of the whole inputs survives.
    let listing = optimized.to_string();
    assert!(listing.contains("= and(b, c);"), "{}", listing);

    // Exhaustive over all 4 combinations of b, c in {0,1}^2 per bit.
    for bv in 0..4u64 {
        for cv in 0..4u64 {
            let mut binding = HashMap::new();
            binding.insert(b, PackedVal::from_u64(2, bv));
            binding.insert(c, PackedVal::from_u64(2, cv));
            let expect = eval_module(&original, &binding);
            let actual = eval_module(&optimized, &binding);
            for &o in &outs {
                assert_eq!(
                    expect[&o], actual[&o],
                    "output {} diverged at b={} c={}",
                    original.var(o).name, bv, cv
                );
            }
        }
    }
}

#[test]
fn test_wider_xor_soundness() {
    let (original, b, c, outs) = bit_blasted(BinaryOp::Xor, 4);
    let mut optimized = original.clone();
    let stats = optimize_module(&mut optimized, &vectorizing_config());
    assert_eq!(stats.initial_packs, 2);
    assert!(stats.converted_packs >= 3);

    for bv in 0..16u64 {
        for cv in 0..16u64 {
            let mut binding = HashMap::new();
            binding.insert(b, PackedVal::from_u64(4, bv));
            binding.insert(c, PackedVal::from_u64(4, cv));
            let expect = eval_module(&original, &binding);
            let actual = eval_module(&optimized, &binding);
            for &o in &outs {
                assert_eq!(expect[&o], actual[&o], "b={} c={}", bv, cv);
            }
        }
    }
}

#[test]
fn test_vectorization_is_deterministic() {
    let (original, _, _, _) = bit_blasted(BinaryOp::Or, 4);
    let mut first = original.clone();
    optimize_module(&mut first, &vectorizing_config());
    let mut second = original.clone();
    optimize_module(&mut second, &vectorizing_config());
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn test_disabled_by_default() {
    let (original, _, _, _) = bit_blasted(BinaryOp::And, 2);
    let mut optimized = original.clone();
    let stats = optimize_module(&mut optimized, &DfgConfig::default());
    assert_eq!(stats.initial_packs, 0);
    assert_eq!(stats.converted_packs, 0);
}
