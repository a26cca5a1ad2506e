// SPDX-License-Identifier: Apache-2.0

//! Command line driver: runs the DFG optimization pipeline over one of a
//! few built-in sample modules and prints the module before and after.
//! Mostly useful for eyeballing the pipeline and producing dot dumps.

use std::path::PathBuf;

use clap::Parser;

use dfgopt::ast::{Assign, Direction, Expr, LValue, Module, Stmt};
use dfgopt::kind::BinaryOp;
use dfgopt::loc::Loc;
use dfgopt::passes::{DfgConfig, optimize_module};
use dfgopt::value::PackedVal;

#[derive(Parser)]
#[command(name = "dfgopt", about = "Dataflow graph optimization demo driver")]
struct Args {
    /// Built-in sample module to process.
    #[arg(long, default_value = "shared-net")]
    sample: String,

    /// List the available samples and exit.
    #[arg(long)]
    list_samples: bool,

    /// Disable peephole rewriting.
    #[arg(long)]
    no_peephole: bool,

    /// Enable SLP vectorization.
    #[arg(long)]
    vectorize: bool,

    /// Split threshold for wide concatenation drivers, in bits.
    #[arg(long, default_value_t = 256)]
    concat_limit: u32,

    /// Directory for Graphviz dumps (no dumps without it).
    #[arg(long)]
    dump_dir: Option<PathBuf>,

    /// Dump verbosity: 0 none, 2 per pass, 3 vectorizer stages.
    #[arg(long, default_value_t = 0)]
    dump_level: u8,

    /// Print the pass statistics as JSON.
    #[arg(long)]
    stats_json: bool,
}

const SAMPLES: &[(&str, fn() -> Module)] = &[
    ("shared-net", sample_shared_net),
    ("reduce-chain", sample_reduce_chain),
    ("bit-blast", sample_bit_blast),
    ("const-fold", sample_const_fold),
];

fn loc(line: u32) -> Loc {
    Loc::new(line, 1)
}

fn binary(op: BinaryOp, width: u32, lhs: Expr, rhs: Expr, at: Loc) -> Expr {
    Expr::Binary {
        op,
        width,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
        loc: at,
    }
}

/// A shared sub-expression feeding several outputs.
fn sample_shared_net() -> Module {
    let mut m = Module::new("shared_net");
    let a = m.add_var("a", 8, Direction::Input, loc(1));
    let b = m.add_var("b", 8, Direction::Input, loc(2));
    let c = m.add_var("c", 8, Direction::Input, loc(3));
    let d = m.add_var("d", 8, Direction::Input, loc(4));
    let o1 = m.add_var("o1", 8, Direction::Output, loc(5));
    let o2 = m.add_var("o2", 8, Direction::Output, loc(6));
    for (line, (out, other)) in [(7, (o1, c)), (8, (o2, d))] {
        let and = binary(
            BinaryOp::And,
            8,
            m.var_ref(a, loc(line)),
            m.var_ref(b, loc(line)),
            loc(line),
        );
        let rhs = binary(BinaryOp::Xor, 8, and, m.var_ref(other, loc(line)), loc(line));
        m.stmts.push(Stmt::Assign(Assign {
            lhs: LValue::Var(out),
            rhs,
            loc: loc(line),
        }));
    }
    m
}

/// A right-leaning xor chain, fodder for tree balancing.
fn sample_reduce_chain() -> Module {
    let mut m = Module::new("reduce_chain");
    let inputs: Vec<_> = (0..8)
        .map(|i| m.add_var(format!("a{}", i), 8, Direction::Input, loc(i + 1)))
        .collect();
    let o = m.add_var("o", 8, Direction::Output, loc(9));
    let mut rhs = m.var_ref(inputs[7], loc(10));
    for &input in inputs[..7].iter().rev() {
        rhs = binary(BinaryOp::Xor, 8, m.var_ref(input, loc(10)), rhs, loc(10));
    }
    m.stmts.push(Stmt::Assign(Assign {
        lhs: LValue::Var(o),
        rhs,
        loc: loc(10),
    }));
    m
}

/// Bit-blasted vector AND: o<i> = b[i] & c[i], fodder for vectorization.
fn sample_bit_blast() -> Module {
    let mut m = Module::new("bit_blast");
    let b = m.add_var("b", 4, Direction::Input, loc(1));
    let c = m.add_var("c", 4, Direction::Input, loc(2));
    for i in 0..4u32 {
        let o = m.add_var(format!("o{}", i), 1, Direction::Output, loc(3 + i));
        let sel_b = Expr::Sel {
            width: 1,
            from: Box::new(m.var_ref(b, loc(7 + i))),
            lsb: i,
            loc: loc(7 + i),
        };
        let sel_c = Expr::Sel {
            width: 1,
            from: Box::new(m.var_ref(c, loc(7 + i))),
            lsb: i,
            loc: loc(7 + i),
        };
        let rhs = binary(BinaryOp::And, 1, sel_b, sel_c, loc(7 + i));
        m.stmts.push(Stmt::Assign(Assign {
            lhs: LValue::Var(o),
            rhs,
            loc: loc(7 + i),
        }));
    }
    m
}

/// Identities and constants the peephole folder chews through.
fn sample_const_fold() -> Module {
    let mut m = Module::new("const_fold");
    let a = m.add_var("a", 8, Direction::Input, loc(1));
    let o = m.add_var("o", 8, Direction::Output, loc(2));
    let masked = binary(
        BinaryOp::And,
        8,
        m.var_ref(a, loc(3)),
        Expr::Const {
            value: PackedVal::ones(8),
            loc: loc(3),
        },
        loc(3),
    );
    let zero = binary(
        BinaryOp::And,
        8,
        Expr::Const {
            value: PackedVal::from_u64(8, 0x0f),
            loc: loc(3),
        },
        Expr::Const {
            value: PackedVal::from_u64(8, 0xf0),
            loc: loc(3),
        },
        loc(3),
    );
    let rhs = binary(BinaryOp::Or, 8, masked, zero, loc(3));
    m.stmts.push(Stmt::Assign(Assign {
        lhs: LValue::Var(o),
        rhs,
        loc: loc(3),
    }));
    m
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_samples {
        for (name, _) in SAMPLES {
            println!("{}", name);
        }
        return Ok(());
    }

    let build = SAMPLES
        .iter()
        .find(|(name, _)| *name == args.sample)
        .map(|(_, build)| build)
        .ok_or_else(|| anyhow::anyhow!("unknown sample '{}' (try --list-samples)", args.sample))?;
    let mut module = build();

    let config = DfgConfig {
        peephole: !args.no_peephole,
        vectorize: args.vectorize,
        wide_concat_limit: args.concat_limit,
        dump_level: args.dump_level,
        dump_dir: args.dump_dir,
    };

    println!("=== before ===");
    print!("{}", module);
    let stats = optimize_module(&mut module, &config);
    println!("=== after ===");
    print!("{}", module);

    if args.stats_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}
