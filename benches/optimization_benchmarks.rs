//! Benchmarks for the stencil optimizer.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stencilopt::autotuning::{generate_block_shapes, ArgValue, Arguments, AutotuneOptions, KernelDimension, Level};
use stencilopt::dse::{Rewriter, RewriterConfig};
use stencilopt::ir::Cluster;
use stencilopt::symbolics::{common_subexprs_elimination, Assignment, Dimension, Expr, Function, Index};

/// A 3-D, 8th-order Laplacian update with a trigonometric coefficient.
fn stencil() -> Cluster {
    let t = Dimension::time("t");
    let dims = [Dimension::space("x"), Dimension::space("y"), Dimension::space("z")];
    let u = Function::input("u");
    let m = Function::input("m");
    let at = |offsets: [i64; 3], dt: i64| {
        let mut indices = vec![Index::at(&t, dt)];
        indices.extend(dims.iter().zip(offsets).map(|(d, o)| Index::at(d, o)));
        u.at(indices)
    };
    let weights = [-2.847_222, 1.6, -0.2, 0.025_396_8, -0.001_785_71];

    let mut laplacian = Vec::new();
    for axis in 0..3 {
        for (k, w) in weights.iter().enumerate().skip(1) {
            for sign in [-1, 1] {
                let mut offsets = [0; 3];
                offsets[axis] = sign * k as i64;
                laplacian.push(Expr::num(*w) * at(offsets, 0) / Expr::symbol("h").powi(2));
            }
        }
    }
    laplacian.push(Expr::num(3.0 * weights[0]) * at([0; 3], 0) / Expr::symbol("h").powi(2));

    let coefficient = m.at(dims.iter().map(|d| Index::at(d, 0)).collect()).sin();
    let rhs = Expr::num(2.0) * at([0; 3], 0) - at([0; 3], -1) + coefficient * Expr::add(laplacian);
    let mut space = vec![t.clone()];
    space.extend(dims.iter().cloned());
    Cluster::from_exprs(vec![Assignment::new(at([0; 3], 1), rhs)], &space)
}

/// Benchmark the predefined rewrite pipelines.
fn bench_pipelines(c: &mut Criterion) {
    let cluster = stencil();
    for (name, rewriter) in [
        ("rewrite_basic", Rewriter::basic(RewriterConfig::default())),
        ("rewrite_advanced", Rewriter::advanced(RewriterConfig::default())),
        ("rewrite_aggressive", Rewriter::aggressive(RewriterConfig::default())),
    ] {
        c.bench_function(name, |b| b.iter(|| rewriter.run(black_box(cluster.clone()))));
    }
}

/// Benchmark common sub-expression elimination alone.
fn bench_cse(c: &mut Criterion) {
    let cluster = stencil();
    c.bench_function("cse_laplacian", |b| {
        b.iter(|| {
            let mut counter = 0;
            let mut make = || {
                counter += 1;
                Expr::symbol(format!("r{}", counter))
            };
            common_subexprs_elimination(black_box(&cluster.exprs), &mut make)
        })
    });
}

/// Benchmark candidate generation for a 3-D blocked kernel.
fn bench_block_shapes(c: &mut Criterion) {
    let blockable: Vec<KernelDimension> = ["x", "y", "z"]
        .iter()
        .map(|d| KernelDimension::Block {
            dim: Dimension::space(format!("{}0_blk0", d)),
            step: format!("{}0_blk0_size", d),
            root: Dimension::space(*d),
        })
        .collect();
    let mut args = Arguments::new();
    for d in ["x", "y", "z"] {
        args.insert(format!("{}_m", d), ArgValue::Int(0));
        args.insert(format!("{}_M", d), ArgValue::Int(511));
    }
    let options = AutotuneOptions::default();

    c.bench_function("block_shapes_aggressive", |b| {
        b.iter(|| generate_block_shapes(black_box(&blockable), &args, Level::Aggressive, &options))
    });
}

criterion_group!(benches, bench_pipelines, bench_cse, bench_block_shapes);
criterion_main!(benches);
