use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use jsoniq_engine::{CompiledQuery, MemoryFileReader, RuntimeConfiguration, compile_query, evaluate_compiled, parse_module};

fn sample_queries() -> Vec<&'static str> {
    vec![
        "for $x in 1 to 1000 where $x mod 3 eq 0 return $x * $x",
        "for $a in 1 to 30 for $b in 1 to 30 where $a + $b eq 31 return [$a, $b]",
        r#"for $x in 1 to 1000 group by $k := $x mod 7 order by $k descending return {"k": $k, "n": count($x)}"#,
        "let $f := function($x) { $x + 1 } return sum(for $i in 1 to 500 return $f($i))",
        "for $x in parallelize(1 to 1000) where $x gt 500 order by $x return $x",
    ]
}

fn benchmark_parser(c: &mut Criterion) {
    let queries = sample_queries();
    c.bench_function("parser/parse_module", |b| {
        b.iter(|| {
            for q in &queries {
                let module = parse_module(black_box(q)).expect("parse failure");
                black_box(module);
            }
        })
    });
}

fn benchmark_compiler(c: &mut Criterion) {
    let queries = sample_queries();
    c.bench_function("compiler/compile_query", |b| {
        b.iter(|| {
            for q in &queries {
                let compiled = compile_query(black_box(q)).expect("compile failure");
                black_box(compiled);
            }
        })
    });
}

fn prepared_queries() -> Vec<(String, CompiledQuery)> {
    sample_queries().into_iter().map(|q| (q.to_string(), compile_query(q).expect("compile failure"))).collect()
}

fn benchmark_evaluator(c: &mut Criterion) {
    let config = Arc::new(RuntimeConfiguration::builder().result_size_cap(0).build());
    let reader = Arc::new(MemoryFileReader::new());
    let compiled = prepared_queries();

    let mut group = c.benchmark_group("evaluator/evaluate");
    for (name, query) in &compiled {
        group.bench_with_input(BenchmarkId::from_parameter(name), query, |b, query| {
            b.iter(|| {
                let result = evaluate_compiled(query, Arc::clone(&config), reader.clone()).expect("eval failure");
                black_box(result.items.len());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_parser, benchmark_compiler, benchmark_evaluator);
criterion_main!(benches);
