//! 过滤器性能基准测试
//!
//! 分别测量单个操作符求值、预解析表达式求值和含解析的完整调用。

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use filter_engine::{ConditionEvaluator, FilterContext, FilterHelper, Operator, RuleParser};
use serde_json::{Value, json};
use std::hint::black_box;

fn sample_context() -> FilterContext {
    FilterContext::from_value(json!({
        "age": 34,
        "state": "Texas",
        "lead": {
            "email": "someone@example.com",
            "utm_source": "google",
            "score": "87"
        }
    }))
}

fn sample_expression(leaves: usize) -> String {
    let rules: Vec<Value> = (0..leaves)
        .map(|i| {
            json!({
                "id": format!("r{}", i),
                "field": "age",
                "type": "number",
                "input": "number",
                "operator": "greater_or_equal",
                "value": i
            })
        })
        .collect();

    json!({"condition": "AND", "rules": rules}).to_string()
}

/// 操作符基准
fn bench_operators(c: &mut Criterion) {
    let mut group = c.benchmark_group("operators");

    let cases: Vec<(&str, Operator, Value, Value)> = vec![
        ("equal_loose", Operator::Equal, json!("100"), json!(100)),
        ("greater", Operator::Greater, json!(34), json!(18)),
        ("between", Operator::Between, json!(15), json!([10, 20])),
        ("in", Operator::In, json!("c"), json!(["a", "b", "c", "d"])),
        ("contains", Operator::Contains, json!("hello world"), json!("world")),
        ("regex", Operator::Regex, json!("someone@example.com"), json!(r"^[\w.]+@example\.com$")),
    ];

    for (name, operator, context_value, rule_value) in &cases {
        group.bench_function(*name, |b| {
            b.iter(|| {
                ConditionEvaluator::evaluate(
                    black_box(Some(context_value)),
                    black_box(*operator),
                    black_box(rule_value),
                )
            })
        });
    }

    group.finish();
}

/// 表达式规模基准
fn bench_expression_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("expression_size");
    let context = sample_context();
    let parser = RuleParser::new();

    for leaves in [1usize, 10, 50] {
        let expression = sample_expression(leaves);
        let compiled = parser.parse_str(&expression).unwrap();

        group.bench_with_input(BenchmarkId::new("compiled", leaves), &compiled, |b, compiled| {
            let mut helper = FilterHelper::new();
            b.iter(|| {
                let matched = helper.filter_compiled(black_box(compiled), black_box(&context), false);
                helper.clear_errors();
                matched
            })
        });

        group.bench_with_input(BenchmarkId::new("parse_and_filter", leaves), &expression, |b, expression| {
            let mut helper = FilterHelper::new();
            b.iter(|| {
                let matched = helper.filter(black_box(expression), black_box(&context), false);
                helper.clear_errors();
                matched
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_operators, bench_expression_size);
criterion_main!(benches);
