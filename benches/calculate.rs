use std::{collections::HashSet, sync::Arc};

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

use tweek_core::{
    context::InMemoryContextDriver,
    engine::{Engine, EngineConfig},
    parser::JPadBuilder,
    repository::{RulesRepository, Ruleset},
    rules::RuleDefinition,
    Identity, ValueType,
};

fn ruleset() -> Ruleset {
    let mut rules = (0..100)
        .map(|i| {
            let definition = JPadBuilder::new()
                .add_single_variant_rule(
                    json!({ "device.Country": "israel", "device.Age": { "$gt": 18 } }),
                    "adult",
                )
                .add_multi_variant_rule(
                    json!({ "device.Country": "israel" }),
                    "device",
                    json!({ "type": "weighted", "args": { "a": 30, "b": 70 } }),
                )
                .add_single_variant_rule(json!({}), "default")
                .generate();
            (format!("abc/path{i}"), definition)
        })
        .collect::<std::collections::HashMap<_, _>>();

    rules.insert(
        "abc/dependent".to_owned(),
        JPadBuilder::new()
            .with_value_type(ValueType::Boolean)
            .add_single_variant_rule(json!({ "@@key:abc/path1": "adult" }), true)
            .generate(),
    );
    rules.insert(
        "abc/alias".to_owned(),
        RuleDefinition::new("alias", "abc/dependent"),
    );

    Ruleset {
        version: "bench".into(),
        rules,
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    let repository = Arc::new(RulesRepository::default());
    repository.load(ruleset());

    let device = Identity::new("device", "1");
    let contexts = InMemoryContextDriver::new().with_context(
        device.clone(),
        [("Country", json!("Israel")), ("Age", json!(30))],
    );
    let engine = Engine::new(repository, Arc::new(contexts), EngineConfig::default());
    let identities = HashSet::from([device]);

    {
        let mut group = c.benchmark_group("alias-with-dependency");
        group.throughput(Throughput::Elements(1));
        group.bench_function("calculate_path", |b| {
            b.iter(|| {
                runtime.block_on(
                    engine.calculate_path(black_box("abc/alias"), black_box(&identities)),
                )
            })
        });
        group.finish();
    }

    {
        let mut group = c.benchmark_group("wildcard");
        group.throughput(Throughput::Elements(102));
        group.bench_function("calculate_path", |b| {
            b.iter(|| {
                runtime.block_on(engine.calculate_path(black_box("abc/_"), black_box(&identities)))
            })
        });
        group.finish();
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
