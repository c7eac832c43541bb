//! Benchmarks for per-item request building
//!
//! This benchmark measures:
//! - Provider request bodies for plain and structured items
//! - Shorthand schema to JSON-Schema conversion
//! - Batch input file encoding

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use ai_batch::adapters::{anthropic, bedrock, google, openai};
use ai_batch::structured::SimpleSchema;
use ai_batch::transport::jsonl;
use ai_batch::BatchItem;

fn plain_item() -> BatchItem {
    BatchItem::new("plain", "Summarize the plot of Hamlet in two sentences.")
        .with_system("You are a concise literary assistant.")
        .with_temperature(0.3)
        .with_max_tokens(256)
}

fn structured_item() -> BatchItem {
    BatchItem::new("structured", "Extract the people mentioned in the text.").with_schema(
        SimpleSchema::from(json!({
            "people": [{"name": "text", "age": "number", "is_main_character": "boolean"}],
            "setting": "where the story takes place"
        })),
    )
}

fn bench_request_bodies(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_bodies");
    for (label, item) in [("plain", plain_item()), ("structured", structured_item())] {
        group.bench_with_input(BenchmarkId::new("openai", label), &item, |b, item| {
            b.iter(|| openai::batch_line(black_box(item), "gpt-4o-mini"))
        });
        group.bench_with_input(BenchmarkId::new("anthropic", label), &item, |b, item| {
            b.iter(|| anthropic::message_params(black_box(item), "claude-3-5-haiku-latest"))
        });
        group.bench_with_input(BenchmarkId::new("bedrock", label), &item, |b, item| {
            b.iter(|| bedrock::invoke_body(black_box(item), "anthropic.claude-3-haiku-20240307-v1:0"))
        });
        group.bench_with_input(BenchmarkId::new("gemini", label), &item, |b, item| {
            b.iter(|| google::generate_body(black_box(item)))
        });
    }
    group.finish();
}

fn bench_schema_conversion(c: &mut Criterion) {
    let shorthand = json!({
        "title": "text",
        "chapters": [{"name": "text", "pages": "number"}],
        "meta": {"isbn": "text", "published": "boolean"}
    });
    c.bench_function("schema_to_json_schema", |b| {
        b.iter(|| SimpleSchema::from(black_box(&shorthand)).to_json_schema())
    });
}

fn bench_input_file(c: &mut Criterion) {
    let items: Vec<_> = (0..1000)
        .map(|i| BatchItem::new(format!("item-{i}"), format!("Prompt number {i}")))
        .collect();

    let mut group = c.benchmark_group("input_file");
    group.throughput(Throughput::Elements(items.len() as u64));
    group.bench_function("openai_jsonl_1000", |b| {
        b.iter(|| {
            let lines: Vec<_> = items
                .iter()
                .map(|i| openai::batch_line(i, "gpt-4o-mini"))
                .collect();
            jsonl::encode(black_box(&lines)).unwrap()
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_request_bodies,
    bench_schema_conversion,
    bench_input_file
);
criterion_main!(benches);
