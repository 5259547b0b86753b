//! Statement Classification Benchmarks
//!
//! Classification runs before every query, so it should stay well under a millisecond even for
//! long analytical statements.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use querygate::{DatabaseType, KeywordPolicy, StatementClassifier};

const SIMPLE: &str = "SELECT id, name FROM users WHERE id = 42";

const ANALYTICAL: &str = "
    WITH recent AS (
        SELECT o.customer_id, SUM(o.total) AS spent
        FROM orders o
        WHERE o.created_at > now() - interval '30 days' -- 'DELETE' in a comment
        GROUP BY o.customer_id
    )
    SELECT c.name, r.spent, 'UPDATE me' AS note
    FROM customers c
    JOIN recent r ON r.customer_id = c.id
    WHERE c.\"drop\" IS NULL
    ORDER BY r.spent DESC
    LIMIT 50";

const REJECTED: &str = "SELECT 1; DROP TABLE users";

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    for engine in [DatabaseType::Postgres, DatabaseType::MySQL, DatabaseType::SQLite] {
        let classifier = StatementClassifier::new(engine, KeywordPolicy::default());
        let cases = [("simple", SIMPLE), ("analytical", ANALYTICAL), ("rejected", REJECTED)];
        for (label, sql) in cases {
            group.bench_with_input(BenchmarkId::new(engine.as_str(), label), sql, |b, sql| {
                b.iter(|| classifier.classify(black_box(sql)));
            });
        }
    }

    group.finish();
}

fn bench_long_in_list(c: &mut Criterion) {
    let ids: Vec<String> = (1..=5_000).map(|i| i.to_string()).collect();
    let sql = format!("SELECT * FROM events WHERE id IN ({})", ids.join(", "));
    let classifier = StatementClassifier::new(DatabaseType::Postgres, KeywordPolicy::default());

    c.bench_function("classify_5000_item_in_list", |b| {
        b.iter(|| {
            let verdict = classifier.classify(black_box(&sql));
            assert!(verdict.is_allowed());
            verdict
        });
    });
}

criterion_group!(benches, bench_classify, bench_long_in_list);
criterion_main!(benches);
