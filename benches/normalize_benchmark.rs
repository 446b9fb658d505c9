use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{seq::SliceRandom, thread_rng, Rng};
use serde_json::{json, Value};
use travel_gateway::{audit::redact, response::normalize_search_response};

const SEARCH_SAMPLE: &str = include_str!("../samples/search_response.json");

// Synthetic search response with `count` outbound offers
fn search_response(count: usize) -> Value {
    let mut rng = thread_rng();
    let carriers = ["6E", "AI", "UK", "SG", "QP"];

    let results: Vec<Value> = (0..count)
        .map(|i| {
            let carrier = carriers.choose(&mut rng).copied().unwrap_or("6E");
            json!({
                "ResultIndex": format!("OB{i}"),
                "IsRefundable": rng.gen_bool(0.5),
                "Fare": {
                    "Currency": "INR",
                    "BaseFare": rng.gen_range(3000..15000),
                    "Tax": rng.gen_range(500..2500),
                    "PublishedFare": rng.gen_range(3500..17500)
                },
                "Segments": [[{
                    "Airline": { "AirlineCode": carrier, "FlightNumber": rng.gen_range(100..9999).to_string(), "FareClass": "R" },
                    "Origin": { "Airport": { "AirportCode": "DEL" }, "DepTime": "2025-06-10T06:15:00" },
                    "Destination": { "Airport": { "AirportCode": "BOM" }, "ArrTime": "2025-06-10T08:20:00" },
                    "CabinClass": rng.gen_range(1..=6)
                }]]
            })
        })
        .collect();

    json!({
        "Response": {
            "ResponseStatus": 1,
            "TraceId": "bench-trace",
            "Results": [results]
        }
    })
}

pub fn normalize_benchmark(c: &mut Criterion) {
    let sample: Value = serde_json::from_str(SEARCH_SAMPLE).expect("sample parses");
    let received_at = Utc::now();
    let ttl = Duration::seconds(900);

    c.bench_function("normalize_search_response/sample", |b| {
        b.iter(|| normalize_search_response(black_box(&sample), received_at, ttl))
    });

    let mut group = c.benchmark_group("normalize_search_response");
    for count in [10, 100, 1000].iter() {
        let body = search_response(*count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &body, |b, body| {
            b.iter(|| normalize_search_response(black_box(body), received_at, ttl))
        });
    }
    group.finish();

    c.bench_function("redact/sample", |b| b.iter(|| redact(black_box(&sample))));
}

criterion_group!(benches, normalize_benchmark);
criterion_main!(benches);
