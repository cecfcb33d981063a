use criterion::{Criterion, criterion_group, criterion_main};
use envmon::entity::sensor::SensorStatus;
use envmon::entity::sensor_reading;
use envmon::readings::analysis::{Bucket, aggregate, detect_gaps};
use envmon::readings::quality::{QualityInputs, is_anomaly, quality_score};
use envmon::units::{Unit, convert};
use std::hint::black_box;
use time::{Duration, OffsetDateTime};

fn synthetic_readings(count: usize) -> Vec<sensor_reading::Model> {
    let start = OffsetDateTime::now_utc() - Duration::days(7);
    (0..count)
        .map(|i| {
            let at = start + Duration::minutes(5 * i as i64);
            sensor_reading::Model {
                id: i as i32,
                sensor_id: (i % 4) as i32,
                station_id: 1,
                value: 20.0 + (i % 17) as f64 * 0.3,
                unit: "celsius".into(),
                recorded_at: at,
                quality_score: 1.0,
                is_anomaly: false,
                created_at: at,
            }
        })
        .collect()
}

fn benchmark_reading_scoring(c: &mut Criterion) {
    let now = OffsetDateTime::now_utc();
    let inputs = QualityInputs {
        in_range: true,
        sensor_status: SensorStatus::Active,
        calibrated_at: Some(now - Duration::days(30)),
        recorded_at: now,
        is_anomaly: false,
    };
    c.bench_function("quality_score", |b| {
        b.iter(|| black_box(quality_score(black_box(&inputs))));
    });

    let history: Vec<f64> = (0..20).map(|i| 20.0 + f64::from(i % 3)).collect();
    c.bench_function("is_anomaly_window_20", |b| {
        b.iter(|| black_box(is_anomaly(black_box(&history), black_box(35.0), 3.0)));
    });

    c.bench_function("convert_fahrenheit_to_celsius", |b| {
        b.iter(|| black_box(convert(black_box(86.0), Unit::Fahrenheit, Unit::Celsius)));
    });
}

fn benchmark_analysis(c: &mut Criterion) {
    let readings = synthetic_readings(10_000);
    let timestamps: Vec<OffsetDateTime> = readings.iter().map(|r| r.recorded_at).collect();

    c.bench_function("aggregate_hourly_10k", |b| {
        b.iter(|| black_box(aggregate(black_box(&readings), Bucket::Hour)));
    });

    c.bench_function("detect_gaps_10k", |b| {
        b.iter(|| black_box(detect_gaps(black_box(&timestamps), None)));
    });
}

criterion_group!(benches, benchmark_reading_scoring, benchmark_analysis);
criterion_main!(benches);
