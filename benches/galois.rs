use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use snc::galois::{construct_field, gf_mul, region_madd};

fn bench_gf_mul(c: &mut Criterion) {
    construct_field();
    c.bench_function("gf_mul", |b| {
        b.iter(|| {
            let mut acc = 0u8;
            for x in 0u8..=255 {
                acc ^= gf_mul(black_box(x), black_box(0xA7));
            }
            acc
        })
    });
}

fn bench_region_madd(c: &mut Criterion) {
    construct_field();
    let mut group = c.benchmark_group("region_madd");
    for &size in &[64usize, 1024, 16 * 1024] {
        let src: Vec<u8> = (0..size).map(|i| (i * 31) as u8).collect();
        let mut dst = vec![0u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{}B", size), |b| {
            b.iter(|| region_madd(black_box(&mut dst), black_box(&src), 0x53))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_gf_mul, bench_region_madd);
criterion_main!(benches);
