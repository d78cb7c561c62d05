//! Benchmarks for FORMA control operations

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::{json, Value};

use forma_controls::{FormArray, FormControl, FormGroup};

fn wide_group(size: usize) -> FormGroup {
    FormGroup::new((0..size).map(|i| (format!("f{}", i), FormControl::new(json!(i))))).unwrap()
}

fn bench_leaf_set_value(c: &mut Criterion) {
    let control = FormControl::new(json!(0));
    let mut n = 0i64;

    c.bench_function("leaf_set_value", |b| {
        b.iter(|| {
            n += 1;
            control.set_value(black_box(json!(n))).unwrap();
        })
    });
}

fn bench_child_propagation(c: &mut Criterion) {
    let mut group = c.benchmark_group("child_propagation");
    for size in [4usize, 64, 256] {
        let form = wide_group(size);
        let leaf = form.control("f0").unwrap();
        let mut n = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                n += 1;
                leaf.set_value(black_box(json!(n))).unwrap();
            })
        });
    }
    group.finish();
}

fn bench_group_push_down(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_push_down");
    for size in [4usize, 64, 256] {
        let form = wide_group(size);
        let mut n = 0i64;
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                n += 1;
                let value: Value = (0..size).map(|i| (format!("f{}", i), json!(n))).collect::<serde_json::Map<_, _>>().into();
                form.set_value(black_box(value)).unwrap();
            })
        });
    }
    group.finish();
}

fn bench_array_push_remove(c: &mut Criterion) {
    let array = FormArray::new((0..16).map(|i| FormControl::new(json!(i)))).unwrap();

    c.bench_function("array_push_remove", |b| {
        b.iter(|| {
            array.push(FormControl::new(json!(0))).unwrap();
            array.remove_control(black_box(0)).unwrap();
        })
    });
}

fn bench_deep_clone(c: &mut Criterion) {
    let form = wide_group(32);

    c.bench_function("group_deep_clone", |b| b.iter(|| black_box(form.deep_clone().unwrap())));
}

fn bench_observe(c: &mut Criterion) {
    let form = wide_group(32);
    let observer = form.observe(["controls", "f1", "value"]).unwrap();
    let leaf = form.control("f1").unwrap();
    let mut n = 0i64;

    c.bench_function("observed_child_value", |b| {
        b.iter(|| {
            n += 1;
            leaf.set_value(json!(n)).unwrap();
            black_box(observer.get())
        })
    });
}

criterion_group!(
    benches,
    bench_leaf_set_value,
    bench_child_propagation,
    bench_group_push_down,
    bench_array_push_remove,
    bench_deep_clone,
    bench_observe,
);
criterion_main!(benches);
