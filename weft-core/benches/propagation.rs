use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use weft_core::array::ArrayRegister;
use weft_core::reactive::{Register, Scheduler};

fn register_flood(c: &mut Criterion) {
    c.bench_function("register_set_1k", |b| {
        let scheduler = Scheduler::new();
        let register = Register::new_in(&scheduler, 0i64);

        let sink = Arc::new(AtomicI64::new(0));
        let sink_clone = Arc::clone(&sink);
        let _sub = register.subscribe(move |value| {
            sink_clone.store(*value, Ordering::Relaxed);
        });

        b.iter(|| {
            for i in 0..1_000 {
                register.set(i);
            }
            black_box(sink.load(Ordering::Relaxed))
        });
    });
}

fn patch_translation(c: &mut Criterion) {
    c.bench_function("map_each_chain_splice", |b| {
        let scheduler = Scheduler::new();
        let source = ArrayRegister::new_in(&scheduler, (0..256).collect());
        let derived = source
            .array_view()
            .map_each(|v: &i64| v * 2)
            .map_each(|v: &i64| v + 1);

        b.iter(|| {
            source.splice(17, 3, vec![1, 2, 3]);
            black_box(derived.get().len())
        });
    });
}

criterion_group!(benches, register_flood, patch_translation);
criterion_main!(benches);
