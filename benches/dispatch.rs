use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use entity_observer::context::{ManagedObject, ObjectContext, ObjectRef, ObjectStore};
use entity_observer::{ChangeBatch, ChangeKind, Dispatcher, EntityName, ObserverToken};

const INSERTS: usize = 10_000;

fn rec_batch(n: usize) -> ChangeBatch<ObjectRef> {
    let rec = EntityName::new("Rec");
    ChangeBatch::new().with_inserted((0..n).map(|i| {
        let mut obj = ManagedObject::new(rec.clone());
        obj.set("first", format!("{i} first"));
        obj.set("last", format!("{i} last"));
        obj.set("title", format!("{i} title"));
        Arc::new(obj)
    }))
}

fn mixed_batch(types: usize, per_type: usize) -> ChangeBatch<ObjectRef> {
    let mut batch = ChangeBatch::new();
    for t in 0..types {
        let entity = EntityName::new(format!("Entity{t}"));
        for i in 0..per_type {
            let kind = ChangeKind::ALL[i % 3];
            batch.push(kind, Arc::new(ManagedObject::new(entity.clone())));
        }
    }
    batch
}

// One save of 10k Rec inserts with a single aggregate observer attached.
fn bench_save_with_aggregate_observer(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(INSERTS as u64));
    group.sample_size(20);

    group.bench_function("save_10k_recs_aggregate_observer", |b| {
        b.iter_batched(
            || {
                let dispatcher: Arc<Dispatcher<ObjectRef>> = Arc::new(Dispatcher::default());
                let token = dispatcher.observe_all_changes("Rec", |_| {});
                let ctx = ObjectContext::new(ObjectStore::new(), dispatcher.clone());
                for i in 0..INSERTS {
                    ctx.insert(
                        "Rec",
                        [
                            ("first", format!("{i}")),
                            ("last", format!("{i}")),
                            ("title", format!("{i}")),
                        ],
                    )
                    .unwrap();
                }
                (dispatcher, token, ctx)
            },
            |(_dispatcher, _token, ctx)| ctx.save().unwrap(),
            BatchSize::PerIteration,
        );
    });

    group.bench_function("handle_commit_10k_recs_aggregate_observer", |b| {
        let dispatcher = Dispatcher::<ObjectRef>::default();
        let _token = dispatcher.observe_all_changes("Rec", |_| {});
        let batch = rec_batch(INSERTS);
        b.iter(|| dispatcher.handle_commit(&batch).unwrap());
    });

    group.finish();
}

fn bench_many_types_many_subscribers(c: &mut Criterion) {
    let dispatcher = Dispatcher::<ObjectRef>::default();
    let mut tokens: Vec<ObserverToken<ObjectRef>> = Vec::new();
    for t in 0..32 {
        let entity = format!("Entity{t}");
        for kind in ChangeKind::ALL {
            tokens.push(dispatcher.observe(kind, entity.as_str(), |_| {}));
        }
        tokens.push(dispatcher.observe_all_changes(entity.as_str(), |_| {}));
    }
    let batch = mixed_batch(64, 64);

    c.bench_function("dispatch/mixed_64_types_32_observed", |b| {
        b.iter(|| dispatcher.handle_commit(&batch).unwrap());
    });
}

criterion_group!(benches, bench_save_with_aggregate_observer, bench_many_types_many_subscribers);
criterion_main!(benches);
