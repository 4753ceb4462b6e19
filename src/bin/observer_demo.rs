//! Scripted walkthrough of the observer layer.
//!
//! Registers Rec and User observers of every kind, then inserts, updates and
//! deletes objects (including from a background thread) and logs each
//! callback. Finishes with a timed bulk insert.
//!
//! Usage: `observer-demo [bulk-insert-count]` (default 10000).
//! Set `RUST_LOG=debug` to see dispatch rounds.

use std::env;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{error, info};

use entity_observer::context::{ObjectContext, ObjectRef, ObjectStore};
use entity_observer::{Dispatcher, ObserverResult, ObserverToken};

fn observe_entity(
    dispatcher: &Dispatcher<ObjectRef>,
    entity: &'static str,
) -> Vec<ObserverToken<ObjectRef>> {
    vec![
        dispatcher.observe_deletes(entity, move |objs| info!("{entity} deletions: {}", objs.len())),
        dispatcher.observe_inserts(entity, move |objs| info!("{entity} inserts: {}", objs.len())),
        dispatcher.observe_updates(entity, move |objs| info!("{entity} updates: {}", objs.len())),
        dispatcher.observe_all_changes(entity, move |c| {
            info!(
                "{entity} all changes: deletes: {}, inserts: {}, updates: {}",
                c.deletes.len(),
                c.inserts.len(),
                c.updates.len()
            );
        }),
    ]
}

fn first_of(context: &ObjectContext, entity: &str) -> ObserverResult<Option<ObjectRef>> {
    Ok(context.fetch(entity, Some(1))?.into_iter().next())
}

fn run(bulk: usize) -> ObserverResult<()> {
    let dispatcher: Arc<Dispatcher<ObjectRef>> = Arc::new(Dispatcher::default());
    let store = ObjectStore::new();
    let context = ObjectContext::new(Arc::clone(&store), dispatcher.clone());

    let mut observers = observe_entity(&dispatcher, "Rec");
    observers.extend(observe_entity(&dispatcher, "User"));

    info!("insert user");
    context.insert("User", [("first", "Ada"), ("last", "Lovelace"), ("school", "Home")])?;
    context.save()?;

    info!("update user");
    if let Some(user) = first_of(&context, "User")? {
        context.set(user.id, "first", "Augusta")?;
        context.save()?;
    }

    info!("insert two recs and touch the user in one save");
    context.insert("Rec", [("title", "first rec")])?;
    context.insert("Rec", [("title", "second rec")])?;
    if let Some(user) = first_of(&context, "User")? {
        context.set(user.id, "age", 36)?;
    }
    context.save()?;

    info!("insert rec in background");
    let worker = {
        let store = Arc::clone(&store);
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || -> ObserverResult<()> {
            let background = ObjectContext::new(store, dispatcher);
            background.insert("Rec", [("title", "background rec")])?;
            background.save()?;
            Ok(())
        })
    };
    match worker.join() {
        Ok(result) => result?,
        Err(_) => error!("background worker panicked"),
    }

    info!("delete rec and user");
    if let Some(rec) = first_of(&context, "Rec")? {
        context.delete(rec.id)?;
    }
    if let Some(user) = first_of(&context, "User")? {
        context.delete(user.id)?;
    }
    context.save()?;

    // Only an aggregate observer stays attached for the bulk run.
    drop(observers);
    let _bulk_observer = dispatcher.observe_all_changes("Rec", |_| {});

    for i in 0..bulk {
        context.insert(
            "Rec",
            [
                ("first", format!("{i} first")),
                ("last", format!("{i} last")),
                ("title", format!("{i} title")),
            ],
        )?;
    }
    let start = Instant::now();
    context.save()?;
    info!(
        inserts = bulk,
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        recs = store.count(&"Rec".into())?,
        "bulk insert with aggregate observer"
    );
    info!(
        rounds = dispatcher.rounds(),
        invocations = dispatcher.invocations(),
        pruned = dispatcher.pruned_subscriptions(),
        "done"
    );
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let bulk = match env::args().nth(1).map(|s| s.parse::<usize>()) {
        None => 10_000,
        Some(Ok(n)) => n,
        Some(Err(e)) => {
            eprintln!("observer-demo: invalid bulk insert count: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(bulk) {
        eprintln!("observer-demo failed: {e}");
        std::process::exit(1);
    }
}
