use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::unbounded;

use entity_observer::context::{ObjectContext, ObjectRef, ObjectStore};
use entity_observer::{CallbackError, ChangeKind, Dispatcher, ObserverError};

fn setup() -> (Arc<Dispatcher<ObjectRef>>, Arc<ObjectStore>, ObjectContext) {
    let dispatcher: Arc<Dispatcher<ObjectRef>> = Arc::new(Dispatcher::default());
    let store = ObjectStore::new();
    let context = ObjectContext::new(Arc::clone(&store), dispatcher.clone());
    (dispatcher, store, context)
}

#[test]
fn delete_is_observed_with_committed_state() {
    let (dispatcher, _store, context) = setup();
    let id = context.insert("Rec", [("first", "testDeletes")]).unwrap();
    context.save().unwrap();

    let (tx, rx) = unbounded();
    let _observer = dispatcher.observe_deletes("Rec", move |recs| {
        tx.send(recs.to_vec()).unwrap();
    });

    context.delete(id).unwrap();
    context.save().unwrap();

    let recs = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].get_str("first"), Some("testDeletes"));
    assert!(rx.try_recv().is_err());
}

#[test]
fn one_save_is_one_round_across_types() {
    let (dispatcher, _store, context) = setup();
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut tokens = Vec::new();
    for entity in ["Rec", "User"] {
        for kind in ChangeKind::ALL {
            let sink = Arc::clone(&log);
            tokens.push(dispatcher.observe(kind, entity, move |objs| {
                sink.lock().unwrap().push(format!("{entity} {kind}: {}", objs.len()));
            }));
        }
        let sink = Arc::clone(&log);
        tokens.push(dispatcher.observe_all_changes(entity, move |c| {
            sink.lock().unwrap().push(format!(
                "{entity} all: {} {} {}",
                c.deletes.len(),
                c.inserts.len(),
                c.updates.len()
            ));
        }));
    }

    let user = context.insert("User", [("first", "a")]).unwrap();
    context.save().unwrap();
    log.lock().unwrap().clear();

    context.set(user, "first", "b").unwrap();
    context.insert("Rec", [("title", "t1")]).unwrap();
    context.insert("Rec", [("title", "t2")]).unwrap();
    let report = context.save().unwrap().unwrap();

    assert_eq!(dispatcher.rounds(), 2);
    assert_eq!(report.types_processed, 2);
    let mut lines = log.lock().unwrap().clone();
    lines.sort();
    assert_eq!(
        lines,
        vec![
            "Rec all: 0 2 0".to_string(),
            "Rec inserted: 2".to_string(),
            "User all: 0 0 1".to_string(),
            "User updated: 1".to_string(),
        ]
    );
}

#[test]
fn background_contexts_share_one_dispatcher() {
    let (dispatcher, store, _main) = setup();
    let (tx, rx) = unbounded();
    let _observer = dispatcher.observe_inserts("Rec", move |recs| {
        for rec in recs {
            tx.send(rec.id).unwrap();
        }
    });

    let workers: Vec<_> = (0..4)
        .map(|w| {
            let store = Arc::clone(&store);
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || {
                let ctx = ObjectContext::new(store, dispatcher);
                for i in 0..25 {
                    ctx.insert("Rec", [("title", format!("{w}-{i}"))]).unwrap();
                    ctx.save().unwrap();
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    let received: Vec<_> = rx.try_iter().collect();
    assert_eq!(received.len(), 100);
    assert_eq!(store.count(&"Rec".into()).unwrap(), 100);
    assert_eq!(dispatcher.rounds(), 100);
}

#[test]
fn subscribing_concurrently_with_commits_is_safe() {
    let (dispatcher, store, _main) = setup();
    let committer = {
        let store = Arc::clone(&store);
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || {
            let ctx = ObjectContext::new(store, dispatcher);
            for _ in 0..200 {
                ctx.insert("User", [("age", 25)]).unwrap();
                ctx.save().unwrap();
            }
        })
    };

    for _ in 0..200 {
        let token = dispatcher.observe_inserts("User", |users| assert!(!users.is_empty()));
        if dispatcher.rounds() % 2 == 0 {
            dispatcher.unsubscribe(token);
        }
    }
    committer.join().unwrap();

    let _final = dispatcher.observe_updates("User", |_| {});
    assert_eq!(dispatcher.registry().live_len(), 1);
}

#[test]
fn failing_subscriber_surfaces_from_save() {
    let (dispatcher, store, context) = setup();
    let _observer = dispatcher.try_observe(ChangeKind::Inserted, "Rec", |_| {
        Err(CallbackError::new("rejected"))
    });

    context.insert("Rec", [("title", "x")]).unwrap();
    let err = context.save().unwrap_err();
    assert!(matches!(err, ObserverError::Callback { .. }));
    // The unit of work itself was committed.
    assert_eq!(store.len().unwrap(), 1);
    assert!(!context.has_changes().unwrap());
}

#[test]
fn concurrent_contexts_merge_edits_to_one_object() {
    let (dispatcher, store, context) = setup();
    let id = context.insert("User", [("x", 0), ("y", 0)]).unwrap();
    context.save().unwrap();

    let (tx, rx) = unbounded();
    let _observer = dispatcher.observe_updates("User", move |users| {
        tx.send(users.to_vec()).unwrap();
    });

    let a = ObjectContext::new(Arc::clone(&store), dispatcher.clone());
    let b = ObjectContext::new(Arc::clone(&store), dispatcher.clone());
    a.set(id, "x", 1).unwrap();
    b.set(id, "y", 1).unwrap();
    a.save().unwrap();
    b.save().unwrap();

    let current = store.get(id).unwrap().unwrap();
    assert_eq!(current.get("x"), Some(&serde_json::Value::from(1)));
    assert_eq!(current.get("y"), Some(&serde_json::Value::from(1)));
    assert_eq!(current.version, 3);

    let first = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    let second = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert_eq!(first[0].version, 2);
    assert_eq!(second[0], current);
}

#[test]
fn edits_to_an_object_deleted_elsewhere_are_not_reported() {
    let (dispatcher, store, context) = setup();
    let id = context.insert("Rec", [("title", "shared")]).unwrap();
    context.save().unwrap();

    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let _observer = dispatcher.observe_all_changes("Rec", move |c| {
        sink.lock()
            .unwrap()
            .push((c.deletes.len(), c.inserts.len(), c.updates.len()));
    });

    let updater = ObjectContext::new(Arc::clone(&store), dispatcher.clone());
    let first = ObjectContext::new(Arc::clone(&store), dispatcher.clone());
    let second = ObjectContext::new(Arc::clone(&store), dispatcher.clone());
    updater.set(id, "title", "edited").unwrap();
    first.delete(id).unwrap();
    second.delete(id).unwrap();

    assert!(first.save().unwrap().is_some());
    assert_eq!(updater.save().unwrap(), None);
    assert_eq!(second.save().unwrap(), None);

    assert!(store.get(id).unwrap().is_none());
    assert_eq!(*log.lock().unwrap(), vec![(1, 0, 0)]);
    assert!(!updater.has_changes().unwrap());
    assert!(!second.has_changes().unwrap());
}

#[test]
fn observer_dropped_with_owner_stops_receiving() {
    struct Screen {
        _observer: entity_observer::ObserverToken<ObjectRef>,
    }

    let (dispatcher, _store, context) = setup();
    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    let screen = Screen {
        _observer: dispatcher.observe_inserts("Rec", move |_| *sink.lock().unwrap() += 1),
    };

    context.insert("Rec", [("n", 1)]).unwrap();
    context.save().unwrap();
    drop(screen);
    context.insert("Rec", [("n", 2)]).unwrap();
    context.save().unwrap();

    assert_eq!(*count.lock().unwrap(), 1);
}
