use memorito_core::{
    free, wrap, BackendKind, DefaultCacheableKey, InvalidBackendUsage, MemoConfig, MemoError,
    Memoized,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct Document {
    body: String,
}

impl DefaultCacheableKey for Document {}

fn document(body: &str) -> Arc<Document> {
    Arc::new(Document {
        body: body.to_string(),
    })
}

#[test]
fn test_weak_entries_follow_key_identity() {
    let calls = AtomicUsize::new(0);
    let word_count = wrap(
        |_: &(), (doc,): (Arc<Document>,)| {
            calls.fetch_add(1, Ordering::SeqCst);
            doc.body.split_whitespace().count()
        },
        MemoConfig::default().with_backend(BackendKind::weak()),
    )
    .unwrap();

    let doc = document("the quick brown fox");
    assert_eq!(word_count.call(&(), (Arc::clone(&doc),)).unwrap(), 4);
    assert_eq!(word_count.call(&(), (Arc::clone(&doc),)).unwrap(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Equal content, different object: a miss.
    let twin = document("the quick brown fox");
    assert_eq!(word_count.call(&(), (Arc::clone(&twin),)).unwrap(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let cache = word_count.weak_cache().unwrap();
    assert!(cache.has(&doc));
    assert!(cache.has(&twin));
}

#[test]
fn test_weak_cache_does_not_retain_keys() {
    let summarize = wrap(
        free(|(doc,): (Arc<Document>,)| Arc::new(doc.body.to_uppercase())),
        MemoConfig::default().with_backend(BackendKind::weak()),
    )
    .unwrap();

    let doc = document("draft");
    let first = summarize.call(&(), (Arc::clone(&doc),)).unwrap();
    let second = summarize.call(&(), (Arc::clone(&doc),)).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(Arc::strong_count(&doc), 1);

    let value = Arc::downgrade(&first);
    drop(first);
    drop(second);
    assert!(value.upgrade().is_some());

    drop(doc);
    summarize.weak_cache().unwrap().reclaim();
    assert!(value.upgrade().is_none());
}

#[test]
fn test_weak_key_at_later_position() {
    let calls = AtomicUsize::new(0);
    let render = wrap(
        |_: &(), (width, doc): (usize, Arc<Document>)| {
            calls.fetch_add(1, Ordering::SeqCst);
            doc.body.chars().take(width).collect::<String>()
        },
        MemoConfig::default().with_backend(BackendKind::Weak { key_arg: 1 }),
    )
    .unwrap();

    let doc = document("abcdef");
    assert_eq!(render.call(&(), (3, Arc::clone(&doc))).unwrap(), "abc");
    // Only the key object selects the entry.
    assert_eq!(render.call(&(), (5, Arc::clone(&doc))).unwrap(), "abc");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_weak_backend_rejections_at_wrap_time() {
    let primitive = wrap(
        free(|(id,): (u64,)| id),
        MemoConfig::default().with_backend(BackendKind::weak()),
    );
    assert!(matches!(
        primitive,
        Err(MemoError::InvalidBackendUsage(InvalidBackendUsage::PrimitiveKey {
            position: 0,
            type_name: "u64"
        }))
    ));

    let out_of_range = wrap(
        free(|(doc,): (Arc<Document>,)| doc.body.len()),
        MemoConfig::default().with_backend(BackendKind::Weak { key_arg: 2 }),
    );
    assert!(matches!(
        out_of_range,
        Err(MemoError::InvalidBackendUsage(
            InvalidBackendUsage::KeyArgOutOfRange {
                position: 2,
                arity: 1
            }
        ))
    ));

    let custom_key = Memoized::builder(free(|(doc,): (Arc<Document>,)| doc.body.len()))
        .key_fn(|args: &(Arc<Document>,)| Ok(args.0.body.clone()))
        .backend(BackendKind::weak())
        .build();
    assert!(matches!(
        custom_key,
        Err(MemoError::InvalidBackendUsage(InvalidBackendUsage::NoKeyObjects))
    ));

    let tagged = wrap(
        free(|(doc,): (Arc<Document>,)| doc.body.len()),
        MemoConfig::default()
            .with_backend(BackendKind::weak())
            .with_tags(["documents"]),
    );
    assert!(matches!(
        tagged,
        Err(MemoError::InvalidBackendUsage(InvalidBackendUsage::NotClearable))
    ));
}

#[test]
fn test_variadic_weak_calls_checked_per_call() {
    let calls = AtomicUsize::new(0);
    let total = wrap(
        |_: &(), docs: Vec<Arc<Document>>| {
            calls.fetch_add(1, Ordering::SeqCst);
            docs.iter().map(|d| d.body.len()).sum::<usize>()
        },
        MemoConfig::default().with_backend(BackendKind::weak()),
    )
    .unwrap();

    let doc = document("four");
    assert_eq!(total.call(&(), vec![Arc::clone(&doc)]).unwrap(), 4);
    assert_eq!(total.call(&(), vec![Arc::clone(&doc)]).unwrap(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let err = total.call(&(), Vec::new()).unwrap_err();
    assert_eq!(
        err,
        MemoError::InvalidBackendUsage(InvalidBackendUsage::KeyArgOutOfRange {
            position: 0,
            arity: 0
        })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_weak_coalescing_by_identity() {
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    let calls = Arc::new(AtomicUsize::new(0));
    let index = Arc::new(
        wrap(
            free({
                let calls = Arc::clone(&calls);
                move |(doc,): (Arc<Document>,)| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(100));
                    doc.body.len()
                }
            }),
            MemoConfig::default()
                .with_backend(BackendKind::weak())
                .with_coalescing(true),
        )
        .unwrap(),
    );

    let doc = document("shared document");
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            let doc = Arc::clone(&doc);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                index.call(&(), (doc,)).unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 15);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_weak_keys_of_foreign_types() {
    let calls = AtomicUsize::new(0);
    let checksum = wrap(
        |_: &(), (buffer, weights): (Arc<Mutex<Vec<u8>>>, Arc<HashMap<u8, u32>>)| {
            calls.fetch_add(1, Ordering::SeqCst);
            let bytes = buffer.lock().unwrap();
            let total: u32 = bytes
                .iter()
                .map(|b| weights.get(b).copied().unwrap_or(1))
                .sum();
            total
        },
        MemoConfig::default().with_backend(BackendKind::weak()),
    )
    .unwrap();

    let buffer = Arc::new(Mutex::new(vec![1u8, 2, 3]));
    let weights = Arc::new(HashMap::from([(2u8, 10u32)]));

    assert_eq!(checksum.call(&(), (Arc::clone(&buffer), Arc::clone(&weights))).unwrap(), 12);
    // Only the identity of the buffer is the key, not its contents.
    buffer.lock().unwrap().push(9);
    assert_eq!(checksum.call(&(), (Arc::clone(&buffer), Arc::clone(&weights))).unwrap(), 12);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(Arc::strong_count(&buffer), 1);

    let other = Arc::new(Mutex::new(vec![1u8, 2, 3]));
    assert_eq!(checksum.call(&(), (other, weights)).unwrap(), 12);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
