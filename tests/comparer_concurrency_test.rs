use layerscope::{Comparer, DiffType, FileInfo, FileTree, RangeKey};
use std::sync::{Arc, Barrier};
use std::thread;

fn wide_layers(count: usize) -> Vec<Arc<FileTree>> {
    (0..count)
        .map(|layer| {
            let mut tree = FileTree::new();
            for file in 0..200 {
                let path = format!("/usr/share/data/{}/file{}", file % 10, file);
                tree.insert(&path, FileInfo::regular((file + layer) as u64, layer as u64))
                    .unwrap();
            }
            tree.insert(&format!("/layer{}", layer), FileInfo::regular(1, 1))
                .unwrap();
            Arc::new(tree)
        })
        .collect()
}

#[test]
fn test_concurrent_first_access_computes_once() {
    let comparer = Comparer::new(wide_layers(4));
    let key = RangeKey::new(0, 2, 3, 3);
    let threads = 8;
    let barrier = Barrier::new(threads);

    let trees: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    comparer.get_tree(key).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(comparer.computations(), 1);
    for tree in &trees {
        assert!(Arc::ptr_eq(tree, &trees[0]));
    }
    assert_eq!(
        trees[0].get("/layer3").unwrap().diff_type(),
        DiffType::Added
    );
}

#[test]
fn test_concurrent_distinct_keys() {
    let layer_count = 5;
    let comparer = Comparer::new(wide_layers(layer_count));
    let mut keys = comparer.natural_keys();
    keys.extend(comparer.aggregated_keys());
    keys.push(RangeKey::new(1, 3, 4, 4));
    keys.push(RangeKey::new(4, 3, 0, 4));

    thread::scope(|scope| {
        for worker in 0..6 {
            let comparer = &comparer;
            let keys = &keys;
            scope.spawn(move || {
                // each worker walks the keys in a different order
                for offset in 0..keys.len() {
                    let key = keys[(offset + worker) % keys.len()];
                    comparer.get_tree(key).unwrap();
                }
            });
        }
    });

    let mut distinct = keys.clone();
    distinct.sort_by_key(|k| (k.bottom_start, k.bottom_stop, k.top_start, k.top_stop));
    distinct.dedup();
    assert_eq!(comparer.computations(), distinct.len());
    assert_eq!(comparer.cached_len(), distinct.len());
}

#[test]
fn test_bad_keys_from_many_threads_do_not_poison_cache() {
    let comparer = Comparer::new(wide_layers(2));

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                assert!(comparer.get_tree(RangeKey::new(0, 5, 1, 1)).is_err());
                assert!(comparer.get_tree(RangeKey::natural(1)).is_ok());
            });
        }
    });

    assert_eq!(comparer.computations(), 1);
}
