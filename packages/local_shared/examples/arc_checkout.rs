//! Checking shared ownership out of an `Arc` for single-threaded work.
//!
//! Worker threads receive an `Arc` and convert it into a `LocalShared` once. All further cloning
//! within the thread uses plain integer counts instead of atomic operations.

use std::sync::Arc;
use std::thread;

use local_shared::LocalShared;

fn process(items: &LocalShared<[u64]>) -> u64 {
    items.iter().sum()
}

fn main() {
    let data: Arc<[u64]> = (1..=100).collect();

    let workers = (0..4)
        .map(|worker| {
            let data = Arc::clone(&data);

            thread::spawn(move || {
                let local = LocalShared::<[u64]>::from(data);

                let handles = (0..10).map(|_| local.clone()).collect::<Vec<_>>();
                let total: u64 = handles.iter().map(process).sum();

                println!(
                    "Worker {worker}: {} local handles, total {total}",
                    local.local_use_count()
                );

                total
            })
        })
        .collect::<Vec<_>>();

    for worker in workers {
        let total = worker.join().expect("worker thread panicked");
        assert_eq!(total, 50_500);
    }

    println!("Strong references left on the shared data: {}", Arc::strong_count(&data));
}
