//! Bounded worker pool for per-input script verification.
//!
//! The controller queues every check for one block, keeps doing other work,
//! then joins the pool; the first failure flips a shared flag that drains
//! the remaining queue without running it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Worker count: physical parallelism minus one for the controller thread.
pub fn default_worker_count() -> usize {
    thread::available_parallelism()
        .map(|count| count.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Run `check` over every item on `workers` threads. Returns the index of
/// the first observed failing item, or `None` when all pass. Order of
/// failure reporting between concurrent failures is unspecified.
pub fn run_checks<T, F>(items: &[T], workers: usize, check: F) -> Option<usize>
where
    T: Sync,
    F: Fn(&T) -> bool + Sync,
{
    if items.is_empty() {
        return None;
    }
    let workers = workers.max(1);
    let failed = AtomicBool::new(false);
    let failed_index = std::sync::Mutex::new(None::<usize>);
    let (sender, receiver) = crossbeam_channel::bounded::<usize>(items.len());

    thread::scope(|scope| {
        for _ in 0..workers {
            let receiver = receiver.clone();
            let failed = &failed;
            let failed_index = &failed_index;
            let check = &check;
            scope.spawn(move || {
                while let Ok(item_index) = receiver.recv() {
                    if failed.load(Ordering::Relaxed) {
                        continue;
                    }
                    if !check(&items[item_index]) {
                        failed.store(true, Ordering::Relaxed);
                        let mut slot = failed_index.lock().expect("check queue lock");
                        if slot.is_none() {
                            *slot = Some(item_index);
                        }
                    }
                }
            });
        }
        for item_index in 0..items.len() {
            if sender.send(item_index).is_err() {
                break;
            }
        }
        drop(sender);
    });

    failed_index.into_inner().expect("check queue lock")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn all_pass() {
        let items: Vec<u32> = (0..200).collect();
        let ran = AtomicUsize::new(0);
        let result = run_checks(&items, 4, |_| {
            ran.fetch_add(1, Ordering::Relaxed);
            true
        });
        assert_eq!(result, None);
        assert_eq!(ran.load(Ordering::Relaxed), 200);
    }

    #[test]
    fn failure_is_reported() {
        let items: Vec<u32> = (0..500).collect();
        let result = run_checks(&items, 4, |item| *item != 123);
        assert_eq!(result, Some(123));
    }

    #[test]
    fn empty_queue_passes() {
        let items: Vec<u32> = Vec::new();
        assert_eq!(run_checks(&items, 4, |_| false), None);
    }

    #[test]
    fn single_worker_works() {
        let items = vec![1u32, 2, 3];
        assert_eq!(run_checks(&items, 1, |item| *item < 3), Some(2));
    }
}
