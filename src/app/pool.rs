use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

const MAX_CONCURRENCY: usize = 256;

pub fn sanitize_concurrency(value: usize) -> usize {
    value.clamp(1, MAX_CONCURRENCY)
}

pub async fn run_pool<T, R, F, Fut>(items: Vec<T>, concurrency: usize, worker: F) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    if items.is_empty() {
        return Vec::new();
    }

    let workers = sanitize_concurrency(concurrency).min(items.len());
    let (tx, rx) = mpsc::channel::<T>(workers);
    let rx = Arc::new(Mutex::new(rx));
    let worker = Arc::new(worker);

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let rx = rx.clone();
        let worker = worker.clone();
        set.spawn(async move {
            let mut out = Vec::new();
            loop {
                let next = rx.lock().await.recv().await;
                let Some(item) = next else {
                    break;
                };
                out.push(worker(item).await);
            }
            out
        });
    }

    for item in items {
        if tx.send(item).await.is_err() {
            tracing::error!("worker queue closed before all items were dispatched");
            break;
        }
    }
    drop(tx);

    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(mut out) => results.append(&mut out),
            Err(err) => tracing::error!("pool worker failed: {err}"),
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn concurrency_is_clamped() {
        assert_eq!(sanitize_concurrency(0), 1);
        assert_eq!(sanitize_concurrency(7), 7);
        assert_eq!(sanitize_concurrency(10_000), MAX_CONCURRENCY);
    }

    #[tokio::test]
    async fn every_item_is_processed_exactly_once() {
        let mut out = run_pool((0..50).collect::<Vec<u32>>(), 4, |n| async move { n * 2 }).await;
        out.sort_unstable();
        assert_eq!(out, (0..50).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn empty_input_spawns_nothing() {
        let out: Vec<u8> = run_pool(Vec::<u8>::new(), 8, |n| async move { n }).await;
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn in_flight_work_never_exceeds_pool_size() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (a, p) = (active.clone(), peak.clone());

        let out = run_pool((0..24).collect::<Vec<u32>>(), 3, move |n| {
            let active = a.clone();
            let peak = p.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                n
            }
        })
        .await;

        assert_eq!(out.len(), 24);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}
