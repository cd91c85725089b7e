#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::time::Duration;

#[cfg(test)]
use tokio::sync::Mutex;

#[cfg(test)]
use crate::executor_pool::ExecutorPool;

#[tokio::test]
async fn empty_pool_yields_no_lanes() {
    let pool = ExecutorPool::start(0);
    assert_eq!(pool.worker_count(), 0);
    assert!(pool.lane().is_none());
}

#[tokio::test]
async fn jobs_on_one_lane_run_in_fifo_order() {
    let pool = ExecutorPool::start(2);
    let lane = pool.lane().unwrap();
    let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    for i in 0..16 {
        let order = order.clone();
        // earlier jobs sleep longer: only queue ordering can keep them FIFO
        let delay = Duration::from_millis((16 - i) as u64);
        assert!(lane.submit(Box::pin(async move {
            tokio::time::sleep(delay).await;
            order.lock().await.push(i);
        })));
    }

    pool.shutdown().await;
    let order = order.lock().await;
    assert_eq!(*order, (0..16).collect::<Vec<_>>());
}

#[tokio::test]
async fn lanes_are_assigned_round_robin_and_run_in_parallel() {
    let pool = ExecutorPool::start(2);
    let lane_a = pool.lane().unwrap();
    let lane_b = pool.lane().unwrap();

    let (tx_a, rx_a) = tokio::sync::oneshot::channel::<()>();
    let (tx_b, rx_b) = tokio::sync::oneshot::channel::<()>();

    // each job completes only once the other worker has started its own
    // job, which cannot happen if both lanes share a worker
    assert!(lane_a.submit(Box::pin(async move {
        let _ = tx_a.send(());
        let _ = rx_b.await;
    })));
    assert!(lane_b.submit(Box::pin(async move {
        let _ = rx_a.await;
        let _ = tx_b.send(());
    })));

    tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
        .await
        .expect("independent lanes must not serialize");
}

#[tokio::test]
async fn submit_fails_after_shutdown() {
    let pool = ExecutorPool::start(1);
    let lane = pool.lane().unwrap();
    pool.shutdown().await;
    assert!(!lane.submit(Box::pin(async {})));
    assert!(pool.lane().is_none());
}
