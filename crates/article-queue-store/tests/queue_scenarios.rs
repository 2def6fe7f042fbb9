use article_queue_core::{ArticlePayload, Job, RetryDecision, RetryPolicy};
use article_queue_store::{CoordinationStore, MemoryStore, ProcessingLedger, QueueAdmin, TaskQueue};
use std::sync::Arc;
use std::time::Duration;

fn article(id: i64) -> Job {
    Job::new(id, ArticlePayload::new(format!("title {}", id), "<p>body</p>", "http://example.com"))
}

#[tokio::test]
async fn priority_beats_fifo_regardless_of_arrival() {
    let store = Arc::new(MemoryStore::new());
    let queue = TaskQueue::new(store);

    queue.enqueue(article(100), 5).await.unwrap(); // A
    queue.enqueue(article(200), 0).await.unwrap(); // B
    queue.enqueue(article(300), 8).await.unwrap(); // C

    let mut order = Vec::new();
    while let Some(job) = queue.dequeue(Duration::ZERO).await.unwrap() {
        order.push(job.article_id);
    }
    assert_eq!(order, vec![300, 100, 200]);
}

#[tokio::test]
async fn article_never_in_queue_and_ledger_at_once() {
    let store = Arc::new(MemoryStore::new());
    let queue = TaskQueue::new(store.clone());
    let ledger = ProcessingLedger::new(store.clone());
    let policy = RetryPolicy::default();

    queue.enqueue(article(7), 0).await.unwrap();

    loop {
        let Some(job) = queue.dequeue(Duration::ZERO).await.unwrap() else {
            break;
        };
        ledger.record(&job, Some("w-1")).await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.pending(), 0);
        assert_eq!(counts.processing, 1);

        match policy.decide(&job) {
            RetryDecision::Requeue { .. } => ledger.requeue(&job.next_attempt()).await.unwrap(),
            RetryDecision::DeadLetter => ledger
                .dead_letter(&article_queue_core::DeadLetterRecord::new(job, "always fails", None))
                .await
                .unwrap(),
        }

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.processing, 0);
        assert!(counts.pending() + counts.dead_lettered == 1);
    }

    let stats = QueueAdmin::new(store).get_queue_stats().await.unwrap();
    assert_eq!(stats.pending(), 0);
    assert_eq!(stats.dead_lettered, 1);
}

#[tokio::test]
async fn concurrent_consumers_each_take_a_job_once() {
    let store = Arc::new(MemoryStore::new());
    let queue = TaskQueue::new(store);
    for id in 0..50 {
        queue.enqueue(article(id), (id % 3) as u32).await.unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut taken = Vec::new();
            while let Some(job) = queue.dequeue(Duration::ZERO).await.unwrap() {
                taken.push(job.article_id);
                tokio::task::yield_now().await;
            }
            taken
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    all.sort();
    assert_eq!(all, (0..50).collect::<Vec<i64>>());
}
