use std::future::Future;

use log::{error, info};
use tokio::task::JoinSet;

use crate::error::JobError;

/// Runs `task` on every item concurrently and waits for all of them. Results
/// come back in item order.
///
/// The first failure ends the phase: it is logged and returned, and the
/// remaining tasks are left to finish on their own without being awaited.
pub async fn run_phase<I, O, F, Fut>(phase: &str, items: Vec<I>, task: F) -> Result<Vec<O>, JobError>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<O, JobError>> + Send + 'static,
{
    let total = items.len();
    let mut set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let fut = task(item);
        set.spawn(async move { (index, fut.await) });
    }

    let mut results: Vec<Option<O>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        let outcome = match joined {
            Ok((index, Ok(output))) => {
                results[index] = Some(output);
                continue;
            }
            Ok((_, Err(e))) => e,
            Err(e) => JobError::Task(e.to_string()),
        };
        error!("{} phase failed: {}", phase, outcome);
        set.detach_all();
        return Err(outcome);
    }

    info!("{} phase finished ({} tasks)", phase, total);
    results
        .into_iter()
        .map(|r| r.ok_or_else(|| JobError::Task(format!("{} phase lost a result", phase))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn results_keep_item_order() {
        let out = run_phase("square", vec![3u64, 1, 2], |n| async move {
            tokio::time::sleep(Duration::from_millis(n * 10)).await;
            Ok(n * n)
        })
        .await
        .unwrap();
        assert_eq!(out, vec![9, 1, 4]);
    }

    #[tokio::test]
    async fn first_failure_is_returned() {
        let err = run_phase("map", vec![0u64, 1, 2], |n| async move {
            if n == 1 {
                return Err(JobError::Task("boom".into()));
            }
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(n)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, JobError::Task(ref m) if m == "boom"));
    }

    #[tokio::test]
    async fn panicking_task_is_a_task_error() {
        let err = run_phase("reduce", vec![()], |_| async move {
            if true {
                panic!("worker task panicked");
            }
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, JobError::Task(_)));
    }

    #[tokio::test]
    async fn empty_phase_is_trivially_done() {
        let out: Vec<()> = run_phase("noop", Vec::<()>::new(), |_| async { Ok(()) })
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
