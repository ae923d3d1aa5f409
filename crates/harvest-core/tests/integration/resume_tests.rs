use harvest_core::{
    AppError, CheckpointStore, FileCheckpointStore, FinalDataset, RunOutcome,
    TracingEngineReporter, WorkItem,
};
use tokio_util::sync::CancellationToken;

use super::common::{CatalogFetcher, CountingSleeper, engine, items, run};

fn record_ids(dataset: &FinalDataset) -> Vec<WorkItem> {
    dataset
        .records
        .iter()
        .map(|r| r.source_identifier.clone())
        .collect()
}

#[tokio::test]
async fn interrupted_run_resumes_to_same_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let list = items(1..=10);

    // Reference: one uninterrupted run.
    let reference = {
        let engine = engine(
            CatalogFetcher::with_gone(&[4, 9]),
            &dir.path().join("reference.json"),
            CountingSleeper::default(),
        );
        match run(&engine, &list).await.unwrap().outcome {
            RunOutcome::Completed(dataset) => dataset,
            RunOutcome::Cancelled(_) => panic!("reference run cancelled"),
        }
    };

    // Stop after the sixth item, then resume with a fresh engine.
    let checkpoint = dir.path().join("checkpoint.json");
    let cancel = CancellationToken::new();
    let first = engine(
        CatalogFetcher::with_gone(&[4, 9]),
        &checkpoint,
        CountingSleeper::stopping_at(6, cancel.clone()),
    );
    let state = first.load_state().await.unwrap();
    let report = first
        .run(&list, state, &cancel, &TracingEngineReporter::default())
        .await
        .unwrap();
    assert!(matches!(report.outcome, RunOutcome::Cancelled(ref s) if s.next_index == 6));

    let fetcher = CatalogFetcher::with_gone(&[4, 9]);
    let second = engine(fetcher.clone(), &checkpoint, CountingSleeper::default());
    let resumed = match run(&second, &list).await.unwrap().outcome {
        RunOutcome::Completed(dataset) => dataset,
        RunOutcome::Cancelled(_) => panic!("resumed run cancelled"),
    };

    assert_eq!(fetcher.total_requests(), 4);
    assert_eq!(record_ids(&resumed), record_ids(&reference));
    assert_eq!(resumed.failed_identifiers, reference.failed_identifiers);
    assert_eq!(resumed.total, 8);
    assert_eq!(resumed.failed_count, 2);
}

#[tokio::test]
async fn completed_checkpoint_covers_whole_list() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("checkpoint.json");
    let engine = engine(
        CatalogFetcher::default(),
        &checkpoint,
        CountingSleeper::default(),
    );

    run(&engine, &items(1..=7)).await.unwrap();

    let summary = FileCheckpointStore::new(&checkpoint)
        .summary()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.next_index, 7);
    assert_eq!(summary.records, 7);
    assert_eq!(summary.failed, 0);
}

#[tokio::test]
async fn rerun_after_completion_fetches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("checkpoint.json");
    let list = items(1..=4);

    let first = engine(
        CatalogFetcher::default(),
        &checkpoint,
        CountingSleeper::default(),
    );
    run(&first, &list).await.unwrap();

    let fetcher = CatalogFetcher::default();
    let again = engine(fetcher.clone(), &checkpoint, CountingSleeper::default());
    let report = run(&again, &list).await.unwrap();

    assert_eq!(fetcher.total_requests(), 0);
    assert!(matches!(report.outcome, RunOutcome::Completed(ref d) if d.total == 4));
}

#[tokio::test]
async fn appended_identifiers_are_picked_up_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("checkpoint.json");

    let first = engine(
        CatalogFetcher::default(),
        &checkpoint,
        CountingSleeper::default(),
    );
    run(&first, &items(1..=3)).await.unwrap();

    let fetcher = CatalogFetcher::default();
    let second = engine(fetcher.clone(), &checkpoint, CountingSleeper::default());
    let report = run(&second, &items(1..=5)).await.unwrap();

    assert_eq!(fetcher.total_requests(), 2);
    assert_eq!(fetcher.max_requests_per_url(), 1);
    assert!(matches!(report.outcome, RunOutcome::Completed(ref d) if d.total == 5));
}

#[tokio::test]
async fn reordered_list_is_refused_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("checkpoint.json");

    let first = engine(
        CatalogFetcher::default(),
        &checkpoint,
        CountingSleeper::default(),
    );
    run(&first, &items(1..=3)).await.unwrap();

    let reordered: Vec<WorkItem> = [3, 2, 1, 4].into_iter().map(WorkItem::Number).collect();
    let second = engine(
        CatalogFetcher::default(),
        &checkpoint,
        CountingSleeper::default(),
    );
    let err = run(&second, &reordered).await.unwrap_err();
    assert!(matches!(err, AppError::CheckpointMismatch(_)));

    // The refused run must not touch the checkpoint.
    let state = FileCheckpointStore::new(&checkpoint).load().await.unwrap().unwrap();
    assert_eq!(state.next_index, 3);
}
