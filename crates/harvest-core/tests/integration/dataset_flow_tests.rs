use harvest_core::{
    DEFAULT_ITEMS_KEY, FieldCoverage, RunOutcome, WorkItem, load_dataset, load_work_items,
    write_dataset, write_work_items,
};

use super::common::{CatalogFetcher, CountingSleeper, engine, run};

#[tokio::test]
async fn input_document_to_dataset_and_retry_list() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("book_ids.json");
    std::fs::write(
        &input,
        r#"{"book_ids": [101, 102, "103", 104, 105], "total": 5}"#,
    )
    .unwrap();

    let list = load_work_items(&input, DEFAULT_ITEMS_KEY, None)
        .await
        .unwrap();
    let first = engine(
        CatalogFetcher::with_gone(&[102, 105]),
        &dir.path().join("checkpoint.json"),
        CountingSleeper::default(),
    );
    let RunOutcome::Completed(dataset) = run(&first, &list).await.unwrap().outcome else {
        panic!("run cancelled");
    };

    let output = dir.path().join("out/books_complete.json");
    write_dataset(&output, &dataset).await.unwrap();
    let loaded = load_dataset(&output).await.unwrap();

    assert_eq!(loaded.total, 3);
    assert_eq!(loaded.failed_count, 2);
    assert_eq!(
        loaded.failed_identifiers,
        vec![WorkItem::Number(102), WorkItem::Number(105)]
    );
    assert_eq!(loaded.records[1].source_identifier, WorkItem::from("103"));
    assert_eq!(loaded.records[1].field("title"), Some("Book 103"));

    let coverage = FieldCoverage::from_records(&loaded.records);
    assert_eq!(coverage.rate("title"), 100.0);

    // Failed identifiers become the input of a retry pass.
    let retry = dir.path().join("failed_ids.json");
    write_work_items(&retry, DEFAULT_ITEMS_KEY, &loaded.failed_identifiers)
        .await
        .unwrap();
    let retry_list = load_work_items(&retry, DEFAULT_ITEMS_KEY, None)
        .await
        .unwrap();
    assert_eq!(retry_list, loaded.failed_identifiers);

    let retry_engine = engine(
        CatalogFetcher::default(),
        &dir.path().join("retry_checkpoint.json"),
        CountingSleeper::default(),
    );
    let RunOutcome::Completed(second) = run(&retry_engine, &retry_list).await.unwrap().outcome
    else {
        panic!("retry run cancelled");
    };
    assert_eq!(second.total, 2);
    assert!(second.failed_identifiers.is_empty());
}

#[tokio::test]
async fn trial_limit_only_processes_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("book_ids.json");
    std::fs::write(&input, r#"{"book_ids": [1, 2, 3, 4, 5, 6]}"#).unwrap();

    let list = load_work_items(&input, DEFAULT_ITEMS_KEY, Some(2))
        .await
        .unwrap();
    let fetcher = CatalogFetcher::default();
    let engine = engine(
        fetcher.clone(),
        &dir.path().join("checkpoint.json"),
        CountingSleeper::default(),
    );
    run(&engine, &list).await.unwrap();

    assert_eq!(fetcher.total_requests(), 2);
}
