use bulletin_core::scheduler::TracingSchedulerReporter;
use bulletin_core::{BulkLoader, SyncCycle};

use crate::common::{StaticCrawler, setup_test_db};

#[tokio::test]
async fn bulk_load_then_incremental_sync() {
    let (db, _container) = setup_test_db(20).await;
    let repo = db.entry_repo();

    let crawler = StaticCrawler::default();
    crawler.set_page(1, &["/n/4", "/n/3"], 2);
    crawler.set_page(2, &["/n/2", "/n/1"], 2);

    let bulk = BulkLoader::new(crawler.clone(), repo.clone())
        .run(&TracingSchedulerReporter)
        .await;
    assert_eq!(bulk.created, 4);
    assert_eq!(bulk.pages_failed, 0);

    let cycle = SyncCycle::new(crawler.clone(), repo.clone());
    let unchanged = cycle.execute().await.unwrap();
    assert_eq!(unchanged.created, 0);
    assert_eq!(unchanged.skipped, 2);

    crawler.set_page(1, &["/n/5", "/n/4"], 2);
    let next = cycle.execute().await.unwrap();
    assert_eq!(next.created, 1);
    assert_eq!(repo.count().await.unwrap(), 5);
}

#[tokio::test]
async fn bulk_load_rerun_counts_duplicates() {
    let (db, _container) = setup_test_db(20).await;
    let repo = db.entry_repo();

    let crawler = StaticCrawler::default();
    crawler.set_page(1, &["/n/2", "/n/1"], 1);

    let loader = BulkLoader::new(crawler, repo.clone());
    loader.run(&TracingSchedulerReporter).await;
    let rerun = loader.run(&TracingSchedulerReporter).await;

    assert_eq!(rerun.created, 0);
    assert_eq!(rerun.duplicates, 2);
    assert_eq!(rerun.failed, 0);
    assert_eq!(repo.count().await.unwrap(), 2);
}
