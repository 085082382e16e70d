use bulletin_core::AppError;
use bulletin_core::traits::EntryStore;

use crate::common::{entry, setup_test_db};

#[tokio::test]
async fn create_then_exists() {
    let (db, _container) = setup_test_db(20).await;
    let repo = db.entry_repo();

    assert!(!repo.exists("https://board.example/n/1").await.unwrap());

    let id = repo.create(&entry("https://board.example/n/1")).await.unwrap();
    assert!(!id.is_nil());
    assert!(repo.exists("https://board.example/n/1").await.unwrap());
    assert!(!repo.exists("https://board.example/n/2").await.unwrap());
}

#[tokio::test]
async fn duplicate_url_is_rejected() {
    let (db, _container) = setup_test_db(20).await;
    let repo = db.entry_repo();

    repo.create(&entry("https://board.example/n/1")).await.unwrap();
    let err = repo
        .create(&entry("https://board.example/n/1"))
        .await
        .unwrap_err();

    assert!(matches!(&err, AppError::DuplicateEntry(url) if url == "https://board.example/n/1"));
    assert!(err.is_duplicate());
    assert_eq!(repo.count().await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_creates_of_one_url_store_one_row() {
    let (db, _container) = setup_test_db(20).await;
    let repo = db.entry_repo();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let repo = repo.clone();
        handles.push(tokio::spawn(async move {
            repo.create(&entry("https://board.example/race")).await
        }));
    }

    let mut created = 0;
    let mut duplicates = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(AppError::DuplicateEntry(_)) => duplicates += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(duplicates, 7);
    assert_eq!(repo.count().await.unwrap(), 1);
}

#[tokio::test]
async fn read_page_is_newest_first_and_paginated() {
    let (db, _container) = setup_test_db(2).await;
    let repo = db.entry_repo();

    for n in 1..=5 {
        repo.create(&entry(&format!("https://board.example/n/{n}")))
            .await
            .unwrap();
        // Distinct created_at values
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let urls = |entries: Vec<bulletin_core::Entry>| -> Vec<String> {
        entries.into_iter().map(|e| e.url).collect()
    };

    let first = repo.read_page(1).await.unwrap();
    assert_eq!(
        urls(first),
        vec!["https://board.example/n/5", "https://board.example/n/4"]
    );

    let third = repo.read_page(3).await.unwrap();
    assert_eq!(urls(third), vec!["https://board.example/n/1"]);

    assert!(repo.read_page(4).await.unwrap().is_empty());
}

#[tokio::test]
async fn read_page_zero_reads_first_page() {
    let (db, _container) = setup_test_db(20).await;
    let repo = db.entry_repo();
    repo.create(&entry("https://board.example/n/1")).await.unwrap();

    let page_zero = EntryStore::read_page(&repo, 0).await.unwrap();
    let page_one = EntryStore::read_page(&repo, 1).await.unwrap();

    assert_eq!(page_zero, page_one);
    assert_eq!(page_zero[0].title, "Notice https://board.example/n/1");
    assert_eq!(page_zero[0].published_at, "2024-03-01");
}

#[tokio::test]
async fn health_check_succeeds() {
    let (db, _container) = setup_test_db(20).await;
    db.health_check().await.unwrap();
    // Migrations are idempotent
    db.migrate().await.unwrap();
}
