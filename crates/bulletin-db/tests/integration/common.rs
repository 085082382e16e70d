use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bulletin_core::AppError;
use bulletin_core::models::{CrawledPage, NewEntry};
use bulletin_core::traits::Crawler;
use bulletin_db::Database;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Spins up a PostgreSQL container, runs the workspace migrations and
/// returns a connected [`Database`].
///
/// The `ContainerAsync` must be kept in scope for the test duration;
/// dropping it stops the container.
pub async fn setup_test_db(page_size: u32) -> (Database, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "bulletin_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/bulletin_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    let db = Database::from_pool(pool, page_size);
    db.migrate().await.expect("Failed to run migrations");
    (db, container)
}

pub fn entry(url: &str) -> NewEntry {
    NewEntry::new(format!("Notice {url}"), url, "2024-03-01")
}

/// Crawler serving fixed listing pages.
#[derive(Clone, Default)]
pub struct StaticCrawler {
    pages: Arc<Mutex<HashMap<u32, CrawledPage>>>,
}

impl StaticCrawler {
    pub fn set_page(&self, page: u32, urls: &[&str], total_pages: u32) {
        let entries = urls.iter().map(|url| entry(url)).collect();
        self.pages
            .lock()
            .unwrap()
            .insert(page, CrawledPage::new(entries, total_pages));
    }
}

impl Crawler for StaticCrawler {
    async fn fetch_page(&self, page: u32) -> Result<CrawledPage, AppError> {
        self.pages
            .lock()
            .unwrap()
            .get(&page)
            .cloned()
            .ok_or_else(|| AppError::HttpError(format!("HTTP 404 for page {page}")))
    }
}
