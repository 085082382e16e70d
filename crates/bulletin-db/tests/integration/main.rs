mod common;
mod entry_tests;
mod sync_tests;
