pub mod anime_metadata;
pub mod animes;
pub mod library;
pub mod library_import_jobs;
pub mod library_sync_log;
pub mod oauth_tokens;
