pub mod anime;
pub mod anime_metadata;
pub mod import_jobs;
pub mod library;
pub mod oauth_tokens;
pub mod sync_log;
