pub mod admin_key;
pub use admin_key::AdminKey;

pub mod anime_service;
pub use anime_service::AnimeService;

pub mod anime_service_impl;
pub use anime_service_impl::{CatalogClients, CatalogService};

pub mod bulk_reprocess;
pub use bulk_reprocess::BulkReprocessor;

pub mod import_jobs;
pub use import_jobs::ImportJobs;

pub mod library_sync;
pub use library_sync::LibrarySync;

pub mod metadata_refresher;
pub use metadata_refresher::MetadataRefresher;

pub mod proxy;
pub use proxy::PlaylistProxy;

pub mod rate_limiter;

pub mod relations;
pub use relations::RelationsResolver;

pub mod retry;

pub mod scraper;
pub use scraper::{DeltaScraper, Seeder};

pub mod token_refresher;
pub use token_refresher::TokenRefresher;
