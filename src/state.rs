use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cache::Cache;
use crate::clients::anilist::AnilistClient;
use crate::clients::build_shared_http_client;
use crate::clients::hianime::HianimeClient;
use crate::clients::jikan::JikanClient;
use crate::clients::myanimelist::MalClient;
use crate::clients::shikimori::ShikimoriClient;
use crate::config::Config;
use crate::db::Store;
use crate::scheduler::Jobs;
use crate::services::{
    AnimeService, BulkReprocessor, CatalogClients, CatalogService, DeltaScraper, ImportJobs,
    LibrarySync, MetadataRefresher, PlaylistProxy, RelationsResolver, Seeder, TokenRefresher,
};

/// Upstream clients sharing one connection pool.
#[derive(Clone)]
pub struct Upstreams {
    pub hianime: HianimeClient,
    pub mal: MalClient,
    pub anilist: AnilistClient,
    pub jikan: JikanClient,
    pub shikimori: ShikimoriClient,
}

impl Upstreams {
    pub fn new(config: &Config, cache: &Cache) -> anyhow::Result<Self> {
        let http = build_shared_http_client()?;
        Ok(Self {
            hianime: HianimeClient::new(http.clone()),
            mal: MalClient::new(
                http.clone(),
                &config.providers.myanimelist_client_id,
                &config.providers.myanimelist_client_secret,
            ),
            anilist: AnilistClient::new(http.clone()),
            jikan: JikanClient::new(http.clone()),
            shikimori: ShikimoriClient::new(http, cache.clone()),
        })
    }
}

/// Everything the daemon, the command line and the HTTP layer share.
#[derive(Clone)]
pub struct SharedState {
    pub config: Config,

    pub store: Store,

    pub cache: Cache,

    pub upstreams: Upstreams,

    pub refresher: MetadataRefresher,

    pub anime_service: Arc<dyn AnimeService>,

    pub library_sync: LibrarySync,

    pub import_jobs: ImportJobs,

    pub bulk: BulkReprocessor,

    pub proxy: PlaylistProxy,

    pub shutdown: CancellationToken,
}

impl SharedState {
    /// Connects to the database and the cache, then wires the services.
    pub async fn new(config: Config, shutdown: CancellationToken) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await?;
        let cache = Cache::connect(&config.cache).await?;
        let upstreams = Upstreams::new(&config, &cache)?;
        Self::from_parts(config, store, cache, upstreams, shutdown)
    }

    /// Wires the services over already built dependencies.
    pub fn from_parts(
        config: Config,
        store: Store,
        cache: Cache,
        upstreams: Upstreams,
        shutdown: CancellationToken,
    ) -> anyhow::Result<Self> {
        let refresher = MetadataRefresher::spawn(
            store.clone(),
            upstreams.mal.clone(),
            &config.workers,
            &shutdown,
        );
        let relations = RelationsResolver::new(
            store.clone(),
            cache.clone(),
            upstreams.shikimori.clone(),
            refresher.clone(),
        );
        let anime_service: Arc<dyn AnimeService> = Arc::new(CatalogService::new(
            store.clone(),
            cache.clone(),
            CatalogClients {
                hianime: upstreams.hianime.clone(),
                mal: upstreams.mal.clone(),
                anilist: upstreams.anilist.clone(),
                jikan: upstreams.jikan.clone(),
            },
            relations,
            refresher.clone(),
        ));

        let library_sync = LibrarySync::new(
            store.clone(),
            upstreams.mal.clone(),
            upstreams.anilist.clone(),
            config.workers.library_retry_concurrency,
        );
        let import_jobs = ImportJobs::new(
            store.clone(),
            upstreams.mal.clone(),
            upstreams.anilist.clone(),
        );
        let bulk = BulkReprocessor::new(
            store.clone(),
            upstreams.hianime.clone(),
            &config.workers,
            shutdown.clone(),
        );
        let proxy = PlaylistProxy::new(Duration::from_secs(
            config.proxy.upstream_timeout_seconds.max(1),
        ))?;

        Ok(Self {
            config,
            store,
            cache,
            upstreams,
            refresher,
            anime_service,
            library_sync,
            import_jobs,
            bulk,
            proxy,
            shutdown,
        })
    }

    #[must_use]
    pub fn seeder(&self) -> Seeder {
        Seeder::new(
            self.store.clone(),
            self.upstreams.hianime.clone(),
            self.config.workers.scrape_concurrency,
        )
    }

    #[must_use]
    pub fn delta_scraper(&self) -> DeltaScraper {
        DeltaScraper::new(
            self.store.clone(),
            self.upstreams.hianime.clone(),
            self.cache.clone(),
            self.config.workers.scrape_concurrency,
        )
    }

    #[must_use]
    pub fn token_refresher(&self) -> TokenRefresher {
        TokenRefresher::new(self.store.clone(), self.upstreams.mal.clone())
    }

    #[must_use]
    pub fn jobs(&self) -> Jobs {
        Jobs {
            delta: self.delta_scraper(),
            tokens: self.token_refresher(),
            library: self.library_sync.clone(),
        }
    }
}
