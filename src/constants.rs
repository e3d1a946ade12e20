pub const PROXY_EXTENSIONS: &[&str] = &[
    ".m3u8", ".ts", ".png", ".jpg", ".webp", ".ico", ".html", ".js", ".css", ".txt",
];

pub mod cache {
    use std::time::Duration;

    const DAY: u64 = 24 * 60 * 60;

    pub const EPISODES_TTL: Duration = Duration::from_secs(7 * DAY);

    pub const EPISODE_SERVERS_TTL: Duration = Duration::from_secs(DAY);

    pub const STREAM_TTL: Duration = Duration::from_secs(DAY);

    pub const RELATIONS_TTL: Duration = Duration::from_secs(7 * DAY);

    pub const FRANCHISE_TTL: Duration = Duration::from_secs(7 * DAY);

    pub const BANNER_TTL: Duration = Duration::from_secs(30 * DAY);

    pub const GENRES_TTL: Duration = Duration::from_secs(30 * DAY);

    pub const SEASONAL_TTL: Duration = Duration::from_secs(30 * DAY);

    pub const TRENDING_TTL: Duration = Duration::from_secs(DAY);

    pub const CHARACTERS_TTL: Duration = Duration::from_secs(7 * DAY);

    #[must_use]
    pub fn anime_episodes_key(anime_id: &str) -> String {
        format!("anime_episodes:{anime_id}")
    }
}

pub mod http {
    use std::time::Duration;

    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

    pub const POOL_MAX_IDLE_PER_HOST: usize = 20;

    pub const USER_AGENT: &str = concat!("aniways/", env!("CARGO_PKG_VERSION"));
}

pub mod retry {
    use std::time::Duration;

    pub const DETAIL_ATTEMPTS: u32 = 3;

    pub const DETAIL_DELAY: Duration = Duration::from_millis(500);
}

pub mod scrape {
    use std::time::Duration;

    pub const PAGE_DELAY: Duration = Duration::from_secs(1);

    /// Spacing between `updated_at` stamps of consecutive items.
    pub const UPDATE_STRIDE: Duration = Duration::from_millis(20);
}

pub mod limits {

    pub const MAX_PAGE_SIZE: u64 = 100;

    pub const MAX_BULK_IDS: usize = 10_000;

    pub const IMPORT_PAGE_SIZE: u32 = 100;

    pub const LIBRARY_SYNC_TIMEOUT_SECS: u64 = 15;

    pub const METADATA_FETCH_TIMEOUT_SECS: u64 = 10;
}
