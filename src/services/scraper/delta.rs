use chrono::{DateTime, Utc};
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{Outcome, ScrapeCounts, fetch_detail, stamp};
use crate::cache::Cache;
use crate::clients::hianime::{HianimeClient, ScrapedAnime};
use crate::constants::cache::anime_episodes_key;
use crate::context::Context;
use crate::db::Store;
use crate::error::CoreResult;

/// What one delta pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaReport {
    pub counts: ScrapeCounts,
    /// Episode cache keys dropped for updated rows.
    pub invalidated: Vec<String>,
}

/// Hourly pass over the first recently-updated page.
pub struct DeltaScraper {
    store: Store,
    hianime: HianimeClient,
    cache: Cache,
    concurrency: usize,
}

impl DeltaScraper {
    #[must_use]
    pub fn new(store: Store, hianime: HianimeClient, cache: Cache, concurrency: usize) -> Self {
        Self {
            store,
            hianime,
            cache,
            concurrency: concurrency.max(1),
        }
    }

    /// Writes every item whose row is missing or whose last episode moved.
    /// Per-item failures are counted, never returned.
    pub async fn run(&self, ctx: &Context) -> CoreResult<DeltaReport> {
        let listing = ctx.run(self.hianime.recently_updated(1)).await?;
        let len = listing.items.len();
        let now = Utc::now();

        let outcomes: Vec<(Outcome, Option<String>)> =
            futures::stream::iter(listing.items.into_iter().enumerate())
                .map(|(i, item)| async move {
                    if ctx.is_cancelled() {
                        return (Outcome::Skipped, None);
                    }
                    // The first item is the most recent, so it gets the latest stamp.
                    self.process(ctx, item, stamp(now, len - 1 - i)).await
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let mut report = DeltaReport {
            counts: ScrapeCounts {
                items: len,
                ..ScrapeCounts::default()
            },
            invalidated: Vec::new(),
        };
        for (outcome, key) in outcomes {
            report.counts.record(outcome);
            report.invalidated.extend(key);
        }

        let counts = report.counts;
        info!(
            items = counts.items,
            success = counts.success,
            skipped = counts.skipped,
            failed = counts.failed,
            invalidated = report.invalidated.len(),
            "Recently-updated page processed"
        );
        Ok(report)
    }

    /// Returns the outcome and, for an updated row, its dropped episode cache key.
    async fn process(
        &self,
        ctx: &Context,
        item: ScrapedAnime,
        at: DateTime<Utc>,
    ) -> (Outcome, Option<String>) {
        let hi_anime_id = item.hi_anime_id.clone();

        let current = match self.store.get_anime_by_hi_anime_id(&hi_anime_id).await {
            Ok(row) => row,
            Err(e) => {
                warn!(%hi_anime_id, error = %e, "Catalog lookup failed");
                return (Outcome::Failed, None);
            }
        };

        if current
            .as_ref()
            .is_some_and(|row| row.last_episode == item.last_episode)
        {
            return (Outcome::Skipped, None);
        }

        let mut detail = match fetch_detail(ctx, &self.hianime, &hi_anime_id).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!(%hi_anime_id, error = %e, "Detail fetch failed");
                return (Outcome::Failed, None);
            }
        };

        if detail.mal_id <= 0 && detail.anilist_id > 0 {
            detail.mal_id = self.sibling_mal_id(&hi_anime_id, detail.anilist_id).await;
        }

        let mut invalidated = None;
        let res = match current {
            Some(row) => {
                // Titles stay as stored; poster and episode count follow the listing.
                let update = ScrapedAnime {
                    hi_anime_id: hi_anime_id.clone(),
                    ename: row.ename.clone(),
                    jname: row.jname.clone(),
                    poster_url: item.poster_url,
                    last_episode: item.last_episode,
                    ..detail
                };
                match self.store.update_anime(&row.id, &update, at).await {
                    Ok(_) => {
                        let key = anime_episodes_key(&row.id);
                        match self.cache.del(&key).await {
                            Ok(()) => invalidated = Some(key),
                            Err(e) => {
                                warn!(%hi_anime_id, error = %e, "Episode cache invalidation failed");
                            }
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            None => {
                let insert = ScrapedAnime {
                    hi_anime_id: hi_anime_id.clone(),
                    last_episode: item.last_episode,
                    ..detail
                };
                self.store.insert_anime(&insert, at).await.map(drop)
            }
        };

        match res {
            Ok(()) => (Outcome::Written, invalidated),
            Err(e) => {
                warn!(%hi_anime_id, error = %e, "Catalog write failed");
                (Outcome::Failed, None)
            }
        }
    }

    /// First known MAL id among rows sharing `anilist_id`, or 0.
    async fn sibling_mal_id(&self, hi_anime_id: &str, anilist_id: i32) -> i32 {
        let siblings = match self.store.get_animes_by_anilist_id(anilist_id).await {
            Ok(rows) => rows,
            Err(e) => {
                debug!(hi_anime_id, anilist_id, error = %e, "Sibling lookup failed");
                return 0;
            }
        };
        siblings
            .iter()
            .find_map(|row| row.known_mal_id().map(|id| (id, &row.hi_anime_id)))
            .map_or(0, |(mal_id, from)| {
                info!(hi_anime_id, mal_id, anilist_id, from_hi_anime_id = %from, "Copied MAL id from sibling");
                mal_id
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::build_shared_http_client;
    use crate::services::scraper::fixtures;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(server: &MockServer) -> (DeltaScraper, Store) {
        let store = Store::with_pool_options("sqlite::memory:", 1, 1)
            .await
            .unwrap();
        let uri = server.uri();
        let hianime = HianimeClient::with_base_urls(
            build_shared_http_client().unwrap(),
            &uri,
            &format!("{uri}/megaplay"),
            &format!("{uri}/keys.json"),
        );
        let delta = DeltaScraper::new(store.clone(), hianime, Cache::disabled(), 4);
        (delta, store)
    }

    fn scraped(id: &str, last: i32) -> ScrapedAnime {
        ScrapedAnime {
            hi_anime_id: id.to_string(),
            ename: "Stored".to_string(),
            jname: "Stored".to_string(),
            poster_url: "https://x/old.jpg".to_string(),
            genre: "Action".to_string(),
            last_episode: last,
            season: "fall".to_string(),
            season_year: 2002,
            ..ScrapedAnime::default()
        }
    }

    #[tokio::test]
    async fn changed_rows_are_updated_and_unchanged_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recently-updated"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixtures::listing(&[
                ("naruto-677", "Naruto", 221),
                ("bleach-806", "Bleach", 366),
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/naruto-677"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(fixtures::info("Naruto", 20, 20, 221)),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bleach-806"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (delta, store) = setup(&server).await;
        let at = Utc::now();
        store.insert_anime(&scraped("naruto-677", 220), at).await.unwrap();
        let bleach = store.insert_anime(&scraped("bleach-806", 366), at).await.unwrap();

        let report = delta.run(&Context::background()).await.unwrap();
        assert_eq!(
            report.counts,
            ScrapeCounts {
                items: 2,
                success: 1,
                skipped: 1,
                failed: 0
            }
        );

        let naruto = store
            .get_anime_by_hi_anime_id("naruto-677")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(naruto.last_episode, 221);
        assert_eq!(naruto.image_url, "https://x/naruto-677.jpg");
        assert_eq!(naruto.ename, "Stored");
        assert_eq!(naruto.mal_id, Some(20));
        // Only the updated row loses its cached episode list.
        assert_eq!(report.invalidated, vec![anime_episodes_key(&naruto.id)]);

        let bleach_after = store.get_anime(&bleach.id).await.unwrap().unwrap();
        assert_eq!(bleach_after.updated_at, bleach.updated_at);
    }

    #[tokio::test]
    async fn new_rows_borrow_mal_id_from_siblings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/recently-updated"))
            .respond_with(ResponseTemplate::new(200).set_body_string(fixtures::listing(&[(
                "naruto-dub-9",
                "Naruto",
                3,
            )])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/naruto-dub-9"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(fixtures::info("Naruto Dub", 0, 20, 3)),
            )
            .mount(&server)
            .await;

        let (delta, store) = setup(&server).await;
        let mut sibling = scraped("naruto-677", 220);
        sibling.mal_id = 20;
        sibling.anilist_id = 20;
        store.insert_anime(&sibling, Utc::now()).await.unwrap();

        let report = delta.run(&Context::background()).await.unwrap();
        assert_eq!(report.counts.success, 1);
        assert!(report.invalidated.is_empty());

        let row = store
            .get_anime_by_hi_anime_id("naruto-dub-9")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.mal_id, Some(20));
        assert_eq!(row.anilist_id, Some(20));
        assert_eq!(row.ename, "Naruto Dub");
        assert_eq!(row.last_episode, 3);
    }
}
