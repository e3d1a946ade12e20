use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{Outcome, ScrapeCounts, fetch_detail, stamp};
use crate::clients::hianime::{HianimeClient, ScrapedAnime};
use crate::constants::scrape::PAGE_DELAY;
use crate::context::Context;
use crate::db::{Store, new_anime_row};
use crate::entities::animes;
use crate::error::CoreResult;

/// Fills an empty catalog: every A–Z page, then the recently-updated pages
/// from oldest to newest so `updated_at` follows first-seen order.
pub struct Seeder {
    store: Store,
    hianime: HianimeClient,
    concurrency: usize,
    page_delay: Duration,
}

impl Seeder {
    #[must_use]
    pub fn new(store: Store, hianime: HianimeClient, concurrency: usize) -> Self {
        Self {
            store,
            hianime,
            concurrency: concurrency.max(1),
            page_delay: PAGE_DELAY,
        }
    }

    #[must_use]
    pub const fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    pub async fn full_seed(&self, ctx: &Context) -> CoreResult<()> {
        info!("Starting A-Z seed");
        let inserted = self.seed_az(ctx).await?;
        info!(inserted, "A-Z seed finished");

        info!("Starting reverse recently-updated seed");
        let counts = self.seed_recently_updated(ctx).await?;
        info!(
            items = counts.items,
            success = counts.success,
            failed = counts.failed,
            "Full seed complete"
        );
        Ok(())
    }

    /// Walks the A–Z listing until the last page. Items whose detail page
    /// fails every attempt are left out. Returns the number of inserted rows.
    pub async fn seed_az(&self, ctx: &Context) -> CoreResult<u64> {
        let mut inserted = 0;
        let mut page = 1;
        loop {
            let listing = ctx.run(self.hianime.az_list(page)).await?;
            let has_next = listing.page_info.has_next_page;
            let now = Utc::now();

            let rows: Vec<animes::ActiveModel> = futures::stream::iter(listing.items)
                .map(|item| async move {
                    match fetch_detail(ctx, &self.hianime, &item.hi_anime_id).await {
                        Ok(detail) => Some(new_anime_row(&from_listing(item, detail), now)),
                        Err(e) => {
                            warn!(hi_anime_id = %item.hi_anime_id, error = %e, "A-Z detail fetch failed");
                            None
                        }
                    }
                })
                .buffer_unordered(self.concurrency)
                .filter_map(|row| async move { row })
                .collect()
                .await;

            if !rows.is_empty() {
                let written = self.store.insert_animes(rows).await?;
                info!(page, written, "Inserted A-Z page");
                inserted += written;
            }

            if !has_next {
                info!(page, "A-Z listing has no next page, stopping");
                return Ok(inserted);
            }
            page += 1;
            ctx.sleep(self.page_delay).await?;
        }
    }

    /// Walks the recently-updated listing from its last page to the first,
    /// inserting unknown rows and updating known ones.
    pub async fn seed_recently_updated(&self, ctx: &Context) -> CoreResult<ScrapeCounts> {
        let first = ctx.run(self.hianime.recently_updated(1)).await?;
        let total = first.page_info.total_pages.max(1);
        info!(total_pages = total, "Scraping recently-updated pages in reverse");

        let started = Instant::now();
        let start = Utc::now();
        let mut counts = ScrapeCounts::default();

        for page in (1..=total).rev() {
            let listing = if page == 1 {
                first.clone()
            } else {
                ctx.run(self.hianime.recently_updated(page)).await?
            };
            let len = listing.items.len();

            let ids: Vec<String> = listing
                .items
                .iter()
                .map(|a| a.hi_anime_id.clone())
                .collect();
            let existing: HashMap<String, animes::Model> = self
                .store
                .get_animes_by_hi_anime_ids(&ids)
                .await?
                .into_iter()
                .map(|row| (row.hi_anime_id.clone(), row))
                .collect();
            let existing = &existing;

            let seen = counts.items;
            let outcomes: Vec<Outcome> = futures::stream::iter(
                listing.items.into_iter().enumerate().rev(),
            )
            .map(|(idx, item)| async move {
                let global_index = recency_rank(seen, len, idx);
                self.write_recent(ctx, item, existing, stamp(start, global_index))
                    .await
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

            let mut page_counts = ScrapeCounts {
                items: len,
                ..ScrapeCounts::default()
            };
            for outcome in outcomes {
                page_counts.record(outcome);
            }
            info!(
                page,
                total_pages = total,
                items = page_counts.items,
                success = page_counts.success,
                failed = page_counts.failed,
                "Recently-updated page processed"
            );
            counts.merge(page_counts);

            ctx.sleep(self.page_delay).await?;
        }

        info!(
            total_pages = total,
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Finished recently-updated seed"
        );
        Ok(counts)
    }

    async fn write_recent(
        &self,
        ctx: &Context,
        item: ScrapedAnime,
        existing: &HashMap<String, animes::Model>,
        at: chrono::DateTime<Utc>,
    ) -> Outcome {
        let detail = match fetch_detail(ctx, &self.hianime, &item.hi_anime_id).await {
            Ok(detail) => detail,
            Err(e) => {
                warn!(hi_anime_id = %item.hi_anime_id, error = %e, "Recently-updated detail fetch failed");
                return Outcome::Failed;
            }
        };
        let row = ScrapedAnime {
            last_episode: item.last_episode,
            ..detail
        };

        let res = match existing.get(&item.hi_anime_id) {
            Some(current) => self.store.update_anime(&current.id, &row, at).await.map(drop),
            None => self.store.insert_anime(&row, at).await.map(drop),
        };
        match res {
            Ok(()) => Outcome::Written,
            Err(e) => {
                warn!(hi_anime_id = %item.hi_anime_id, error = %e, "Recently-updated write failed");
                Outcome::Failed
            }
        }
    }
}

/// Listing titles, poster and episode count win over the detail page; ids,
/// genres and season come from the detail page.
fn from_listing(item: ScrapedAnime, detail: ScrapedAnime) -> ScrapedAnime {
    ScrapedAnime {
        hi_anime_id: item.hi_anime_id,
        ename: item.ename,
        jname: item.jname,
        poster_url: item.poster_url,
        last_episode: item.last_episode,
        ..detail
    }
}

/// Position of page item `idx` in oldest-first order, given the `seen` items
/// of the older pages already written. The last item of a page is its oldest.
const fn recency_rank(seen: usize, len: usize, idx: usize) -> usize {
    seen + (len - 1 - idx)
}
