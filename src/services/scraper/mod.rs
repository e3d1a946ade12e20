//! Catalog ingestion: the one-off seed and the hourly delta pass.

mod delta;
mod seed;

pub use delta::{DeltaReport, DeltaScraper};
pub use seed::Seeder;

use chrono::{DateTime, TimeDelta, Utc};

use crate::clients::hianime::{HianimeClient, ScrapedAnime};
use crate::constants::retry::{DETAIL_ATTEMPTS, DETAIL_DELAY};
use crate::constants::scrape::UPDATE_STRIDE;
use crate::context::Context;
use crate::error::CoreResult;
use crate::services::retry::with_retry;

/// Outcome counters of one scraped page or run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeCounts {
    pub items: usize,
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ScrapeCounts {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Written => self.success += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Failed => self.failed += 1,
        }
    }

    fn merge(&mut self, other: Self) {
        self.items += other.items;
        self.success += other.success;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Written,
    Skipped,
    Failed,
}

/// Detail page with the fixed retry policy of the ingestion workers.
pub(crate) async fn fetch_detail(
    ctx: &Context,
    hianime: &HianimeClient,
    hi_anime_id: &str,
) -> CoreResult<ScrapedAnime> {
    with_retry(ctx, DETAIL_ATTEMPTS, DETAIL_DELAY, || {
        ctx.run(hianime.anime_info(hi_anime_id))
    })
    .await
}

/// `start` shifted by `index` update strides.
fn stamp(start: DateTime<Utc>, index: usize) -> DateTime<Utc> {
    let stride = TimeDelta::from_std(UPDATE_STRIDE).unwrap_or_default();
    start + stride * i32::try_from(index).unwrap_or(i32::MAX)
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! HTML bodies shaped like the scraped site.

    pub fn listing(items: &[(&str, &str, i32)]) -> String {
        items
            .iter()
            .map(|(id, title, last)| {
                format!(
                    r#"<div class="flw-item">
                      <div class="film-poster"><div class="tick-sub">{last}</div>
                        <img data-src="https://x/{id}.jpg"><a href="/watch/{id}"></a></div>
                      <div class="film-detail"><h3 class="film-name"><a data-jname="{title}">{title}</a></h3></div>
                    </div>"#
                )
            })
            .collect()
    }

    pub fn info(title: &str, mal_id: i32, anilist_id: i32, last: i32) -> String {
        format!(
            r#"<script id="syncData" type="application/json">{{"mal_id":"{mal_id}","anilist_id":"{anilist_id}"}}</script>
            <div class="film-poster"><img src="https://x/detail.jpg"></div>
            <h2 class="film-name dynamic-name" data-jname="{title}">{title}</h2>
            <div class="tick-item tick-sub">{last}</div>
            <div class="anisc-info">
              <div class="item item-list"><a href="/genre/action">Action</a></div>
              <div class="item item-title">
                <span class="item-head">Premiered:</span><span class="name">Fall 2002</span>
              </div>
            </div>"#
        )
    }
}
