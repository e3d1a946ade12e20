//! Watch order and related titles derived from a franchise graph.

use std::collections::{HashMap, HashSet};

use crate::cache::Cache;
use crate::clients::shikimori::{Franchise, ShikimoriClient};
use crate::constants::cache::RELATIONS_TTL;
use crate::context::Context;
use crate::db::Store;
use crate::entities::animes;
use crate::error::{CoreError, CoreResult};
use crate::models::anime::{AnimeDto, RelationsDto};
use crate::services::metadata_refresher::MetadataRefresher;

const SEQUEL: &str = "sequel";

/// Sequel chain through `mal_id`, from the earliest prequel to the last
/// sequel. A cycle in the graph ends the walk at the first repeated id.
#[must_use]
pub fn watch_order(franchise: &Franchise, mal_id: i32) -> Vec<i32> {
    let mut forward = HashMap::new();
    let mut backward = HashMap::new();
    for link in franchise.links.iter().filter(|l| l.relation == SEQUEL) {
        forward.insert(link.source_id, link.target_id);
        backward.insert(link.target_id, link.source_id);
    }

    let mut seen = HashSet::from([mal_id]);
    let mut first = mal_id;
    while let Some(&prev) = backward.get(&first) {
        if !seen.insert(prev) {
            break;
        }
        first = prev;
    }

    let mut order = vec![first];
    let mut seen = HashSet::from([first]);
    let mut current = first;
    while let Some(&next) = forward.get(&current) {
        if !seen.insert(next) {
            break;
        }
        order.push(next);
        current = next;
    }
    order
}

/// Franchise members that are neither the anchor nor in the watch order.
#[must_use]
pub fn related(franchise: &Franchise, mal_id: i32, watch_order: &[i32]) -> Vec<i32> {
    franchise
        .nodes
        .iter()
        .map(|n| n.id)
        .filter(|id| *id != mal_id && !watch_order.contains(id))
        .collect()
}

#[must_use]
pub fn full_franchise(franchise: &Franchise) -> Vec<i32> {
    franchise.nodes.iter().map(|n| n.id).collect()
}

#[derive(Clone)]
pub struct RelationsResolver {
    store: Store,
    cache: Cache,
    shikimori: ShikimoriClient,
    refresher: MetadataRefresher,
}

impl RelationsResolver {
    #[must_use]
    pub const fn new(
        store: Store,
        cache: Cache,
        shikimori: ShikimoriClient,
        refresher: MetadataRefresher,
    ) -> Self {
        Self {
            store,
            cache,
            shikimori,
            refresher,
        }
    }

    pub async fn relations(&self, ctx: &Context, anime_id: &str) -> CoreResult<RelationsDto> {
        let key = format!("anime_relations:{anime_id}");
        self.cache
            .get_or_fill(&key, RELATIONS_TTL, || self.resolve(ctx, anime_id))
            .await
    }

    async fn resolve(&self, ctx: &Context, anime_id: &str) -> CoreResult<RelationsDto> {
        let anime = self
            .store
            .get_anime(anime_id)
            .await?
            .ok_or(CoreError::not_found("anime"))?;
        let mal_id = anime
            .known_mal_id()
            .ok_or_else(|| CoreError::invalid("mal_id", format!("anime {anime_id} has no MAL id")))?;

        let franchise = ctx.run(self.shikimori.franchise(mal_id)).await?;
        let order = watch_order(&franchise, mal_id);
        let related_ids = related(&franchise, mal_id, &order);
        let full = full_franchise(&franchise);

        let rows = self.store.get_animes_by_mal_ids(&full).await?;
        let mut by_mal: HashMap<i32, &animes::Model> = HashMap::with_capacity(rows.len());
        for row in &rows {
            if let Some(id) = row.known_mal_id() {
                by_mal.entry(id).or_insert(row);
                self.refresher.enqueue(id);
            }
        }
        let pick = |ids: &[i32]| -> Vec<AnimeDto> {
            ids.iter()
                .filter_map(|id| by_mal.get(id).map(|row| AnimeDto::from(*row)))
                .collect()
        };
        let reversed = |ids: &[i32]| -> Vec<i32> { ids.iter().rev().copied().collect() };

        if order.len() > 1 && order.contains(&mal_id) {
            return Ok(RelationsDto {
                watch_order: pick(&order),
                related: pick(&reversed(&related_ids)),
            });
        }

        let related = if full.len() == 1 {
            Vec::new()
        } else {
            pick(&reversed(&full))
        };
        Ok(RelationsDto {
            watch_order: Vec::new(),
            related,
        })
    }
}
