use crate::clients::hianime::ScrapedAnime;
use crate::domain::Season;
use crate::entities::animes;
use crate::error::CoreResult;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, Func, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set,
};

/// SQLite caps bound parameters per statement; 100 rows of 13 columns stays
/// well below it.
const INSERT_CHUNK: usize = 100;

pub struct AnimeRepository {
    conn: DatabaseConnection,
}

fn mal_or_none(id: i32) -> Option<i32> {
    (id > 0).then_some(id)
}

/// Active model for a freshly scraped row. `id` is generated here.
#[must_use]
pub fn new_active_model(anime: &ScrapedAnime, at: DateTime<Utc>) -> animes::ActiveModel {
    animes::ActiveModel {
        id: Set(uuid::Uuid::new_v4().to_string()),
        hi_anime_id: Set(anime.hi_anime_id.clone()),
        ename: Set(anime.ename.clone()),
        jname: Set(anime.jname.clone()),
        image_url: Set(anime.poster_url.clone()),
        genre: Set(anime.genre.clone()),
        season: Set(Season::lossy(&anime.season).to_string()),
        season_year: Set(anime.season_year),
        mal_id: Set(mal_or_none(anime.mal_id)),
        anilist_id: Set(mal_or_none(anime.anilist_id)),
        last_episode: Set(anime.last_episode.max(0)),
        created_at: Set(at),
        updated_at: Set(at),
    }
}

/// A page of rows plus the unpaginated total.
pub type Page = (Vec<animes::Model>, u64);

impl AnimeRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    async fn page(&self, query: Select<animes::Entity>, page: u64, size: u64) -> CoreResult<Page> {
        let paginator = query.paginate(&self.conn, size);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((items, total))
    }

    pub async fn get(&self, id: &str) -> CoreResult<Option<animes::Model>> {
        Ok(animes::Entity::find_by_id(id.to_string())
            .one(&self.conn)
            .await?)
    }

    pub async fn get_by_hi_anime_id(&self, hi_anime_id: &str) -> CoreResult<Option<animes::Model>> {
        Ok(animes::Entity::find()
            .filter(animes::Column::HiAnimeId.eq(hi_anime_id))
            .one(&self.conn)
            .await?)
    }

    pub async fn get_by_hi_anime_ids(&self, ids: &[String]) -> CoreResult<Vec<animes::Model>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(animes::Entity::find()
            .filter(animes::Column::HiAnimeId.is_in(ids.iter().cloned()))
            .all(&self.conn)
            .await?)
    }

    pub async fn list_by_mal_id(&self, mal_id: i32) -> CoreResult<Vec<animes::Model>> {
        Ok(animes::Entity::find()
            .filter(animes::Column::MalId.eq(mal_id))
            .order_by_asc(animes::Column::CreatedAt)
            .all(&self.conn)
            .await?)
    }

    pub async fn get_by_mal_ids(&self, mal_ids: &[i32]) -> CoreResult<Vec<animes::Model>> {
        if mal_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(animes::Entity::find()
            .filter(animes::Column::MalId.is_in(mal_ids.iter().copied()))
            .all(&self.conn)
            .await?)
    }

    pub async fn list_by_anilist_id(&self, anilist_id: i32) -> CoreResult<Vec<animes::Model>> {
        Ok(animes::Entity::find()
            .filter(animes::Column::AnilistId.eq(anilist_id))
            .all(&self.conn)
            .await?)
    }

    pub async fn count(&self) -> CoreResult<u64> {
        Ok(animes::Entity::find().count(&self.conn).await?)
    }

    pub async fn recently_updated(&self, page: u64, size: u64) -> CoreResult<Page> {
        let query = animes::Entity::find()
            .order_by_desc(animes::Column::UpdatedAt)
            .order_by_asc(animes::Column::Id);
        self.page(query, page, size).await
    }

    pub async fn by_year(&self, year: i32, page: u64, size: u64) -> CoreResult<Page> {
        let query = animes::Entity::find()
            .filter(animes::Column::SeasonYear.eq(year))
            .order_by_desc(animes::Column::UpdatedAt)
            .order_by_asc(animes::Column::Id);
        self.page(query, page, size).await
    }

    pub async fn by_season(
        &self,
        season: &str,
        year: i32,
        page: u64,
        size: u64,
    ) -> CoreResult<Page> {
        let query = animes::Entity::find()
            .filter(animes::Column::Season.eq(season))
            .filter(animes::Column::SeasonYear.eq(year))
            .order_by_desc(animes::Column::UpdatedAt)
            .order_by_asc(animes::Column::Id);
        self.page(query, page, size).await
    }

    pub async fn by_genre(&self, genre: &str, page: u64, size: u64) -> CoreResult<Page> {
        let query = animes::Entity::find()
            .filter(animes::Column::Genre.contains(genre))
            .order_by_desc(animes::Column::UpdatedAt)
            .order_by_asc(animes::Column::Id);
        self.page(query, page, size).await
    }

    pub async fn random(&self, genre: Option<&str>) -> CoreResult<Option<animes::Model>> {
        let mut query = animes::Entity::find();
        if let Some(genre) = genre {
            query = query.filter(animes::Column::Genre.contains(genre));
        }
        Ok(query
            .order_by(Expr::cust("RANDOM()"), Order::Asc)
            .one(&self.conn)
            .await?)
    }

    /// Case-insensitive substring match on either title.
    pub async fn search(
        &self,
        query: &str,
        genre: Option<&str>,
        page: u64,
        size: u64,
    ) -> CoreResult<Page> {
        let pattern = format!("%{}%", query.trim().to_lowercase());
        let mut select = animes::Entity::find().filter(
            Condition::any()
                .add(Expr::expr(Func::lower(Expr::col(animes::Column::Ename))).like(&pattern))
                .add(Expr::expr(Func::lower(Expr::col(animes::Column::Jname))).like(&pattern)),
        );
        if let Some(genre) = genre {
            select = select.filter(animes::Column::Genre.contains(genre));
        }
        let select = select
            .order_by_desc(animes::Column::UpdatedAt)
            .order_by_asc(animes::Column::Id);
        self.page(select, page, size).await
    }

    /// Distinct genre names across the catalog, sorted.
    pub async fn genres(&self) -> CoreResult<Vec<String>> {
        let rows: Vec<String> = animes::Entity::find()
            .select_only()
            .column(animes::Column::Genre)
            .distinct()
            .into_tuple()
            .all(&self.conn)
            .await?;

        let mut genres: Vec<String> = rows
            .iter()
            .flat_map(|g| g.split(','))
            .map(str::trim)
            .filter(|g| !g.is_empty() && !g.eq_ignore_ascii_case("unknown"))
            .map(ToString::to_string)
            .collect();
        genres.sort_unstable();
        genres.dedup();
        Ok(genres)
    }

    /// Inserts rows, ignoring ones whose `hi_anime_id` already exists.
    /// Returns the number of rows written.
    pub async fn insert_many(&self, rows: Vec<animes::ActiveModel>) -> CoreResult<u64> {
        let mut written = 0;
        for chunk in rows.chunks(INSERT_CHUNK) {
            written += animes::Entity::insert_many(chunk.to_vec())
                .on_conflict(
                    OnConflict::column(animes::Column::HiAnimeId)
                        .do_nothing()
                        .to_owned(),
                )
                .exec_without_returning(&self.conn)
                .await?;
        }
        Ok(written)
    }

    pub async fn insert(
        &self,
        anime: &ScrapedAnime,
        at: DateTime<Utc>,
    ) -> CoreResult<animes::Model> {
        Ok(new_active_model(anime, at).insert(&self.conn).await?)
    }

    /// Overwrites every scraped field of `id` and stamps `updated_at`.
    pub async fn update(
        &self,
        id: &str,
        anime: &ScrapedAnime,
        at: DateTime<Utc>,
    ) -> CoreResult<animes::Model> {
        let model = animes::ActiveModel {
            id: Set(id.to_string()),
            hi_anime_id: Set(anime.hi_anime_id.clone()),
            ename: Set(anime.ename.clone()),
            jname: Set(anime.jname.clone()),
            image_url: Set(anime.poster_url.clone()),
            genre: Set(anime.genre.clone()),
            season: Set(Season::lossy(&anime.season).to_string()),
            season_year: Set(anime.season_year),
            mal_id: Set(mal_or_none(anime.mal_id)),
            anilist_id: Set(mal_or_none(anime.anilist_id)),
            last_episode: Set(anime.last_episode.max(0)),
            updated_at: Set(at),
            ..Default::default()
        };
        Ok(model.update(&self.conn).await?)
    }
}
