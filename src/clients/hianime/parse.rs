//! HTML extraction for catalog, episode and server pages.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::OnceLock;

use super::{PageInfo, ScrapedAnime, ScrapedEpisode, ScrapedEpisodeServer};

/// Server ids the catalog exposes to clients.
const ALLOWED_SERVER_IDS: [&str; 3] = ["1", "4", "6"];

pub(super) struct Selectors {
    pub pagination: Selector,
    pub li: Selector,
    pub active_link: Selector,
    pub link: Selector,
    pub flw_item: Selector,
    pub poster_link: Selector,
    pub film_name_link: Selector,
    pub poster_img: Selector,
    pub poster_tick_sub: Selector,
    pub sync_data: Selector,
    pub info_title: Selector,
    pub info_poster: Selector,
    pub info_genre_link: Selector,
    pub info_item_title: Selector,
    pub item_head: Selector,
    pub item_name: Selector,
    pub tick_sub: Selector,
    pub episode_link: Selector,
    pub server_item: Selector,
    pub megaplay_player: Selector,
    pub meta_gg_fb: Selector,
    pub data_dpi: Selector,
    pub nonce_script: Selector,
    pub mal_trailer: Selector,
}

impl Selectors {
    pub fn get() -> Option<&'static Self> {
        static INSTANCE: OnceLock<Option<Selectors>> = OnceLock::new();
        INSTANCE
            .get_or_init(|| {
                let s = |css: &str| Selector::parse(css).ok();
                Some(Self {
                    pagination: s(".pagination")?,
                    li: s("li")?,
                    active_link: s("li.active a")?,
                    link: s("a")?,
                    flw_item: s("div.flw-item")?,
                    poster_link: s(".film-poster a")?,
                    film_name_link: s(".film-detail .film-name a")?,
                    poster_img: s(".film-poster img")?,
                    poster_tick_sub: s(".film-poster .tick-sub")?,
                    sync_data: s("#syncData")?,
                    info_title: s("h2.film-name.dynamic-name")?,
                    info_poster: s(".film-poster img")?,
                    info_genre_link: s(".anisc-info .item-list a")?,
                    info_item_title: s(".anisc-info .item-title")?,
                    item_head: s(".item-head")?,
                    item_name: s(".name")?,
                    tick_sub: s(".tick-item.tick-sub")?,
                    episode_link: s(".detail-infor-content .ss-list a")?,
                    server_item: s(".server-item")?,
                    megaplay_player: s("#megaplay-player")?,
                    meta_gg_fb: s(r#"meta[name="_gg_fb"]"#)?,
                    data_dpi: s("[data-dpi]")?,
                    nonce_script: s("script[nonce]")?,
                    mal_trailer: s("a.iframe")?,
                })
            })
            .as_ref()
    }
}

pub(super) fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> String {
    scope.select(selector).next().map(text_of).unwrap_or_default()
}

fn first_attr(scope: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    scope
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(ToString::to_string)
}

fn has_class(el: ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

/// Reads the pagination block. Pages without one are a single page.
pub(super) fn page_info(doc: &Html, s: &Selectors) -> PageInfo {
    let Some(block) = doc.select(&s.pagination).next() else {
        return PageInfo::single();
    };

    let last_page = match block.select(&s.li).last() {
        Some(last) if has_class(last, "active") => text_of(last).parse().unwrap_or(0),
        Some(last) => last
            .select(&s.link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| href.rsplit("page=").next())
            .and_then(|n| n.parse().ok())
            .unwrap_or(0),
        None => 0,
    }
    .max(1);

    let current_page = block
        .select(&s.active_link)
        .next()
        .map(text_of)
        .and_then(|t| t.parse().ok())
        .unwrap_or(1);

    PageInfo {
        total_pages: last_page,
        current_page,
        has_next_page: current_page < last_page,
        has_previous_page: current_page > 1,
    }
}

/// Extracts the card grid shared by the A-Z and recently-updated listings.
pub(super) fn listing_items(doc: &Html, s: &Selectors) -> Vec<ScrapedAnime> {
    doc.select(&s.flw_item)
        .map(|item| {
            let href = first_attr(item, &s.poster_link, "href").unwrap_or_default();
            let hi_anime_id = href
                .trim_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string();

            ScrapedAnime {
                hi_anime_id,
                ename: first_text(item, &s.film_name_link),
                jname: first_attr(item, &s.film_name_link, "data-jname").unwrap_or_default(),
                poster_url: first_attr(item, &s.poster_img, "data-src").unwrap_or_default(),
                last_episode: first_text(item, &s.poster_tick_sub).parse().unwrap_or(0),
                ..ScrapedAnime::default()
            }
        })
        .collect()
}

#[derive(serde::Deserialize, Default)]
struct SyncData {
    #[serde(default)]
    mal_id: String,
    #[serde(default)]
    anilist_id: String,
}

pub(super) fn anime_info(doc: &Html, s: &Selectors, hi_anime_id: &str) -> ScrapedAnime {
    let root = doc.root_element();

    let sync: SyncData = root
        .select(&s.sync_data)
        .next()
        .map(|el| el.text().collect::<String>())
        .and_then(|json| serde_json::from_str(&json).ok())
        .unwrap_or_default();

    let genres: Vec<String> = root
        .select(&s.info_genre_link)
        .filter(|a| a.value().attr("href").is_some_and(|h| h.contains("genre")))
        .map(text_of)
        .collect();

    let mut season = String::new();
    let mut season_year = String::new();
    for item in root.select(&s.info_item_title) {
        if first_text(item, &s.item_head) != "Premiered:" {
            continue;
        }
        let premiered = first_text(item, &s.item_name);
        match premiered.split_once(' ') {
            Some((name, year)) => {
                season = name.to_string();
                season_year = year.to_string();
            }
            None => season = premiered,
        }
    }

    let season_year: i32 = season_year.trim().parse().unwrap_or(0);
    if season_year == 0 || season.is_empty() {
        season = "Unknown".to_string();
    }

    ScrapedAnime {
        hi_anime_id: hi_anime_id.to_string(),
        ename: first_text(root, &s.info_title),
        jname: first_attr(root, &s.info_title, "data-jname").unwrap_or_default(),
        poster_url: first_attr(root, &s.info_poster, "src").unwrap_or_default(),
        genre: if genres.is_empty() {
            "Unknown".to_string()
        } else {
            genres.join(", ")
        },
        mal_id: sync.mal_id.trim().parse().unwrap_or(0),
        anilist_id: sync.anilist_id.trim().parse().unwrap_or(0),
        last_episode: first_text(root, &s.tick_sub).parse().unwrap_or(0),
        season,
        season_year,
    }
}

pub(super) fn episodes(doc: &Html, s: &Selectors) -> Vec<ScrapedEpisode> {
    doc.select(&s.episode_link)
        .filter_map(|a| {
            let el = a.value();
            let (_, episode_id) = el.attr("href")?.split_once("?ep=")?;
            Some(ScrapedEpisode {
                episode_id: episode_id.trim().to_string(),
                title: el.attr("title").unwrap_or_default().trim().to_string(),
                number: el.attr("data-number").unwrap_or("1").parse().unwrap_or(0),
                is_filler: has_class(a, "ssl-item-filler"),
            })
        })
        .collect()
}

/// Lists the allowed servers and appends one Megaplay fallback per audio
/// type seen. A raw track falls back as `sub` unless a sub server exists.
pub(super) fn episode_servers(
    doc: &Html,
    s: &Selectors,
    episode_id: &str,
) -> Vec<ScrapedEpisodeServer> {
    let mut out = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    for item in doc.select(&s.server_item) {
        let el = item.value();
        let server_id = el.attr("data-server-id").unwrap_or_default();
        if !ALLOWED_SERVER_IDS.contains(&server_id) {
            continue;
        }

        let kind = el.attr("data-type").unwrap_or_default().to_string();
        seen.insert(kind.clone());
        out.push(ScrapedEpisodeServer {
            kind,
            server_name: text_of(item),
            server_id: el.attr("data-id").unwrap_or_default().to_string(),
        });
    }

    for kind in ["sub", "dub", "raw"] {
        if !seen.contains(kind) {
            continue;
        }
        let kind = if kind == "raw" {
            if seen.contains("sub") {
                continue;
            }
            "sub"
        } else {
            kind
        };
        out.push(ScrapedEpisodeServer {
            kind: kind.to_string(),
            server_name: "Megaplay".to_string(),
            server_id: episode_id.to_string(),
        });
    }

    out
}

pub(super) fn megaplay_media_id(doc: &Html, s: &Selectors) -> Option<String> {
    doc.select(&s.megaplay_player)
        .next()
        .and_then(|el| el.value().attr("data-id"))
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel() -> &'static Selectors {
        Selectors::get().unwrap()
    }

    #[test]
    fn page_info_defaults_without_pagination() {
        let doc = Html::parse_document("<html><body><div></div></body></html>");
        let info = page_info(&doc, sel());
        assert_eq!(info, PageInfo::single());
    }

    #[test]
    fn page_info_reads_last_link() {
        let html = r#"
            <ul class="pagination">
              <li class="page-item active"><a class="page-link">2</a></li>
              <li class="page-item"><a href="/az-list?page=3">3</a></li>
              <li class="page-item"><a href="/az-list?page=57">&raquo;</a></li>
            </ul>"#;
        let doc = Html::parse_document(html);
        let info = page_info(&doc, sel());
        assert_eq!(info.total_pages, 57);
        assert_eq!(info.current_page, 2);
        assert!(info.has_next_page);
        assert!(info.has_previous_page);
    }

    #[test]
    fn page_info_on_last_page() {
        let html = r#"
            <ul class="pagination">
              <li class="page-item"><a href="/recently-updated?page=1">1</a></li>
              <li class="page-item active"><a>2</a></li>
            </ul>"#;
        let doc = Html::parse_document(html);
        let info = page_info(&doc, sel());
        assert_eq!(info.total_pages, 2);
        assert_eq!(info.current_page, 2);
        assert!(!info.has_next_page);
    }

    #[test]
    fn listing_items_extracts_cards() {
        let html = r#"
            <div class="flw-item">
              <div class="film-poster">
                <div class="tick-sub">221</div>
                <img data-src="https://x/p.jpg">
                <a href="/watch/naruto-677/"></a>
              </div>
              <div class="film-detail">
                <h3 class="film-name"><a data-jname="Naruto"> Naruto </a></h3>
              </div>
            </div>"#;
        let doc = Html::parse_document(html);
        let items = listing_items(&doc, sel());
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.hi_anime_id, "naruto-677");
        assert_eq!(item.ename, "Naruto");
        assert_eq!(item.jname, "Naruto");
        assert_eq!(item.poster_url, "https://x/p.jpg");
        assert_eq!(item.last_episode, 221);
    }

    #[test]
    fn anime_info_extracts_detail_page() {
        let html = r#"
            <script id="syncData" type="application/json">{"mal_id":"20","anilist_id":"20"}</script>
            <div class="film-poster"><img src="https://x/naruto.jpg"></div>
            <h2 class="film-name dynamic-name" data-jname="NARUTO">Naruto</h2>
            <div class="tick-item tick-sub">220</div>
            <div class="anisc-info">
              <div class="item item-list">
                <a href="/genre/action">Action</a>
                <a href="/genre/adventure">Adventure</a>
                <a href="/producer/pierrot">Pierrot</a>
              </div>
              <div class="item item-title">
                <span class="item-head">Premiered:</span>
                <span class="name">Fall 2002</span>
              </div>
            </div>"#;
        let doc = Html::parse_document(html);
        let info = anime_info(&doc, sel(), "naruto-677");
        assert_eq!(info.hi_anime_id, "naruto-677");
        assert_eq!(info.ename, "Naruto");
        assert_eq!(info.jname, "NARUTO");
        assert_eq!(info.poster_url, "https://x/naruto.jpg");
        assert_eq!(info.genre, "Action, Adventure");
        assert_eq!(info.mal_id, 20);
        assert_eq!(info.anilist_id, 20);
        assert_eq!(info.last_episode, 220);
        assert_eq!(info.season, "Fall");
        assert_eq!(info.season_year, 2002);
    }

    #[test]
    fn anime_info_unknown_season_and_genre() {
        let html = r#"<h2 class="film-name dynamic-name">Movie</h2>"#;
        let doc = Html::parse_document(html);
        let info = anime_info(&doc, sel(), "movie-1");
        assert_eq!(info.genre, "Unknown");
        assert_eq!(info.season, "Unknown");
        assert_eq!(info.season_year, 0);
        assert_eq!(info.mal_id, 0);
    }

    #[test]
    fn episodes_skip_links_without_episode_id() {
        let html = r#"
            <div class="detail-infor-content"><div class="ss-list">
              <a title="Enter: Naruto" data-number="1" href="/watch/naruto-677?ep=12352"></a>
              <a title="Filler" data-number="2" class="ssl-item ssl-item-filler" href="/watch/naruto-677?ep=12353"></a>
              <a title="Broken" data-number="3" href="/watch/naruto-677"></a>
            </div></div>"#;
        let doc = Html::parse_document(html);
        let eps = episodes(&doc, sel());
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].episode_id, "12352");
        assert_eq!(eps[0].number, 1);
        assert!(!eps[0].is_filler);
        assert!(eps[1].is_filler);
    }

    #[test]
    fn servers_are_filtered_and_fallbacks_synthesised() {
        let html = r#"
            <div class="server-item" data-type="sub" data-id="111" data-server-id="4"><a>HD-1</a></div>
            <div class="server-item" data-type="sub" data-id="222" data-server-id="99"><a>Other</a></div>
            <div class="server-item" data-type="dub" data-id="333" data-server-id="1"><a>HD-2</a></div>
            <div class="server-item" data-type="raw" data-id="444" data-server-id="6"><a>HD-3</a></div>"#;
        let doc = Html::parse_document(html);
        let servers = episode_servers(&doc, sel(), "12352");

        let names: Vec<(&str, &str, &str)> = servers
            .iter()
            .map(|s| (s.kind.as_str(), s.server_name.as_str(), s.server_id.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("sub", "HD-1", "111"),
                ("dub", "HD-2", "333"),
                ("raw", "HD-3", "444"),
                ("sub", "Megaplay", "12352"),
                ("dub", "Megaplay", "12352"),
            ]
        );
    }

    #[test]
    fn raw_only_falls_back_as_sub() {
        let html = r#"<div class="server-item" data-type="raw" data-id="444" data-server-id="6">HD-3</div>"#;
        let doc = Html::parse_document(html);
        let servers = episode_servers(&doc, sel(), "9");
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].kind, "sub");
        assert_eq!(servers[1].server_name, "Megaplay");
    }
}
