use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::clients::send_json;
use crate::error::CoreResult;

const SERVICE: &str = "jikan";
const JIKAN_API: &str = "https://api.jikan.moe/v4";

#[derive(Debug, Deserialize)]
struct JikanResponse<T> {
    data: T,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(default)]
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Images {
    #[serde(default)]
    pub jpg: Image,
    #[serde(default)]
    pub webp: Image,
}

#[derive(Debug, Deserialize)]
struct CharacterRef {
    mal_id: i32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    images: Images,
}

#[derive(Debug, Deserialize)]
struct CharacterRole {
    character: CharacterRef,
    #[serde(default)]
    role: String,
    #[serde(default)]
    favorites: i32,
}

/// One character of an anime, flattened for the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterNode {
    pub mal_id: i32,
    pub name: String,
    pub role: String,
    pub favorites: i32,
    #[serde(rename = "image_url")]
    pub image: Image,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimeRef {
    pub mal_id: i32,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub images: Images,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterAnime {
    #[serde(default)]
    pub role: String,
    pub anime: AnimeRef,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRef {
    pub mal_id: i32,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub images: Images,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceActor {
    pub person: PersonRef,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterFull {
    pub mal_id: i32,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub images: Images,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_kanji: Option<String>,
    #[serde(default)]
    pub nicknames: Vec<String>,
    #[serde(default)]
    pub favorites: i32,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub anime: Vec<CharacterAnime>,
    #[serde(default)]
    pub voices: Vec<VoiceActor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonAnime {
    #[serde(default)]
    pub position: String,
    pub anime: AnimeRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonVoice {
    #[serde(default)]
    pub role: String,
    pub anime: AnimeRef,
    pub character: PersonRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonFull {
    pub mal_id: i32,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub website_url: Option<String>,
    #[serde(default)]
    pub images: Images,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub family_name: Option<String>,
    #[serde(default)]
    pub alternate_names: Vec<String>,
    #[serde(default)]
    pub birthday: Option<String>,
    #[serde(default)]
    pub favorites: i32,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub anime: Vec<PersonAnime>,
    #[serde(default)]
    pub voices: Vec<PersonVoice>,
}

#[derive(Clone)]
pub struct JikanClient {
    client: Client,
    base_url: String,
}

impl JikanClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self::with_base_url(client, JIKAN_API)
    }

    #[must_use]
    pub fn with_base_url(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn data<T: serde::de::DeserializeOwned>(&self, path: &str) -> CoreResult<T> {
        let request = self.client.get(format!("{}{path}", self.base_url));
        let response: JikanResponse<T> = send_json(SERVICE, request).await?;
        Ok(response.data)
    }

    pub async fn anime_characters(&self, mal_id: i32) -> CoreResult<Vec<CharacterNode>> {
        let roles: Vec<CharacterRole> = self.data(&format!("/anime/{mal_id}/characters")).await?;
        Ok(roles
            .into_iter()
            .map(|r| CharacterNode {
                mal_id: r.character.mal_id,
                name: r.character.name,
                role: r.role,
                favorites: r.favorites,
                image: r.character.images.webp,
            })
            .collect())
    }

    pub async fn character_full(&self, character_id: i32) -> CoreResult<CharacterFull> {
        self.data(&format!("/characters/{character_id}/full")).await
    }

    pub async fn person_full(&self, person_id: i32) -> CoreResult<PersonFull> {
        self.data(&format!("/people/{person_id}/full")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::build_shared_http_client;
    use crate::error::CoreError;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn characters_are_flattened_with_webp_image() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/anime/16498/characters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "character": {
                        "mal_id": 40882,
                        "name": "Yeager, Eren",
                        "images": {
                            "jpg": {"image_url": "https://cdn/e.jpg"},
                            "webp": {"image_url": "https://cdn/e.webp", "small_image_url": "https://cdn/e_t.webp"}
                        }
                    },
                    "role": "Main",
                    "favorites": 100
                }]
            })))
            .mount(&server)
            .await;

        let client = JikanClient::with_base_url(build_shared_http_client().unwrap(), &server.uri());
        let characters = client.anime_characters(16498).await.unwrap();

        assert_eq!(characters.len(), 1);
        assert_eq!(characters[0].name, "Yeager, Eren");
        assert_eq!(characters[0].role, "Main");
        assert_eq!(characters[0].image.image_url, "https://cdn/e.webp");
    }

    #[tokio::test]
    async fn person_lookup_propagates_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/people/1/full"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = JikanClient::with_base_url(build_shared_http_client().unwrap(), &server.uri());
        let err = client.person_full(1).await.unwrap_err();
        assert!(matches!(err, CoreError::UpstreamStatus { code: 429, .. }));
        assert!(err.is_transient());
    }
}
