use chrono::{DateTime, Duration as TimeDelta, Utc};
use tracing::{debug, info};

use crate::clients::myanimelist::MalClient;
use crate::context::Context;
use crate::db::Store;
use crate::domain::Provider;
use crate::error::{CoreError, CoreResult};

/// Tokens expiring within this window are refreshed.
const REFRESH_WINDOW_DAYS: i64 = 7;

/// Absolute expiry of a token granted at `now` for `expires_in` seconds.
fn expiry(now: DateTime<Utc>, expires_in: i64) -> CoreResult<DateTime<Utc>> {
    TimeDelta::try_seconds(expires_in)
        .filter(|lifetime| *lifetime > TimeDelta::zero())
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .ok_or_else(|| CoreError::parse("myanimelist", format!("invalid expires_in {expires_in}")))
}

/// Daily refresh of MyAnimeList tokens close to expiry. AniList issues no
/// refresh tokens, so its rows are left alone.
#[derive(Clone)]
pub struct TokenRefresher {
    store: Store,
    mal: MalClient,
}

impl TokenRefresher {
    #[must_use]
    pub const fn new(store: Store, mal: MalClient) -> Self {
        Self { store, mal }
    }

    /// Stops at the first failure. Returns how many tokens were refreshed.
    pub async fn run(&self, ctx: &Context) -> CoreResult<usize> {
        let now = Utc::now();
        let tokens = self
            .store
            .tokens_expiring_before(now + TimeDelta::days(REFRESH_WINDOW_DAYS))
            .await?;
        if tokens.is_empty() {
            info!("No tokens near expiry");
            return Ok(0);
        }

        let mut refreshed = 0;
        for token in tokens {
            if token.provider != Provider::MyAnimeList.as_str() {
                debug!(user_id = %token.user_id, provider = %token.provider, "Skipping token without refresh flow");
                continue;
            }

            let response = ctx.run(self.mal.refresh_token(&token.refresh_token)).await?;
            let expires_at = expiry(Utc::now(), response.expires_in)?;
            self.store
                .update_oauth_token(
                    &token.user_id,
                    Provider::MyAnimeList,
                    &response.access_token,
                    &response.refresh_token,
                    expires_at,
                )
                .await?;
            info!(user_id = %token.user_id, provider = %token.provider, "Token refreshed");
            refreshed += 1;
        }
        Ok(refreshed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::build_shared_http_client;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(server: &MockServer) -> (TokenRefresher, Store) {
        let store = Store::with_pool_options("sqlite::memory:", 1, 1)
            .await
            .unwrap();
        let uri = server.uri();
        let mal = MalClient::with_base_urls(build_shared_http_client().unwrap(), &uri, &uri, "id", "secret");
        (TokenRefresher::new(store.clone(), mal), store)
    }

    #[tokio::test]
    async fn refreshes_mal_tokens_and_skips_anilist() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 2_678_400,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (refresher, store) = setup(&server).await;
        let soon = Utc::now() + TimeDelta::days(1);
        store
            .save_oauth_token("u1", Provider::MyAnimeList, "old", "old-refresh", soon)
            .await
            .unwrap();
        store
            .save_oauth_token("u2", Provider::Anilist, "ani", "", soon)
            .await
            .unwrap();

        let refreshed = refresher.run(&Context::background()).await.unwrap();
        assert_eq!(refreshed, 1);

        let token = store
            .get_oauth_token("u1", Provider::MyAnimeList)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.token, "new-access");
        assert_eq!(token.refresh_token, "new-refresh");
        assert!(token.expires_at > Utc::now() + TimeDelta::days(30));
    }

    #[test]
    fn expiry_rejects_out_of_range_lifetimes() {
        let now = Utc::now();
        assert_eq!(expiry(now, 3600).unwrap(), now + TimeDelta::hours(1));
        for bad in [0, -5, i64::MAX, i64::MIN] {
            assert!(matches!(expiry(now, bad), Err(CoreError::Parse { .. })), "{bad}");
        }
    }

    #[tokio::test]
    async fn unusable_expiry_keeps_the_stored_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": i64::MAX,
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let (refresher, store) = setup(&server).await;
        let soon = Utc::now() + TimeDelta::hours(2);
        store
            .save_oauth_token("u1", Provider::MyAnimeList, "old", "old-refresh", soon)
            .await
            .unwrap();

        assert!(refresher.run(&Context::background()).await.is_err());
        let token = store
            .get_oauth_token("u1", Provider::MyAnimeList)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.token, "old");
    }

    #[tokio::test]
    async fn first_failure_stops_the_run() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/oauth2/token"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let (refresher, store) = setup(&server).await;
        let soon = Utc::now() + TimeDelta::hours(2);
        for user in ["u1", "u2"] {
            store
                .save_oauth_token(user, Provider::MyAnimeList, "old", "old-refresh", soon)
                .await
                .unwrap();
        }

        assert!(refresher.run(&Context::background()).await.is_err());
    }
}
