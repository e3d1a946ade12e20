use crate::domain::Provider;
use crate::entities::oauth_tokens;
use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

pub struct OauthTokenRepository {
    conn: DatabaseConnection,
}

impl OauthTokenRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn get(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> CoreResult<Option<oauth_tokens::Model>> {
        Ok(oauth_tokens::Entity::find()
            .filter(oauth_tokens::Column::UserId.eq(user_id))
            .filter(oauth_tokens::Column::Provider.eq(provider.as_str()))
            .one(&self.conn)
            .await?)
    }

    /// Tokens expiring before `deadline`, soonest first.
    pub async fn expiring_before(
        &self,
        deadline: DateTime<Utc>,
    ) -> CoreResult<Vec<oauth_tokens::Model>> {
        Ok(oauth_tokens::Entity::find()
            .filter(oauth_tokens::Column::ExpiresAt.lt(deadline))
            .order_by_asc(oauth_tokens::Column::ExpiresAt)
            .all(&self.conn)
            .await?)
    }

    pub async fn upsert(
        &self,
        user_id: &str,
        provider: Provider,
        token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let now = Utc::now();
        let model = oauth_tokens::ActiveModel {
            user_id: Set(user_id.to_string()),
            provider: Set(provider.to_string()),
            token: Set(token.to_string()),
            refresh_token: Set(refresh_token.to_string()),
            expires_at: Set(expires_at),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        oauth_tokens::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([oauth_tokens::Column::UserId, oauth_tokens::Column::Provider])
                    .update_columns([
                        oauth_tokens::Column::Token,
                        oauth_tokens::Column::RefreshToken,
                        oauth_tokens::Column::ExpiresAt,
                        oauth_tokens::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;
        Ok(())
    }

    pub async fn update(
        &self,
        user_id: &str,
        provider: Provider,
        token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let row = self
            .get(user_id, provider)
            .await?
            .ok_or(CoreError::not_found("oauth token"))?;

        let mut model: oauth_tokens::ActiveModel = row.into();
        model.token = Set(token.to_string());
        model.refresh_token = Set(refresh_token.to_string());
        model.expires_at = Set(expires_at);
        model.updated_at = Set(Utc::now());
        model.update(&self.conn).await?;
        Ok(())
    }
}
