use crate::{
    entities::shop,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use tracing::{info, instrument};
use uuid::Uuid;

/// Outcome of applying an `account.updated` notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountUpdate {
    /// The shop can now take payments.
    Connected(Uuid),
    /// Already connected, or onboarding not finished yet.
    Unchanged,
    /// No shop uses this connected account.
    UnknownAccount,
}

/// Tenant lookups and the payment-readiness flag.
#[derive(Clone)]
pub struct ShopService {
    event_sender: EventSender,
}

impl ShopService {
    pub fn new(event_sender: EventSender) -> Self {
        Self { event_sender }
    }

    pub async fn find_by_subdomain<C: ConnectionTrait>(
        &self,
        db: &C,
        subdomain: &str,
    ) -> Result<shop::Model, ServiceError> {
        shop::Entity::find()
            .filter(shop::Column::Subdomain.eq(subdomain.to_ascii_lowercase()))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Shop '{}' not found", subdomain)))
    }

    /// Flags the shop owning `account_id` as payment-enabled once the provider
    /// reports that its details were submitted.
    #[instrument(skip(self, db))]
    pub async fn apply_account_update<C: ConnectionTrait>(
        &self,
        db: &C,
        account_id: &str,
        details_submitted: bool,
    ) -> Result<AccountUpdate, ServiceError> {
        let Some(shop) = shop::Entity::find()
            .filter(shop::Column::StripeAccountId.eq(account_id))
            .one(db)
            .await?
        else {
            return Ok(AccountUpdate::UnknownAccount);
        };

        if !details_submitted || shop.stripe_connected {
            return Ok(AccountUpdate::Unchanged);
        }

        let result = shop::Entity::update_many()
            .col_expr(shop::Column::StripeConnected, Expr::value(true))
            .col_expr(shop::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(shop::Column::Id.eq(shop.id))
            .filter(shop::Column::StripeConnected.eq(false))
            .exec(db)
            .await?;

        if result.rows_affected == 0 {
            return Ok(AccountUpdate::Unchanged);
        }

        info!(shop_id = %shop.id, %account_id, "shop connected account ready");
        self.event_sender
            .send_or_log(Event::ShopPaymentsEnabled { shop_id: shop.id })
            .await;
        Ok(AccountUpdate::Connected(shop.id))
    }
}
