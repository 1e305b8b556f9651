mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use common::TestApp;
use futures::future::join_all;
use rstest::rstest;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use storefront_api::{
    entities::{cart_item, product},
    errors::ServiceError,
    services::cart_service::{CartIssue, IncomingCartItem},
};
use uuid::Uuid;

#[tokio::test]
async fn add_item_accumulates_and_prices_from_catalog() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let shop = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let mug = app
        .seed_product(shop.id, "Mug", dec!(20.00), dec!(10), 10)
        .await;
    let user = Uuid::new_v4();

    carts.add_item(app.db(), user, shop.id, mug.id, 2, None).await.unwrap();
    let view = carts.add_item(app.db(), user, shop.id, mug.id, 1, None).await.unwrap();

    assert_eq!(view.items.len(), 1);
    let line = &view.items[0];
    assert_eq!(line.quantity, 3);
    assert_eq!(line.unit_price, dec!(20.00));
    assert_eq!(line.discount, dec!(10));
    assert_eq!(line.subtotal, dec!(54.00));
    assert_eq!(view.total, dec!(54.00));
}

#[tokio::test]
async fn add_item_rejects_more_than_stock() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let shop = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let mug = app.seed_product(shop.id, "Mug", dec!(5), dec!(0), 3).await;
    let user = Uuid::new_v4();

    carts.add_item(app.db(), user, shop.id, mug.id, 2, None).await.unwrap();
    let err = carts
        .add_item(app.db(), user, shop.id, mug.id, 2, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let view = carts.get_cart(app.db(), user, shop.id).await.unwrap();
    assert_eq!(view.items[0].quantity, 2);
}

#[tokio::test]
async fn add_item_enforces_line_cap() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let shop = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let mug = app.seed_product(shop.id, "Mug", dec!(5), dec!(0), 500).await;
    let user = Uuid::new_v4();

    assert_matches!(
        carts.add_item(app.db(), user, shop.id, mug.id, 100, None).await,
        Err(ServiceError::ValidationError(_))
    );
    carts.add_item(app.db(), user, shop.id, mug.id, 99, None).await.unwrap();
    assert_matches!(
        carts.add_item(app.db(), user, shop.id, mug.id, 1, None).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[rstest]
#[case(0)]
#[case(-3)]
#[case(100)]
#[tokio::test]
async fn add_item_rejects_out_of_range_quantities(#[case] quantity: i32) {
    let app = TestApp::new().await;
    let shop = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let mug = app.seed_product(shop.id, "Mug", dec!(5), dec!(0), 500).await;
    let user = Uuid::new_v4();

    assert_matches!(
        app.state
            .services
            .carts
            .add_item(app.db(), user, shop.id, mug.id, quantity, None)
            .await,
        Err(ServiceError::ValidationError(_))
    );
    let view = app.state.services.carts.get_cart(app.db(), user, shop.id).await.unwrap();
    assert!(view.is_empty());
}

#[tokio::test]
async fn products_of_another_shop_are_not_found() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let mugs = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let hats = app.seed_shop("hats", Uuid::new_v4(), true).await;
    let hat = app.seed_product(hats.id, "Hat", dec!(15), dec!(0), 5).await;

    let err = carts
        .add_item(app.db(), Uuid::new_v4(), mugs.id, hat.id, 1, None)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn variants_carry_their_own_stock_and_price() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let shop = app.seed_shop("tees", Uuid::new_v4(), true).await;
    let tee = app.seed_product(shop.id, "Tee", dec!(25), dec!(0), 0).await;
    app.seed_variant(tee.id, 0, 4, None).await;
    app.seed_variant(tee.id, 1, 1, Some(dec!(30))).await;
    let user = Uuid::new_v4();

    // A product with variants must be bought through one of them.
    assert_matches!(
        carts.add_item(app.db(), user, shop.id, tee.id, 1, None).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        carts.add_item(app.db(), user, shop.id, tee.id, 1, Some(7)).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        carts.add_item(app.db(), user, shop.id, tee.id, 2, Some(1)).await,
        Err(ServiceError::ValidationError(_))
    );

    carts.add_item(app.db(), user, shop.id, tee.id, 3, Some(0)).await.unwrap();
    let view = carts.add_item(app.db(), user, shop.id, tee.id, 1, Some(1)).await.unwrap();

    assert_eq!(view.items.len(), 2);
    let large = view
        .items
        .iter()
        .find(|l| l.variant_index == Some(1))
        .unwrap();
    assert_eq!(large.unit_price, dec!(30));
    assert_eq!(view.total, dec!(105));
}

#[tokio::test]
async fn update_to_zero_removes_and_remove_is_idempotent() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let shop = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let mug = app.seed_product(shop.id, "Mug", dec!(5), dec!(0), 10).await;
    let user = Uuid::new_v4();

    carts.add_item(app.db(), user, shop.id, mug.id, 2, None).await.unwrap();
    let view = carts
        .update_quantity(app.db(), user, shop.id, mug.id, None, 5)
        .await
        .unwrap();
    assert_eq!(view.items[0].quantity, 5);
    assert_eq!(view.total, dec!(25));

    let view = carts
        .update_quantity(app.db(), user, shop.id, mug.id, None, 0)
        .await
        .unwrap();
    assert!(view.is_empty());

    let view = carts
        .remove_item(app.db(), user, shop.id, mug.id, None)
        .await
        .unwrap();
    assert!(view.is_empty());
}

#[tokio::test]
async fn update_quantity_of_missing_line_fails() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let shop = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let mug = app.seed_product(shop.id, "Mug", dec!(5), dec!(0), 10).await;

    let err = carts
        .update_quantity(app.db(), Uuid::new_v4(), shop.id, mug.id, None, 3)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn carts_are_scoped_per_shop() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let mugs = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let hats = app.seed_shop("hats", Uuid::new_v4(), true).await;
    let mug = app.seed_product(mugs.id, "Mug", dec!(5), dec!(0), 10).await;
    let hat = app.seed_product(hats.id, "Hat", dec!(9), dec!(0), 10).await;
    let user = Uuid::new_v4();

    carts.add_item(app.db(), user, mugs.id, mug.id, 1, None).await.unwrap();
    carts.add_item(app.db(), user, hats.id, hat.id, 2, None).await.unwrap();
    carts.clear_cart(app.db(), user, mugs.id).await.unwrap();

    assert!(carts.get_cart(app.db(), user, mugs.id).await.unwrap().is_empty());
    let hats_cart = carts.get_cart(app.db(), user, hats.id).await.unwrap();
    assert_eq!(hats_cart.items.len(), 1);
    assert_eq!(hats_cart.total, dec!(18));
}

#[tokio::test]
async fn validate_reports_price_and_stock_drift() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let shop = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let mug = app.seed_product(shop.id, "Mug", dec!(10), dec!(0), 10).await;
    let user = Uuid::new_v4();

    carts.add_item(app.db(), user, shop.id, mug.id, 5, None).await.unwrap();
    assert!(carts.validate_cart(app.db(), user, shop.id).await.unwrap().valid);

    let mut changed: product::ActiveModel = app.product(mug.id).await.into();
    changed.price = Set(dec!(12));
    changed.stock_quantity = Set(3);
    changed.update(app.db()).await.unwrap();

    let validation = carts.validate_cart(app.db(), user, shop.id).await.unwrap();
    assert!(!validation.valid);
    let issues: Vec<CartIssue> = validation.errors.iter().map(|e| e.issue).collect();
    assert!(issues.contains(&CartIssue::InsufficientStock));
    assert!(issues.contains(&CartIssue::PriceChanged));

    assert_eq!(validation.updated_items.len(), 1);
    let corrected = &validation.updated_items[0];
    assert_eq!(corrected.quantity, 3);
    assert_eq!(corrected.unit_price, dec!(12));
    assert_eq!(corrected.subtotal, dec!(36));

    // Validation never rewrites the cart.
    let view = carts.get_cart(app.db(), user, shop.id).await.unwrap();
    assert_eq!(view.items[0].quantity, 5);
    assert_eq!(view.items[0].unit_price, dec!(10));
}

#[tokio::test]
async fn validate_flags_inactive_products() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let shop = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let mug = app.seed_product(shop.id, "Mug", dec!(10), dec!(0), 10).await;
    let user = Uuid::new_v4();
    carts.add_item(app.db(), user, shop.id, mug.id, 1, None).await.unwrap();

    let mut retired: product::ActiveModel = app.product(mug.id).await.into();
    retired.is_active = Set(false);
    retired.update(app.db()).await.unwrap();

    let validation = carts.validate_cart(app.db(), user, shop.id).await.unwrap();
    assert!(!validation.valid);
    assert_eq!(validation.errors[0].issue, CartIssue::Unavailable);
    assert_eq!(validation.updated_items[0].quantity, 0);
}

#[tokio::test]
async fn merge_sums_and_caps_at_stock() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let shop = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let mug = app.seed_product(shop.id, "Mug", dec!(5), dec!(0), 6).await;
    let bowl = app.seed_product(shop.id, "Bowl", dec!(8), dec!(0), 0).await;
    let user = Uuid::new_v4();

    carts.add_item(app.db(), user, shop.id, mug.id, 4, None).await.unwrap();
    let view = carts
        .merge_carts(
            app.db(),
            user,
            shop.id,
            &[
                IncomingCartItem {
                    product_id: mug.id,
                    quantity: 5,
                    variant_index: None,
                },
                IncomingCartItem {
                    product_id: bowl.id,
                    quantity: 1,
                    variant_index: None,
                },
            ],
        )
        .await
        .unwrap();

    // The out-of-stock bowl is dropped and the mug line is capped at six.
    assert_eq!(view.items.len(), 1);
    assert_eq!(view.items[0].product_id, mug.id);
    assert_eq!(view.items[0].quantity, 6);
}

#[tokio::test]
async fn merge_rejects_foreign_products_wholesale() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let mugs = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let hats = app.seed_shop("hats", Uuid::new_v4(), true).await;
    let mug = app.seed_product(mugs.id, "Mug", dec!(5), dec!(0), 6).await;
    let hat = app.seed_product(hats.id, "Hat", dec!(9), dec!(0), 6).await;
    let user = Uuid::new_v4();

    let err = carts
        .merge_carts(
            app.db(),
            user,
            mugs.id,
            &[
                IncomingCartItem {
                    product_id: mug.id,
                    quantity: 1,
                    variant_index: None,
                },
                IncomingCartItem {
                    product_id: hat.id,
                    quantity: 1,
                    variant_index: None,
                },
            ],
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert!(carts.get_cart(app.db(), user, mugs.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_first_adds_share_one_line() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let shop = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let mug = app.seed_product(shop.id, "Mug", dec!(5), dec!(0), 10).await;
    let user = Uuid::new_v4();

    let results = join_all(
        (0..2).map(|_| carts.add_item(app.db(), user, shop.id, mug.id, 1, None)),
    )
    .await;
    assert!(results.iter().all(|r| r.is_ok()));

    let lines = cart_item::Entity::find().all(app.db()).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].variant_key, cart_item::NO_VARIANT);
}

#[tokio::test]
async fn duplicate_lines_are_rejected_by_the_schema() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let shop = app.seed_shop("mugs", Uuid::new_v4(), true).await;
    let mug = app.seed_product(shop.id, "Mug", dec!(5), dec!(0), 10).await;
    let user = Uuid::new_v4();
    let view = carts.add_item(app.db(), user, shop.id, mug.id, 1, None).await.unwrap();

    let now = Utc::now();
    let duplicate = cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        cart_id: Set(view.cart_id.unwrap()),
        product_id: Set(mug.id),
        variant_index: Set(None),
        variant_key: Set(cart_item::variant_key(None)),
        quantity: Set(1),
        unit_price: Set(dec!(5)),
        discount: Set(dec!(0)),
        subtotal: Set(dec!(5)),
        created_at: Set(now),
        updated_at: Set(now),
    };
    assert!(duplicate.insert(app.db()).await.is_err());
}

#[tokio::test]
async fn three_decimal_currencies_keep_their_precision() {
    let app = TestApp::new().await;
    let carts = &app.state.services.carts;
    let shop = app.seed_shop_in("souq", Uuid::new_v4(), true, "KWD").await;
    let dates = app
        .seed_product(shop.id, "Dates", dec!(12.345), dec!(0), 10)
        .await;
    let user = Uuid::new_v4();

    let view = carts
        .add_item(app.db(), user, shop.id, dates.id, 1, None)
        .await
        .unwrap();
    assert_eq!(view.items[0].subtotal, dec!(12.345));
    assert_eq!(view.total, dec!(12.345));
    assert!(carts.validate_cart(app.db(), user, shop.id).await.unwrap().valid);
}
