// Money arithmetic
pub mod pricing;

// Inventory bookkeeping
pub mod stock_ledger;

// Carts and orders
pub mod cart_service;
pub mod orders;
pub mod shops;

// Payment flows
pub mod checkout_service;
pub mod reconciliation;
