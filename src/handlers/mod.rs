pub mod carts;
pub mod checkout;
pub mod common;
pub mod coupons;
pub mod orders;
