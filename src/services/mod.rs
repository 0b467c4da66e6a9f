pub mod carts;
pub mod checkout;
pub mod coupons;
pub mod gateways;
pub mod order_numbers;
pub mod orders;

pub use carts::CartService;
pub use checkout::CheckoutService;
pub use coupons::CouponService;
pub use orders::OrderService;
