//! Exact paths of the consumed HTTP surface.

pub const USER_LOGIN: &str = "/user/login/";
pub const USER_LOGOUT: &str = "/user/logout/";
pub const USER_REGISTER: &str = "/user/register/";
pub const USER_PROFILE: &str = "/user/profile/";
pub const TOKEN_REFRESH: &str = "/api/token/refresh/";

pub const CARTS: &str = "/carts/";
pub const CARTS_ADD: &str = "/carts/add/";

pub const WISHLISTS: &str = "/wishlists/";
pub const WISHLISTS_ADD: &str = "/wishlists/add/";

#[must_use]
pub fn cart_item(product_id: u64) -> String {
    format!("/carts/{product_id}/")
}

#[must_use]
pub fn cart_item_delete(product_id: u64) -> String {
    format!("/carts/delete/{product_id}/")
}

#[must_use]
pub fn wishlist_item_delete(product_id: u64) -> String {
    format!("/wishlists/delete/{product_id}/")
}
