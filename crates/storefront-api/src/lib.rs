//! Typed client for the storefront marketplace API.
//!
//! Every authenticated call is routed through the session coordinator in
//! `storefront-client-core`; cart and wishlist state lives in the
//! optimistic stores from `storefront-app-state`.

pub mod cart;
pub mod client;
pub mod dto;
pub mod http;
pub mod paths;
pub mod wishlist;

pub use cart::CartStore;
pub use client::StorefrontClient;
pub use dto::{CartLine, LoginResponse, ProductSummary, WishlistEntry};
pub use http::HttpTransport;
pub use wishlist::WishlistStore;
