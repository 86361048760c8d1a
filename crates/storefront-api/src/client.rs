//! The assembled client: session lifecycle plus the cart and wishlist
//! stores, wired so a session loss clears every client-held collection.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::watch;

use storefront_client_core::{
    ApiError, ApiRequest, ApiTransport, ClientConfig, Identity, Session, SessionCoordinator,
};

use crate::cart::CartStore;
use crate::dto::{LoginResponse, decode};
use crate::http::HttpTransport;
use crate::paths;
use crate::wishlist::WishlistStore;

pub struct StorefrontClient {
    coordinator: SessionCoordinator,
    transport: Arc<dyn ApiTransport>,
    cart: CartStore,
    wishlist: WishlistStore,
}

impl StorefrontClient {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Build against any transport. This is also the test seam.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn ApiTransport>) -> Self {
        let coordinator = SessionCoordinator::new(
            Arc::clone(&transport),
            &config,
            ApiRequest::get(paths::USER_PROFILE),
        );
        let cart = CartStore::new(coordinator.clone(), &config);
        let wishlist = WishlistStore::new(coordinator.clone());
        let client = Self {
            coordinator,
            transport,
            cart,
            wishlist,
        };
        client.spawn_session_watcher();
        client
    }

    /// Collections are cleared whenever the session ends, whether by user
    /// logout or by a terminal renewal failure inside the coordinator.
    fn spawn_session_watcher(&self) {
        let mut session_rx = self.coordinator.session_watch();
        let cart = self.cart.clone();
        let wishlist = self.wishlist.clone();
        tokio::spawn(async move {
            while session_rx.changed().await.is_ok() {
                let authenticated = session_rx.borrow_and_update().authenticated;
                if !authenticated {
                    cart.discard().await;
                    wishlist.discard().await;
                    tracing::debug!("client collections cleared after session end");
                }
            }
        });
    }

    #[must_use]
    pub fn cart(&self) -> &CartStore {
        &self.cart
    }

    #[must_use]
    pub fn wishlist(&self) -> &WishlistStore {
        &self.wishlist
    }

    #[must_use]
    pub fn session_watch(&self) -> watch::Receiver<Session> {
        self.coordinator.session_watch()
    }

    pub async fn session(&self) -> Session {
        self.coordinator.session().await
    }

    /// Startup probe: ask for the profile through the coordinator, so a
    /// still-valid refresh cookie silently renews an expired access
    /// credential. An auth failure just means "not signed in".
    pub async fn bootstrap(&self) -> Result<Option<Identity>, ApiError> {
        match self
            .coordinator
            .call(ApiRequest::get(paths::USER_PROFILE))
            .await
        {
            Ok(response) => {
                let identity: Identity = decode(response.body)?;
                self.coordinator.establish(identity.clone()).await;
                Ok(Some(identity))
            }
            Err(ApiError::Unauthorized | ApiError::SessionExpired { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Authenticate and start the proactive renewal loop. Credentials land
    /// in HTTP-only cookies; the client only keeps the identity snapshot.
    /// A 401 here is a credential mismatch, not a renewable failure, so the
    /// call goes straight to the transport.
    pub async fn login(&self, email: &str, password: &str) -> Result<Identity, ApiError> {
        let request = ApiRequest::post(
            paths::USER_LOGIN,
            json!({"email": email, "password": password}),
        );
        let response = self.transport.send(&request).await?;
        let login: LoginResponse = decode(response.body)?;
        self.coordinator.establish(login.user.clone()).await;
        Ok(login.user)
    }

    /// Returns the activation notice when the account still needs email
    /// confirmation before credentials are issued.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<Option<String>, ApiError> {
        let request = ApiRequest::post(
            paths::USER_REGISTER,
            json!({"username": username, "email": email, "password": password}),
        );
        let response = self.transport.send(&request).await?;
        Ok(response
            .body
            .get("detail")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Invalidate the refresh credential server-side and clear all local
    /// state. Local state clears even when the server call fails.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let outcome = self
            .coordinator
            .call(ApiRequest::post(paths::USER_LOGOUT, json!({})))
            .await;
        self.coordinator.logout().await;
        self.cart.discard().await;
        self.wishlist.discard().await;
        outcome.map(|_| ())
    }
}
