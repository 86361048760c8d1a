//! Session coordinator: single-flight credential renewal with a FIFO replay
//! queue, plus the proactive background renewal loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::session::{Identity, Session};
use crate::transport::{ApiRequest, ApiResponse, ApiTransport};

/// At most one renewal in flight at any time. Unauthorized failures observed
/// while `Renewing` enqueue instead of starting a second renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenewalState {
    Idle,
    Renewing,
}

/// A queued unit of work awaiting renewal completion. Destroyed once
/// replayed: the renewal winner reissues `request` and routes the outcome
/// back through `tx`.
struct PendingRequest {
    request: ApiRequest,
    tx: oneshot::Sender<Result<ApiResponse, ApiError>>,
}

struct CoordinatorState {
    session: Session,
    /// Bumped whenever the session is cleared. Calls begun under an older
    /// epoch resolve as [`ApiError::Stale`] and their results are discarded.
    epoch: u64,
    renewal: RenewalState,
    queue: VecDeque<PendingRequest>,
    probe_task: Option<JoinHandle<()>>,
}

struct CoordinatorInner {
    transport: Arc<dyn ApiTransport>,
    state: Mutex<CoordinatorState>,
    session_tx: watch::Sender<Session>,
    renewal_interval: Duration,
    probe: ApiRequest,
}

/// Wraps every authenticated call; on a 401 it renews credentials at most
/// once per failure episode and replays every blocked request in submission
/// order. Owns the session: nothing else writes it.
#[derive(Clone)]
pub struct SessionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl SessionCoordinator {
    /// `probe` is the lightweight authenticated request the proactive loop
    /// issues on each tick (the profile snapshot in production).
    pub fn new(transport: Arc<dyn ApiTransport>, config: &ClientConfig, probe: ApiRequest) -> Self {
        let (session_tx, _) = watch::channel(Session::anonymous());
        Self {
            inner: Arc::new(CoordinatorInner {
                transport,
                state: Mutex::new(CoordinatorState {
                    session: Session::anonymous(),
                    epoch: 0,
                    renewal: RenewalState::Idle,
                    queue: VecDeque::new(),
                    probe_task: None,
                }),
                session_tx,
                renewal_interval: config.renewal_interval,
                probe,
            }),
        }
    }

    /// Observe session changes. The receiver starts at the current value.
    #[must_use]
    pub fn session_watch(&self) -> watch::Receiver<Session> {
        self.inner.session_tx.subscribe()
    }

    pub async fn session(&self) -> Session {
        self.inner.state.lock().await.session.clone()
    }

    /// Issue `request`, transparently renewing credentials and retrying once
    /// on a 401. Behaves exactly like calling the transport directly in
    /// every other respect.
    pub async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let epoch = self.inner.state.lock().await.epoch;
        let outcome = match self.inner.transport.send(&request).await {
            Err(ApiError::Unauthorized) => self.recover_unauthorized(request).await,
            other => other,
        };
        self.guard_epoch(epoch, outcome).await
    }

    /// Record a fresh authenticated session and (re)start the proactive
    /// renewal loop.
    pub async fn establish(&self, identity: Identity) {
        let mut state = self.inner.state.lock().await;
        state.session = Session::authenticated(identity);
        if let Some(task) = state.probe_task.take() {
            task.abort();
        }
        state.probe_task = Some(self.spawn_probe_loop());
        self.inner.session_tx.send_replace(state.session.clone());
        tracing::debug!("session established");
    }

    /// Clear the session, stop the proactive loop, and invalidate in-flight
    /// results. Server-side invalidation is the caller's concern.
    pub async fn logout(&self) {
        let mut state = self.inner.state.lock().await;
        Self::clear_session_locked(&self.inner, &mut state);
        tracing::debug!("session cleared");
    }

    async fn recover_unauthorized(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let waiter = {
            let mut state = self.inner.state.lock().await;
            match state.renewal {
                RenewalState::Renewing => {
                    let (tx, rx) = oneshot::channel();
                    state.queue.push_back(PendingRequest {
                        request: request.clone(),
                        tx,
                    });
                    Some(rx)
                }
                RenewalState::Idle => {
                    state.renewal = RenewalState::Renewing;
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            return match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(ApiError::SessionExpired {
                    reason: "renewal episode ended without replay".to_string(),
                }),
            };
        }

        // This task owns the renewal episode. The renewal call goes straight
        // to the transport: it must never be routed back through `call`, or
        // its own 401 would recurse into another episode.
        tracing::debug!(path = %request.path, "credential renewal started");
        match self.inner.transport.renew_credentials().await {
            Ok(()) => {
                let queued = self.close_renewal().await;
                tracing::debug!(queued = queued.len(), "credential renewal succeeded");
                // Replay the triggering request first. If it comes back 401
                // again the credential is still rejected; surface it without
                // opening a second episode.
                let outcome = self.inner.transport.send(&request).await;
                self.spawn_replays(queued);
                outcome
            }
            Err(error) => {
                tracing::warn!(error = %error, "credential renewal failed");
                let failure = ApiError::SessionExpired {
                    reason: error.to_string(),
                };
                let queued = self.close_renewal().await;
                for pending in queued {
                    let _ = pending.tx.send(Err(failure.clone()));
                }
                self.force_logout().await;
                Err(failure)
            }
        }
    }

    async fn close_renewal(&self) -> VecDeque<PendingRequest> {
        let mut state = self.inner.state.lock().await;
        state.renewal = RenewalState::Idle;
        std::mem::take(&mut state.queue)
    }

    /// Reissue queued requests in strict FIFO enqueue order, each resolving
    /// its own caller independently. A replay that 401s again is rejected
    /// as-is; the queued request already consumed its one retry.
    fn spawn_replays(&self, queued: VecDeque<PendingRequest>) {
        if queued.is_empty() {
            return;
        }
        let transport = Arc::clone(&self.inner.transport);
        tokio::spawn(async move {
            for pending in queued {
                let outcome = transport.send(&pending.request).await;
                let _ = pending.tx.send(outcome);
            }
        });
    }

    /// Terminal renewal failure clears the session only when one was
    /// actually held; an anonymous client stays anonymous.
    async fn force_logout(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.session.authenticated {
            return;
        }
        Self::clear_session_locked(&self.inner, &mut state);
        tracing::warn!("session expired, forced logout");
    }

    fn clear_session_locked(inner: &CoordinatorInner, state: &mut CoordinatorState) {
        state.session = Session::anonymous();
        state.epoch += 1;
        if let Some(task) = state.probe_task.take() {
            task.abort();
        }
        inner.session_tx.send_replace(state.session.clone());
    }

    /// Success payloads that resolve after the session they were issued
    /// under ended are discarded, never applied. Failures pass through: a
    /// terminal renewal failure bumps the epoch itself and must still reach
    /// every caller as the renewal's failure.
    async fn guard_epoch(
        &self,
        epoch: u64,
        outcome: Result<ApiResponse, ApiError>,
    ) -> Result<ApiResponse, ApiError> {
        let state = self.inner.state.lock().await;
        if state.epoch != epoch && outcome.is_ok() {
            tracing::debug!("discarding result that resolved after logout");
            return Err(ApiError::Stale);
        }
        outcome
    }

    fn spawn_probe_loop(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let period = self.inner.renewal_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // An interval's first tick completes immediately; the session
            // was just established, so skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let probe = coordinator.inner.probe.clone();
                match coordinator.call(probe).await {
                    Ok(_) => tracing::debug!("session probe ok"),
                    // A probe failure on its own never forces logout; a
                    // genuinely expired credential already went through the
                    // coordinated renewal path above.
                    Err(error) => tracing::warn!(error = %error, "session probe failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    /// Transport that rejects every send with a 401 until a renewal
    /// succeeds, recording submission order.
    struct FakeTransport {
        authorized: AtomicBool,
        renew_outcome: Result<(), ApiError>,
        renew_grants_access: bool,
        renewals: AtomicUsize,
        renew_gate: tokio::sync::Semaphore,
        log: std::sync::Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                authorized: AtomicBool::new(false),
                renew_outcome: Ok(()),
                renew_grants_access: true,
                renewals: AtomicUsize::new(0),
                renew_gate: tokio::sync::Semaphore::new(usize::MAX >> 4),
                log: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn gated() -> Arc<Self> {
            let transport = Self::new();
            let _ = transport.renew_gate.forget_permits(usize::MAX >> 4);
            transport
        }

        fn failing_renewal() -> Arc<Self> {
            Arc::new(Self {
                authorized: AtomicBool::new(false),
                renew_outcome: Err(ApiError::Unauthorized),
                renew_grants_access: false,
                renewals: AtomicUsize::new(0),
                renew_gate: tokio::sync::Semaphore::new(usize::MAX >> 4),
                log: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn stubborn_401() -> Arc<Self> {
            Arc::new(Self {
                authorized: AtomicBool::new(false),
                renew_outcome: Ok(()),
                renew_grants_access: false,
                renewals: AtomicUsize::new(0),
                renew_gate: tokio::sync::Semaphore::new(usize::MAX >> 4),
                log: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<String> {
            self.log.lock().expect("log lock").clone()
        }
    }

    #[async_trait::async_trait]
    impl ApiTransport for FakeTransport {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
            self.log
                .lock()
                .expect("log lock")
                .push(request.path.clone());
            if self.authorized.load(Ordering::SeqCst) {
                Ok(ApiResponse {
                    status: 200,
                    body: json!({"path": request.path}),
                })
            } else {
                Err(ApiError::Unauthorized)
            }
        }

        async fn renew_credentials(&self) -> Result<(), ApiError> {
            self.renewals.fetch_add(1, Ordering::SeqCst);
            let permit = self.renew_gate.acquire().await.expect("gate open");
            permit.forget();
            if self.renew_grants_access {
                self.authorized.store(true, Ordering::SeqCst);
            }
            self.renew_outcome.clone()
        }
    }

    fn config() -> ClientConfig {
        ClientConfig::new("http://127.0.0.1:8000").expect("config")
    }

    fn probe() -> ApiRequest {
        ApiRequest::get("/user/profile/")
    }

    fn identity() -> Identity {
        Identity {
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            first_name: None,
            last_name: None,
        }
    }

    #[tokio::test]
    async fn unauthorized_call_renews_once_and_replays() {
        let transport = FakeTransport::new();
        let coordinator = SessionCoordinator::new(transport.clone(), &config(), probe());

        let response = coordinator
            .call(ApiRequest::get("/carts/"))
            .await
            .expect("replayed call succeeds");
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({"path": "/carts/"}));
        assert_eq!(transport.renewals.load(Ordering::SeqCst), 1);
        assert_eq!(transport.sent(), vec!["/carts/", "/carts/"]);
    }

    #[tokio::test]
    async fn concurrent_401s_share_one_renewal_and_replay_in_order() {
        let transport = FakeTransport::gated();
        let coordinator = SessionCoordinator::new(transport.clone(), &config(), probe());

        let leader = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.call(ApiRequest::get("/carts/")).await })
        };
        // Let the leader fail its first send and start the renewal.
        while transport.renewals.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let mut followers = Vec::new();
        for index in 0..3 {
            let coordinator = coordinator.clone();
            let path = format!("/wishlists/{index}/");
            followers.push(tokio::spawn(
                async move { coordinator.call(ApiRequest::get(path)).await },
            ));
            // Force each follower through its first 401 so enqueue order is
            // the submission order.
            for _ in 0..8 {
                tokio::task::yield_now().await;
            }
        }

        transport.renew_gate.add_permits(1);

        let leader_response = leader
            .await
            .expect("leader task")
            .expect("leader call succeeds");
        assert_eq!(leader_response.body, json!({"path": "/carts/"}));
        for (index, follower) in followers.into_iter().enumerate() {
            let response = follower
                .await
                .expect("follower task")
                .expect("follower call succeeds");
            assert_eq!(
                response.body,
                json!({"path": format!("/wishlists/{index}/")})
            );
        }

        assert_eq!(transport.renewals.load(Ordering::SeqCst), 1);
        let sent = transport.sent();
        // First-failure order: leader, then followers in submission order.
        assert_eq!(
            &sent[..4],
            &["/carts/", "/wishlists/0/", "/wishlists/1/", "/wishlists/2/"]
        );
        // Replays: triggering request first, then the FIFO queue.
        assert_eq!(
            &sent[4..],
            &["/carts/", "/wishlists/0/", "/wishlists/1/", "/wishlists/2/"]
        );
    }

    #[tokio::test]
    async fn renewal_failure_rejects_queue_and_forces_logout() {
        let transport = FakeTransport::failing_renewal();
        let coordinator = SessionCoordinator::new(transport.clone(), &config(), probe());
        coordinator.establish(identity()).await;
        let mut session_rx = coordinator.session_watch();

        let error = coordinator
            .call(ApiRequest::get("/carts/"))
            .await
            .expect_err("renewal failure surfaces");
        assert!(matches!(error, ApiError::SessionExpired { .. }));
        assert_eq!(transport.renewals.load(Ordering::SeqCst), 1);

        session_rx.changed().await.expect("session change");
        let session = session_rx.borrow().clone();
        assert!(!session.authenticated);
        assert!(session.identity.is_none());
    }

    #[tokio::test]
    async fn renewal_failure_without_session_does_not_logout_twice() {
        let transport = FakeTransport::failing_renewal();
        let coordinator = SessionCoordinator::new(transport.clone(), &config(), probe());

        let error = coordinator
            .call(ApiRequest::get("/carts/"))
            .await
            .expect_err("renewal failure surfaces");
        assert!(matches!(error, ApiError::SessionExpired { .. }));
        // Anonymous before, anonymous after; the epoch did not move, so the
        // failure is not reported as stale.
        assert!(!coordinator.session().await.authenticated);
    }

    #[tokio::test]
    async fn replayed_request_is_not_retried_a_second_time() {
        let transport = FakeTransport::stubborn_401();
        let coordinator = SessionCoordinator::new(transport.clone(), &config(), probe());

        let error = coordinator
            .call(ApiRequest::get("/carts/"))
            .await
            .expect_err("still unauthorized after renewal");
        assert_eq!(error, ApiError::Unauthorized);
        assert_eq!(transport.renewals.load(Ordering::SeqCst), 1);
        assert_eq!(transport.sent(), vec!["/carts/", "/carts/"]);
    }

    #[tokio::test]
    async fn non_auth_failures_do_not_trigger_renewal() {
        struct RejectingTransport {
            renewals: AtomicUsize,
        }

        #[async_trait::async_trait]
        impl ApiTransport for RejectingTransport {
            async fn send(&self, _request: &ApiRequest) -> Result<ApiResponse, ApiError> {
                Err(ApiError::Rejected {
                    status: 400,
                    message: "quantity must be between 1 and 20".to_string(),
                })
            }

            async fn renew_credentials(&self) -> Result<(), ApiError> {
                self.renewals.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let transport = Arc::new(RejectingTransport {
            renewals: AtomicUsize::new(0),
        });
        let coordinator = SessionCoordinator::new(transport.clone(), &config(), probe());
        let error = coordinator
            .call(ApiRequest::patch("/carts/5/", json!({"quantity": 30})))
            .await
            .expect_err("rejection surfaces");
        assert!(matches!(error, ApiError::Rejected { status: 400, .. }));
        assert_eq!(transport.renewals.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn proactive_loop_probes_on_interval_and_stops_on_logout() {
        let transport = FakeTransport::new();
        transport.authorized.store(true, Ordering::SeqCst);
        let mut config = config();
        config.renewal_interval = Duration::from_secs(600);
        let coordinator = SessionCoordinator::new(transport.clone(), &config, probe());
        coordinator.establish(identity()).await;

        tokio::time::sleep(Duration::from_secs(601)).await;
        assert_eq!(transport.sent(), vec!["/user/profile/"]);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(transport.sent().len(), 2);

        coordinator.logout().await;
        tokio::time::sleep(Duration::from_secs(1800)).await;
        assert_eq!(transport.sent().len(), 2, "probe loop must stop on logout");
    }

    #[tokio::test]
    async fn results_resolving_after_logout_are_stale() {
        struct SlowTransport {
            release: tokio::sync::Semaphore,
        }

        #[async_trait::async_trait]
        impl ApiTransport for SlowTransport {
            async fn send(&self, _request: &ApiRequest) -> Result<ApiResponse, ApiError> {
                let permit = self.release.acquire().await.expect("release gate");
                permit.forget();
                Ok(ApiResponse {
                    status: 200,
                    body: json!([]),
                })
            }

            async fn renew_credentials(&self) -> Result<(), ApiError> {
                Ok(())
            }
        }

        let transport = Arc::new(SlowTransport {
            release: tokio::sync::Semaphore::new(0),
        });
        let coordinator = SessionCoordinator::new(transport.clone(), &config(), probe());
        coordinator.establish(identity()).await;

        let call = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.call(ApiRequest::get("/carts/")).await })
        };
        tokio::task::yield_now().await;

        coordinator.logout().await;
        transport.release.add_permits(1);

        let outcome = call.await.expect("call task");
        assert_eq!(outcome, Err(ApiError::Stale));
    }
}
