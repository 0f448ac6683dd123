//! Integration test harness for the Price Feed API.
//!
//! Each test spawns its own server in-process on an ephemeral port, so tests
//! run in parallel without sharing state. The scheduler loop is not started;
//! tests drive ticks explicitly through [`TestServer::tick`].

use feed_client::{ClientConfig, FeedClient, WsClient};
use price_feed_backend::api::build_app;
use price_feed_backend::auth::{Claims, UserRole};
use price_feed_backend::config::Config;
use price_feed_backend::simulation::{FixedShock, PriceShock, TickReport};
use price_feed_backend::state::AppState;
use rust_decimal_macros::dec;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// How long helpers wait for the server to reach an expected state.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A running server plus direct access to its state.
pub struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Starts a server with the default configuration and a `+0.5%` shock.
    pub async fn spawn() -> Self {
        Self::spawn_with(test_config(), Box::new(FixedShock::new(dec!(0.005)))).await
    }

    /// Starts a server with a custom configuration and shock source.
    pub async fn spawn_with(config: Config, shock: Box<dyn PriceShock>) -> Self {
        let state = Arc::new(AppState::with_shock(config, shock));
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().expect("listener has no local address");

        let app = build_app(Arc::clone(&state));
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server failed");
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    /// Base HTTP URL.
    #[must_use]
    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket endpoint URL.
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Server state.
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// HTTP client pointed at this server.
    pub fn client(&self) -> FeedClient {
        FeedClient::new(ClientConfig {
            base_url: self.http_url(),
            timeout: Duration::from_secs(10),
        })
        .expect("failed to build client")
    }

    /// Opens a WebSocket authenticated as `user_id` via the query string.
    pub async fn connect_as(&self, user_id: &str) -> WsClient {
        let token = self.token_for(user_id);
        WsClient::connect(&self.ws_url(), Some(&token))
            .await
            .expect("failed to connect")
    }

    /// A valid token for a seeded user.
    #[must_use]
    pub fn token_for(&self, user_id: &str) -> String {
        self.state
            .authenticator
            .verifier()
            .issue(user_id, &format!("{user_id}@financial-pipeline.com"), UserRole::User)
            .expect("failed to issue token")
    }

    /// A correctly signed token that expired an hour ago.
    #[must_use]
    pub fn expired_token_for(&self, user_id: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: user_id.to_string(),
            email: format!("{user_id}@financial-pipeline.com"),
            role: UserRole::User,
            iat: now - 7200,
            exp: now - 3600,
        };
        self.state
            .authenticator
            .verifier()
            .sign(&claims)
            .expect("failed to sign token")
    }

    /// Runs one scheduler tick.
    pub async fn tick(&self) -> TickReport {
        self.state
            .scheduler
            .run_tick()
            .await
            .expect("tick failed")
    }

    /// Waits until `room` has exactly `count` members.
    pub async fn wait_for_members(&self, room: &str, count: usize) {
        let registry = Arc::clone(&self.state.registry);
        wait_until(|| registry.member_count(room) == count)
            .await
            .unwrap_or_else(|_| {
                panic!(
                    "room {room} has {} members, expected {count}",
                    registry.member_count(room)
                )
            });
    }

    /// Waits until exactly `count` connections are registered.
    pub async fn wait_for_connections(&self, count: usize) {
        let registry = Arc::clone(&self.state.registry);
        wait_until(|| registry.connection_count() == count)
            .await
            .unwrap_or_else(|_| {
                panic!(
                    "{} connections registered, expected {count}",
                    registry.connection_count()
                )
            });
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Default configuration with the scheduler loop disabled.
#[must_use]
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.scheduler.enabled = false;
    config.auth.jwt_secret = "integration-test-secret".to_string();
    config
}

/// Polls `condition` until it holds or [`WAIT_TIMEOUT`] elapses.
///
/// # Errors
/// Returns the elapsed error if the condition never held.
pub async fn wait_until<F>(mut condition: F) -> Result<(), tokio::time::error::Elapsed>
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(WAIT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}
