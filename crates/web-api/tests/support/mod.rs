use std::{net::SocketAddr, sync::Arc, time::Duration as StdDuration};

use application::object_storage::memory::MemoryObjectStorage;
use application::presence::memory::MemoryPresenceStore;
use application::{
    BroadcastRouter, ChannelService, ChannelServiceDependencies, ChatService,
    ChatServiceDependencies, ChatSettings, InMemoryConversationStore, LocalEventHub,
    PresencePolicy, PresenceTracker, RateLimitPolicy, SlidingWindowRateLimiter, SystemClock,
    UploadPolicy, UploadService, UploadServiceDependencies,
};
use domain::{TenantId, TenantRole, TenantUser, UserId};
use tokio::{net::TcpListener, sync::oneshot};
use web_api::{router, AppState, JwtConfig, JwtService};

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<InMemoryConversationStore>,
    pub jwt: Arc<JwtService>,
    shutdown: Option<oneshot::Sender<()>>,
}

pub struct TestUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub token: String,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with_rate_limit(1000).await
    }

    pub async fn start_with_rate_limit(max_events: u32) -> Self {
        let store = Arc::new(InMemoryConversationStore::new());
        let clock = Arc::new(SystemClock);
        let hub = Arc::new(LocalEventHub::new(256));
        let broadcaster = BroadcastRouter::new(hub.clone(), clock.clone());

        let chat_service = ChatService::new(ChatServiceDependencies {
            store: store.clone(),
            rate_limiter: Arc::new(SlidingWindowRateLimiter::new(RateLimitPolicy::new(
                StdDuration::from_secs(60),
                max_events,
            ))),
            broadcaster: broadcaster.clone(),
            clock: clock.clone(),
            settings: ChatSettings::default(),
        });
        let channel_service = ChannelService::new(ChannelServiceDependencies {
            store: store.clone(),
            broadcaster: broadcaster.clone(),
            clock: clock.clone(),
        });
        let upload_service = UploadService::new(UploadServiceDependencies {
            store: store.clone(),
            storage: Arc::new(MemoryObjectStorage::new("/files")),
            clock: clock.clone(),
            policy: UploadPolicy {
                max_bytes: 1024,
                allowed_mime_types: ["text/plain".to_string()].into_iter().collect(),
            },
        });
        let presence = PresenceTracker::new(
            Arc::new(MemoryPresenceStore::new()),
            clock,
            PresencePolicy {
                online_window: chrono::Duration::seconds(60),
                expiry: chrono::Duration::seconds(300),
                max_query_ids: 100,
            },
        );
        let jwt = Arc::new(JwtService::new(JwtConfig {
            secret: "integration-test-secret-0123456789".to_string(),
            expiration_hours: 1,
        }));

        let state = AppState::new(
            Arc::new(chat_service),
            Arc::new(channel_service),
            Arc::new(upload_service),
            Arc::new(presence),
            broadcaster,
            hub,
            jwt.clone(),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            store,
            jwt,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/api/v1{}", self.addr, path)
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/api/v1/ws?token={}", self.addr, token)
    }

    pub async fn user(&self, tenant_id: TenantId, name: &str) -> TestUser {
        self.user_with_role(tenant_id, name, TenantRole::Member).await
    }

    pub async fn user_with_role(&self, tenant_id: TenantId, name: &str, role: TenantRole) -> TestUser {
        let user_id = UserId::generate();
        self.store
            .add_tenant_user(TenantUser {
                tenant_id,
                user_id,
                display_name: name.to_owned(),
                role,
            })
            .await;
        let token = self
            .jwt
            .generate_token(tenant_id, user_id, role)
            .expect("token");
        TestUser {
            tenant_id,
            user_id,
            token,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
