//! 主应用程序入口
//!
//! 加载配置、装配适配器和应用服务，启动 Axum Web API 以及后台清理任务。

mod tasks;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use application::{
    BroadcastRouter, ChannelService, ChannelServiceDependencies, ChatService,
    ChatServiceDependencies, ChatSettings, Clock, PresencePolicy, PresenceTracker, SystemClock,
    UploadPolicy, UploadService, UploadServiceDependencies,
};
use config::AppConfig;
use infrastructure::Infrastructure;
use tokio::sync::watch;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("加载配置失败")?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        "配置已加载"
    );

    let infra = Infrastructure::connect(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let broadcaster = BroadcastRouter::new(infra.publisher.clone(), clock.clone());

    let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
        store: infra.store.clone(),
        rate_limiter: infra.rate_limiter.clone(),
        broadcaster: broadcaster.clone(),
        clock: clock.clone(),
        settings: ChatSettings::from(&config.chat),
    }));
    let channel_service = Arc::new(ChannelService::new(ChannelServiceDependencies {
        store: infra.store.clone(),
        broadcaster: broadcaster.clone(),
        clock: clock.clone(),
    }));
    let upload_service = Arc::new(UploadService::new(UploadServiceDependencies {
        store: infra.store.clone(),
        storage: infra.object_storage.clone(),
        clock: clock.clone(),
        policy: UploadPolicy::from(&config.uploads),
    }));
    let presence = Arc::new(PresenceTracker::new(
        infra.presence_store.clone(),
        clock,
        PresencePolicy::from(&config.presence),
    ));
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();
    if let Some(relay) = infra.relay.clone() {
        background.push(relay.spawn(shutdown_rx.clone()));
    }
    background.push(tasks::spawn_presence_sweeper(
        presence.clone(),
        broadcaster.clone(),
        config.presence.sweep_interval_secs,
        shutdown_rx.clone(),
    ));
    background.push(tasks::spawn_rate_limit_cleanup(
        infra.rate_limiter.clone(),
        config.rate_limit.window_ms,
        shutdown_rx.clone(),
    ));
    if chat_service.retention_cutoff().is_some() {
        background.push(tasks::spawn_retention_sweeper(
            chat_service.clone(),
            config.chat.retention_sweep_secs,
            shutdown_rx.clone(),
        ));
    }

    let state = AppState::new(
        chat_service,
        channel_service,
        upload_service,
        presence,
        broadcaster,
        infra.hub.clone(),
        jwt_service,
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let mut app = router(state);
    // 外部 CDN 地址时由 CDN 提供下载
    if serves_uploads_locally(&config.uploads.public_base_url) {
        app = app.nest_service(
            &config.uploads.public_base_url,
            ServeDir::new(&config.uploads.dir),
        );
    }
    let app = app.layer(TraceLayer::new_for_http()).layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("无效的监听地址")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("聊天服务启动在 http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("开始优雅停机...");
    let _ = shutdown_tx.send(true);
    for handle in background {
        let _ = handle.await;
    }
    info!("聊天服务已停止");
    Ok(())
}

fn serves_uploads_locally(public_base_url: &str) -> bool {
    public_base_url.starts_with('/') && public_base_url.len() > 1
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "监听 Ctrl+C 失败");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!(error = %err, "监听终止信号失败"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("接收到 Ctrl+C 信号"),
        _ = terminate => info!("接收到终止信号"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_relative_upload_urls_are_served_locally() {
        assert!(serves_uploads_locally("/files"));
        assert!(!serves_uploads_locally("/"));
        assert!(!serves_uploads_locally("https://cdn.example.com/files"));
    }
}
