//! Observer server.
//!
//! Wires config into the orchestrator, starts the gateway and mounts the ingress routes.

use crate::clock::{Clock, SystemClock, UuidIds};
use crate::commands::AllowlistAdmins;
use crate::config::ObserverConfig;
use crate::gate::SessionToolGate;
use crate::gateway::{Gateway, GatewayEvent};
use crate::generator::LlmAnswerGenerator;
use crate::knowledge::FileKnowledgeStore;
use crate::observe::{ObserveSettings, ObserveTtls, Observer, ObserverDeps};
use crate::policy::ChannelPolicyStore;
use crate::prefilter::{PrefilterClassifier, PrefilterModel, PrefilterSettings};
use crate::routes;
use anyhow::Result;
use axum::Extension;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use axum::response::Response;
use ob_channels::{HttpPluginChannel, OutboundChannel, SlackChannel};
use ob_llm::{LlmClient, validate_tool_name_all_providers};
use ob_tools::{HttpActionTool, Tool};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub struct ObserverState {
    pub observer: Arc<Observer>,
    pub events: mpsc::Sender<GatewayEvent>,
    pub started_at: Instant,
    pub queue_capacity: usize,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = ObserverConfig::load(config_path).await?;
    let tools = build_tools(&cfg)?;
    preflight_validate_tool_names(&tools)?;
    tracing::info!(
        model = %cfg.general.model,
        prefilter_model = %cfg.prefilter_model(),
        prefilter_enabled = cfg.prefilter.enabled,
        generator_key_configured = cfg.api_key_for_model(&cfg.general.model).is_some(),
        prefilter_key_configured = cfg.api_key_for_model(cfg.prefilter_model()).is_some(),
        slack_enabled = cfg.channels.slack.enabled,
        http_plugin_enabled = cfg.channels.http_plugin.enabled,
        http_action_count = tools.len(),
        admin_count = cfg.observe.admin_users.len(),
        data_dir = %cfg.data_dir().display(),
        "config ok"
    );
    if cfg.observe.admin_users.is_empty() {
        tracing::warn!("observe.admin_users is empty; nobody can run /observe commands");
    }
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = ObserverConfig::load(config_path).await?;
    let started_at = Instant::now();
    let addr: SocketAddr = cfg
        .runtime
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid runtime.bind_addr {}: {e}", cfg.runtime.bind_addr))?;
    let data_dir = cfg.data_dir();
    tracing::info!(
        bind_addr = %addr,
        data_dir = %data_dir.display(),
        model = %cfg.general.model,
        prefilter_model = %cfg.prefilter_model(),
        prefilter_enabled = cfg.prefilter.enabled,
        prefilter_timeout_ms = cfg.prefilter.timeout_ms,
        approval_ttl_minutes = cfg.observe.approval_ttl_minutes,
        blocked_ttl_minutes = cfg.observe.blocked_ttl_minutes,
        filtered_ttl_minutes = cfg.observe.filtered_ttl_minutes,
        training_ttl_minutes = cfg.observe.training_ttl_minutes,
        max_tool_loops = cfg.observe.max_tool_loops,
        slack_enabled = cfg.channels.slack.enabled,
        http_plugin_enabled = cfg.channels.http_plugin.enabled,
        runtime_http_timeout_seconds = cfg.runtime.http_timeout_seconds,
        runtime_http_max_in_flight = cfg.runtime.http_max_in_flight,
        inbound_queue_capacity = cfg.runtime.inbound_queue_capacity,
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;
    tokio::fs::create_dir_all(&data_dir)
        .await
        .map_err(|e| anyhow::anyhow!("create data dir {}: {e}", data_dir.display()))?;

    let tools = build_tools(&cfg)?;
    preflight_validate_tool_names(&tools)?;

    let generator_key = cfg
        .api_key_for_model(&cfg.general.model)
        .ok_or_else(|| anyhow::anyhow!("no api key configured for model {}", cfg.general.model))?;
    let generator = Arc::new(LlmAnswerGenerator::new(
        LlmClient::new(&generator_key, &cfg.general.model)?,
        cfg.general.system_prompt.clone(),
        tools,
        cfg.observe.max_tool_loops,
    ));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let prefilter_model: Option<Arc<dyn PrefilterModel>> =
        match cfg.api_key_for_model(cfg.prefilter_model()) {
            Some(key) => Some(Arc::new(LlmClient::with_timeout(
                &key,
                cfg.prefilter_model(),
                cfg.prefilter_timeout(),
            )?)),
            None => {
                tracing::warn!(
                    model = %cfg.prefilter_model(),
                    "no api key for prefilter model; every message will be treated as RESPOND"
                );
                None
            }
        };
    let prefilter = Arc::new(
        PrefilterClassifier::new(
            prefilter_model,
            PrefilterSettings {
                timeout: cfg.prefilter_timeout(),
                pool_cap: cfg.prefilter.example_pool_cap,
                few_shot_limit: cfg.prefilter.few_shot_limit,
            },
            clock.clone(),
        )
        .with_examples_file(data_dir.join("prefilter_examples.json"))
        .await,
    );

    let policies = Arc::new(ChannelPolicyStore::load(data_dir.join("channel_policies.json")).await?);
    let knowledge = Arc::new(FileKnowledgeStore::new(data_dir.join("knowledge"), clock.clone()));
    let outbound = build_outbound(&cfg)?;
    tracing::info!(
        outbound_channel = outbound.channel_id(),
        channel_policies = policies.len(),
        "observer collaborators ready"
    );

    let ttl = |minutes: u64| chrono::Duration::minutes(minutes as i64);
    let observer = Arc::new(Observer::new(
        ObserverDeps {
            policies,
            prefilter,
            gate: Arc::new(SessionToolGate::new()),
            generator,
            outbound,
            knowledge_writer: knowledge.clone(),
            knowledge_index: knowledge,
            admins: Arc::new(AllowlistAdmins::new(cfg.observe.admin_users.clone())),
        },
        ObserveSettings {
            acknowledgment: cfg.general.acknowledgment.clone(),
            roleplay_senders: cfg
                .observe
                .roleplay_senders
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<HashSet<_>>(),
            knowledge_limit: cfg.observe.knowledge_limit,
            prefilter_enabled: cfg.prefilter.enabled,
        },
        ObserveTtls {
            approval: ttl(cfg.observe.approval_ttl_minutes),
            blocked: ttl(cfg.observe.blocked_ttl_minutes),
            filtered: ttl(cfg.observe.filtered_ttl_minutes),
            training: ttl(cfg.observe.training_ttl_minutes),
        },
        clock,
        Arc::new(UuidIds),
    ));

    let (events_tx, events_rx) = mpsc::channel(cfg.runtime.inbound_queue_capacity);
    let gateway = Arc::new(Gateway::new(observer.clone(), events_rx));
    let shutdown = CancellationToken::new();
    let gateway_handle = gateway.start(shutdown.child_token());
    tracing::info!("gateway started");

    let state = Arc::new(ObserverState {
        observer,
        events: events_tx,
        started_at,
        queue_capacity: cfg.runtime.inbound_queue_capacity,
    });

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router()
        .layer(Extension(state))
        .layer(GlobalConcurrencyLimitLayer::new(
            cfg.runtime.http_max_in_flight,
        ))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.runtime.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "observer serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    match gateway_handle.await {
        Ok(()) => tracing::info!("gateway shutdown completed"),
        Err(e) => tracing::error!(error = %e, "gateway task join failed during shutdown"),
    }

    Ok(())
}

fn build_tools(cfg: &ObserverConfig) -> Result<Vec<Arc<dyn Tool>>> {
    let mut tools: Vec<Arc<dyn Tool>> = Vec::with_capacity(cfg.tools.http_actions.len());
    for action in &cfg.tools.http_actions {
        let tool = HttpActionTool::new(action.clone())
            .map_err(|e| anyhow::anyhow!("http action '{}': {e}", action.name))?;
        tools.push(Arc::new(tool));
    }
    Ok(tools)
}

fn build_outbound(cfg: &ObserverConfig) -> Result<Arc<dyn OutboundChannel>> {
    if cfg.channels.slack.enabled {
        return Ok(Arc::new(SlackChannel::new(&cfg.channels.slack.bot_token)?));
    }
    let plugin = &cfg.channels.http_plugin;
    Ok(Arc::new(
        HttpPluginChannel::new(plugin.channel_id.trim(), &plugin.send_url)?
            .with_auth_token(plugin.auth_token.clone()),
    ))
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn preflight_validate_tool_names(tools: &[Arc<dyn Tool>]) -> Result<()> {
    tracing::info!(
        tool_count = tools.len(),
        "preflight tool name validation starting"
    );
    let mut seen = HashSet::new();
    for tool in tools {
        let spec = tool.spec();
        validate_tool_name_all_providers(&spec.name).map_err(|e| {
            anyhow::anyhow!(
                "preflight tool name validation failed for '{}': {e}",
                spec.name
            )
        })?;
        if !seen.insert(spec.name.clone()) {
            return Err(anyhow::anyhow!("duplicate tool name '{}'", spec.name));
        }
    }
    tracing::info!(
        tool_count = tools.len(),
        "preflight tool name validation passed"
    );
    Ok(())
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::warn!("received ctrl-c; beginning graceful shutdown"),
                Err(e) => tracing::error!(error = %e, "failed to await ctrl-c signal"),
            },
            _ = shutdown.cancelled() => {}
        }
    }
    shutdown.cancel();
}
