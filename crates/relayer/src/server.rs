use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use mystify_sdk::{
    api::{
        GaslessWithdrawRequest, GaslessWithdrawResponse, HealthResponse, WithdrawRequest,
        WithdrawResponse,
    },
    PhotonIndexer,
};
use serde::Serialize;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::signer::Signer;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::assembler::{self, Assembled};
use crate::config::RelayerConfig;
use crate::error::{GaslessError, RelayerError};
use crate::gasless;
use crate::keys::load_fee_payer;

const MAX_BODY_BYTES: usize = 256 * 1024;

pub struct RelayerState {
    pub config: RelayerConfig,
    pub rpc_client: Arc<RpcClient>,
    pub indexer: Arc<PhotonIndexer>,
}

impl RelayerState {
    pub fn new(config: RelayerConfig) -> anyhow::Result<Self> {
        let rpc_client = Arc::new(RpcClient::new(config.rpc_url.clone()));
        let indexer = Arc::new(
            PhotonIndexer::new(config.compression_rpc_url.clone())?
                .with_default_tree(config.state_tree),
        );

        Ok(Self {
            config,
            rpc_client,
            indexer,
        })
    }
}

pub fn router(state: Arc<RelayerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        // Fee payer, allow-list, fees and bounds
        .route("/info", get(get_info))
        // Validate and co-sign a client-built withdrawal
        .route("/withdraw", post(handle_withdraw))
        // Relayer-submitted withdrawal (off unless enabled)
        .route("/withdraw/gasless", post(handle_gasless_withdraw))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(state: Arc<RelayerState>) -> anyhow::Result<()> {
    // 10 requests per second per IP
    // SmartIpKeyExtractor handles both direct connections and proxied requests
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(10)
        .burst_size(20)
        .key_extractor(tower_governor::key_extractor::SmartIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow::anyhow!("Invalid rate limit configuration"))?;

    let app = router(state.clone()).layer(GovernorLayer {
        config: Arc::new(governor_conf),
    });

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(
        "Relayer listening on {} (rate limited: 10 req/s per IP)",
        addr
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(), // for providing ConnectInfo for rate limiting
    )
    .await?;
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    /// Absent when no fee payer is configured
    fee_payer: Option<String>,
    allowed_programs: Vec<String>,
    fee_bps: u16,
    min_withdrawal_lamports: u64,
    max_withdrawal_lamports: u64,
    max_compute_unit_price: u64,
    gasless_enabled: bool,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_info(State(state): State<Arc<RelayerState>>) -> Json<InfoResponse> {
    let config = &state.config;
    let fee_payer = load_fee_payer(config.fee_payer_secret.as_deref())
        .ok()
        .map(|k| k.pubkey());

    let allowed_programs = config
        .validator_config(fee_payer.unwrap_or_default())
        .allowed_programs()
        .iter()
        .map(|p| p.to_string())
        .collect();

    Json(InfoResponse {
        fee_payer: fee_payer.map(|k| k.to_string()),
        allowed_programs,
        fee_bps: config.fee_bps,
        min_withdrawal_lamports: config.bounds.min,
        max_withdrawal_lamports: config.bounds.max,
        max_compute_unit_price: config.max_compute_unit_price,
        gasless_enabled: config.gasless_enabled,
    })
}

async fn handle_withdraw(
    State(state): State<Arc<RelayerState>>,
    Json(req): Json<WithdrawRequest>,
) -> std::result::Result<Json<WithdrawResponse>, RelayerError> {
    let response = match assembler::assemble(&state.config, &req)? {
        Assembled::FeePayer(pubkey) => WithdrawResponse {
            success: true,
            transaction: None,
            proxy_wallet_public_key: Some(pubkey.to_string()),
        },
        Assembled::Transaction(encoded) => WithdrawResponse {
            success: true,
            transaction: Some(encoded),
            proxy_wallet_public_key: None,
        },
    };
    Ok(Json(response))
}

async fn handle_gasless_withdraw(
    State(state): State<Arc<RelayerState>>,
    Json(req): Json<GaslessWithdrawRequest>,
) -> std::result::Result<Json<GaslessWithdrawResponse>, GaslessError> {
    if !state.config.gasless_enabled {
        return Err(RelayerError::InvalidRequest("gasless withdrawals are disabled".into()).into());
    }
    warn!("Gasless withdrawal received: this route handles a note private key");

    let response = gasless::withdraw(&state, &req).await?;
    Ok(Json(response))
}
