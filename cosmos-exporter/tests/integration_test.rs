//! Integration tests for the exporter.
//!
//! A fake REST gateway is served by axum on an ephemeral port; the real
//! [`RestNodeClient`], resolver and router are driven against it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use cosmos_exporter::config::ConfigError;
use cosmos_exporter::denom::DenomSource;
use cosmos_exporter::http::create_router;
use cosmos_exporter::{
    AppState, DenomOverrides, ExporterConfig, NodeClient, NodeError, ResolveError,
    RestNodeClient, ScrapeSettings, Scraper, resolve,
};
use cosmos_exporter_common::Bech32Config;
use serde_json::{Value, json};
use tower::ServiceExt;

const WALLET: &str = "umee1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5z5tpwp";
const VALOPER: &str = "umeevaloper1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu";

/// Behavior knobs of the fake gateway.
#[derive(Default)]
struct FakeNode {
    metadata: Vec<Value>,
    fail_rewards: bool,
    slow_pool: bool,
    requests: AtomicUsize,
}

type Fake = Arc<FakeNode>;

fn umee_metadata() -> Vec<Value> {
    vec![
        json!({
            "base": "uumee",
            "display": "umee",
            "denom_units": [
                { "denom": "uumee", "exponent": 0 },
                { "denom": "umee", "exponent": 6 }
            ]
        }),
        json!({
            "base": "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2",
            "display": "atom",
            "denom_units": [
                { "denom": "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2", "exponent": 0 },
                { "denom": "atom", "exponent": 6 }
            ]
        }),
    ]
}

fn hit(fake: &FakeNode) {
    fake.requests.fetch_add(1, Ordering::SeqCst);
}

async fn denoms_metadata(State(fake): State<Fake>) -> Json<Value> {
    hit(&fake);
    Json(json!({ "metadatas": fake.metadata, "pagination": { "total": "2" } }))
}

async fn balances(State(fake): State<Fake>) -> Json<Value> {
    hit(&fake);
    Json(json!({
        "balances": [
            { "denom": "uumee", "amount": "2500000" },
            { "denom": "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2", "amount": "42" }
        ]
    }))
}

async fn delegations(State(fake): State<Fake>) -> Json<Value> {
    hit(&fake);
    Json(json!({
        "delegation_responses": [{
            "delegation": {
                "delegator_address": WALLET,
                "validator_address": VALOPER,
                "shares": "1000000.000000000000000000"
            },
            "balance": { "denom": "uumee", "amount": "1000000" }
        }]
    }))
}

async fn unbondings(State(fake): State<Fake>) -> Json<Value> {
    hit(&fake);
    Json(json!({
        "unbonding_responses": [{
            "delegator_address": WALLET,
            "validator_address": VALOPER,
            "entries": [
                { "creation_height": "10", "initial_balance": "300000", "balance": "300000" },
                { "creation_height": "11", "initial_balance": "200000", "balance": "200000" }
            ]
        }]
    }))
}

async fn rewards(State(fake): State<Fake>) -> Response {
    hit(&fake);
    if fake.fail_rewards {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    Json(json!({
        "rewards": [{
            "validator_address": VALOPER,
            "reward": [{ "denom": "uumee", "amount": "1500.250000000000000000" }]
        }],
        "total": [{ "denom": "uumee", "amount": "1500.250000000000000000" }]
    }))
    .into_response()
}

fn validator_json(operator: &str, moniker: &str) -> Value {
    json!({
        "operator_address": operator,
        "jailed": false,
        "status": "BOND_STATUS_BONDED",
        "tokens": "7000000",
        "delegator_shares": "7000000.000000000000000000",
        "description": { "moniker": moniker },
        "commission": { "commission_rates": { "rate": "0.050000000000000000" } },
        "min_self_delegation": "1"
    })
}

async fn validator(State(fake): State<Fake>) -> Json<Value> {
    hit(&fake);
    Json(json!({ "validator": validator_json(VALOPER, "umee-validator") }))
}

#[derive(serde::Deserialize)]
struct Pagination {
    #[serde(rename = "pagination.limit")]
    limit: Option<usize>,
}

async fn validators(State(fake): State<Fake>, Query(page): Query<Pagination>) -> Json<Value> {
    hit(&fake);
    let all: Vec<Value> = (0..3)
        .map(|i| validator_json(&format!("umeevaloper1v{}", i), &format!("node-{}", i)))
        .collect();
    let limit = page.limit.unwrap_or(all.len());
    Json(json!({ "validators": all.into_iter().take(limit).collect::<Vec<_>>() }))
}

async fn commission(State(fake): State<Fake>) -> Json<Value> {
    hit(&fake);
    Json(json!({
        "commission": { "commission": [{ "denom": "uumee", "amount": "3000000.5" }] }
    }))
}

async fn outstanding_rewards(State(fake): State<Fake>) -> Json<Value> {
    hit(&fake);
    Json(json!({
        "rewards": { "rewards": [{ "denom": "uumee", "amount": "9000000" }] }
    }))
}

async fn pool(State(fake): State<Fake>) -> Json<Value> {
    hit(&fake);
    if fake.slow_pool {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
    Json(json!({ "pool": { "bonded_tokens": "80000000", "not_bonded_tokens": "20000000" } }))
}

async fn community_pool(State(fake): State<Fake>) -> Json<Value> {
    hit(&fake);
    Json(json!({ "pool": [{ "denom": "uumee", "amount": "5000000.000000000000000000" }] }))
}

#[derive(serde::Deserialize)]
struct DenomParam {
    denom: String,
}

async fn supply(State(fake): State<Fake>, Query(param): Query<DenomParam>) -> Json<Value> {
    hit(&fake);
    Json(json!({ "amount": { "denom": param.denom, "amount": "1000000000" } }))
}

/// Serve the fake gateway and return its base URL.
async fn serve_fake(fake: Fake) -> String {
    let app = Router::new()
        .route("/cosmos/bank/v1beta1/denoms_metadata", get(denoms_metadata))
        .route("/cosmos/bank/v1beta1/balances/:address", get(balances))
        .route("/cosmos/bank/v1beta1/supply/by_denom", get(supply))
        .route("/cosmos/staking/v1beta1/delegations/:address", get(delegations))
        .route(
            "/cosmos/staking/v1beta1/delegators/:address/unbonding_delegations",
            get(unbondings),
        )
        .route("/cosmos/staking/v1beta1/validators", get(validators))
        .route("/cosmos/staking/v1beta1/validators/:operator", get(validator))
        .route("/cosmos/staking/v1beta1/pool", get(pool))
        .route(
            "/cosmos/distribution/v1beta1/delegators/:address/rewards",
            get(rewards),
        )
        .route(
            "/cosmos/distribution/v1beta1/validators/:operator/commission",
            get(commission),
        )
        .route(
            "/cosmos/distribution/v1beta1/validators/:operator/outstanding_rewards",
            get(outstanding_rewards),
        )
        .route("/cosmos/distribution/v1beta1/community_pool", get(community_pool))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

fn fake(configure: impl FnOnce(&mut FakeNode)) -> Fake {
    let mut node = FakeNode {
        metadata: umee_metadata(),
        ..Default::default()
    };
    configure(&mut node);
    Arc::new(node)
}

async fn client_for(fake: Fake, timeout: Duration) -> RestNodeClient {
    let url = serve_fake(fake).await;
    RestNodeClient::new(url, timeout).unwrap()
}

/// Build the exporter router against a fake gateway, resolving the denom
/// from the given overrides.
async fn exporter(fake: Fake, overrides: DenomOverrides) -> Router {
    let config = ExporterConfig::parse(
        r#"{
            bech32: { prefix: "umee" },
            prometheus: { prefix: "cosmos", default_labels: { chain_id: "umee-1" } },
            node: { timeout_secs: 2 }
        }"#,
    )
    .unwrap();

    let node = Arc::new(client_for(fake, config.node.timeout()).await);
    let denom = resolve(&overrides, node.as_ref()).await.unwrap();

    let settings = ScrapeSettings::new(
        config.prometheus.prefix.clone(),
        config.prometheus.default_labels.clone(),
        config.node.timeout(),
        config.node.validators_limit,
    );
    let scraper = Arc::new(Scraper::new(
        node,
        Arc::new(denom),
        settings,
        config.prometheus.max_error_series,
    ));

    let state = AppState {
        scraper,
        prefixes: Arc::new(config.bech32.resolve()),
    };
    create_router(state, &config.prometheus.path)
}

async fn scrape(router: Router, uri: &str) -> (StatusCode, String) {
    let response = router
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Extract the value of the first sample of `name` whose line contains `needle`.
fn sample_value(body: &str, name: &str, needle: &str) -> Option<f64> {
    body.lines()
        .filter(|line| !line.starts_with('#'))
        .filter(|line| line.split('{').next() == Some(name) || line.split(' ').next() == Some(name))
        .find(|line| line.contains(needle))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}

#[tokio::test]
async fn test_resolve_adopts_display_unit_of_first_entry() {
    let client = client_for(fake(|_| {}), Duration::from_secs(2)).await;

    let denom = resolve(&DenomOverrides::default(), &client).await.unwrap();

    assert_eq!(denom.symbol, "umee");
    assert_eq!(denom.coefficient, 1_000_000.0);
    assert_eq!(denom.base.as_deref(), Some("uumee"));
    assert_eq!(denom.source, DenomSource::NodeMetadata);
}

#[tokio::test]
async fn test_resolve_symbol_matched_against_first_entry_only() {
    let client = client_for(fake(|_| {}), Duration::from_secs(2)).await;

    let overrides = DenomOverrides {
        symbol: Some("atom".to_string()),
        ..Default::default()
    };
    let result = resolve(&overrides, &client).await;

    assert!(matches!(
        result,
        Err(ResolveError::Config(ConfigError::SymbolNotFound { symbol })) if symbol == "atom"
    ));
}

#[tokio::test]
async fn test_resolve_empty_registry() {
    let client = client_for(fake(|f| f.metadata.clear()), Duration::from_secs(2)).await;

    let result = resolve(&DenomOverrides::default(), &client).await;
    assert!(matches!(
        result,
        Err(ResolveError::Config(ConfigError::NoDenomMetadata))
    ));
}

#[tokio::test]
async fn test_resolve_explicit_scaling_skips_node() {
    let node = fake(|_| {});
    let client = client_for(node.clone(), Duration::from_secs(2)).await;

    let overrides = DenomOverrides {
        symbol: Some("umee".to_string()),
        coefficient: None,
        exponent: Some(6),
    };
    let denom = resolve(&overrides, &client).await.unwrap();

    assert_eq!(denom.coefficient, 1_000_000.0);
    assert_eq!(node.requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_resolve_unreachable_node_is_upstream_error() {
    let client = RestNodeClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();

    let result = resolve(&DenomOverrides::default(), &client).await;
    assert!(matches!(result, Err(ResolveError::Upstream(_))));
}

#[tokio::test]
async fn test_rest_client_decodes_queries() {
    let client = client_for(fake(|_| {}), Duration::from_secs(2)).await;

    let balances = client.balances(WALLET).await.unwrap();
    assert_eq!(balances.len(), 2);
    assert_eq!(balances[0].amount, 2_500_000.0);

    let unbondings = client.unbonding_delegations(WALLET).await.unwrap();
    assert_eq!(unbondings[0].balance, 500_000.0);
    assert_eq!(unbondings[0].entries, 2);

    let validator = client.validator(VALOPER).await.unwrap();
    assert_eq!(validator.moniker, "umee-validator");
    assert_eq!(validator.commission_rate, 0.05);

    let validators = client.validators(2).await.unwrap();
    assert_eq!(validators.len(), 2);

    let supply = client.supply_of("uumee").await.unwrap();
    assert_eq!(supply.denom, "uumee");
    assert_eq!(supply.amount, 1_000_000_000.0);
}

#[tokio::test]
async fn test_rest_client_maps_http_errors() {
    let client = client_for(fake(|f| f.fail_rewards = true), Duration::from_secs(2)).await;

    let err = client.delegation_rewards(WALLET).await.unwrap_err();
    assert!(matches!(err, NodeError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_rest_client_timeout() {
    let client = client_for(fake(|f| f.slow_pool = true), Duration::from_millis(200)).await;

    let err = client.staking_pool().await.unwrap_err();
    assert!(matches!(err, NodeError::Timeout(_)));
}

#[tokio::test]
async fn test_wallet_scrape_end_to_end() {
    let router = exporter(fake(|_| {}), DenomOverrides::default()).await;

    let (status, body) = scrape(router, &format!("/metrics/wallet?address={}", WALLET)).await;
    assert_eq!(status, StatusCode::OK);

    assert!(body.contains("# TYPE cosmos_wallet_balance gauge"));
    assert_eq!(
        sample_value(&body, "cosmos_wallet_balance", "coin=\"uumee\""),
        Some(2.5)
    );
    assert_eq!(
        sample_value(&body, "cosmos_wallet_delegations", VALOPER),
        Some(1.0)
    );
    assert_eq!(
        sample_value(&body, "cosmos_wallet_unbondings", VALOPER),
        Some(0.5)
    );
    assert_eq!(
        sample_value(&body, "cosmos_wallet_delegation_shares", VALOPER),
        Some(1.0)
    );
    assert_eq!(
        sample_value(&body, "cosmos_wallet_unbonding_entries", VALOPER),
        Some(2.0)
    );
    assert_eq!(
        sample_value(&body, "cosmos_wallet_rewards", VALOPER),
        Some(0.00150025)
    );

    // Every chain sample carries the denom symbol and the configured labels
    for line in body.lines().filter(|l| l.starts_with("cosmos_wallet_")) {
        assert!(line.contains("denom=\"umee\""), "{line}");
        assert!(line.contains("chain_id=\"umee-1\""), "{line}");
    }

    assert!(body.contains("cosmos_exporter_denom_coefficient{denom=\"umee\"} 1000000"));
}

#[tokio::test]
async fn test_wallet_scrape_partial_failure() {
    let router = exporter(fake(|f| f.fail_rewards = true), DenomOverrides::default()).await;
    let uri = format!("/metrics/wallet?address={}", WALLET);

    let (status, body) = scrape(router.clone(), &uri).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("cosmos_wallet_balance{"));
    assert!(body.contains("cosmos_wallet_delegations{"));
    assert!(body.contains("cosmos_wallet_unbondings{"));
    assert!(!body.contains("cosmos_wallet_rewards{"));

    let errors = format!(
        "cosmos_exporter_scrape_errors_total{{query=\"rewards\",target=\"{}\"}}",
        WALLET
    );
    assert!(body.contains(&format!("{} 1", errors)));

    // The counter is cumulative across scrapes
    let (_, body) = scrape(router, &uri).await;
    assert!(body.contains(&format!("{} 2", errors)));
}

#[tokio::test]
async fn test_wallet_scrape_rejects_foreign_prefix() {
    let node = fake(|_| {});
    let router = exporter(node.clone(), DenomOverrides::default()).await;
    let before = node.requests.load(Ordering::SeqCst);

    let (status, body) = scrape(
        router,
        "/metrics/wallet?address=cosmos1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu",
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("umee"));
    assert_eq!(node.requests.load(Ordering::SeqCst), before);
}

#[tokio::test]
async fn test_validator_scrape_end_to_end() {
    let overrides = DenomOverrides {
        symbol: Some("umee".to_string()),
        coefficient: Some(1_000_000.0),
        exponent: None,
    };
    let router = exporter(fake(|_| {}), overrides).await;

    let (status, body) = scrape(router, &format!("/metrics/validator?address={}", VALOPER)).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(sample_value(&body, "cosmos_validator_tokens", VALOPER), Some(7.0));
    assert_eq!(
        sample_value(&body, "cosmos_validator_commission_rate", VALOPER),
        Some(0.05)
    );
    assert_eq!(sample_value(&body, "cosmos_validator_status", VALOPER), Some(3.0));
    assert_eq!(
        sample_value(&body, "cosmos_validator_commission", VALOPER),
        Some(3.0000005)
    );
    assert_eq!(sample_value(&body, "cosmos_validator_rewards", VALOPER), Some(9.0));
    assert!(body.contains("moniker=\"umee-validator\""));
}

#[tokio::test]
async fn test_general_and_validators_scrape() {
    let router = exporter(fake(|_| {}), DenomOverrides::default()).await;

    let (status, body) = scrape(router.clone(), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        sample_value(&body, "cosmos_general_bonded_tokens", "staking_pool"),
        Some(80.0)
    );
    assert_eq!(
        sample_value(&body, "cosmos_general_supply_total", "uumee"),
        Some(1000.0)
    );
    assert_eq!(
        sample_value(&body, "cosmos_general_community_pool", "uumee"),
        Some(5.0)
    );

    let (status, body) = scrape(router, "/metrics/validators").await;
    assert_eq!(status, StatusCode::OK);
    let samples = body
        .lines()
        .filter(|l| l.starts_with("cosmos_validators_tokens{"))
        .count();
    assert_eq!(samples, 3);
}

#[tokio::test]
async fn test_general_scrape_slow_pool_times_out() {
    let node = fake(|f| f.slow_pool = true);
    let url = serve_fake(node).await;
    let client = Arc::new(RestNodeClient::new(url, Duration::from_millis(300)).unwrap());

    let denom = resolve(&DenomOverrides::default(), client.as_ref())
        .await
        .unwrap();
    let settings = ScrapeSettings::new("cosmos", [], Duration::from_millis(300), 100);
    let scraper = Scraper::new(client, Arc::new(denom), settings, 100);

    let started = std::time::Instant::now();
    let report = scraper.general().await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0].error, NodeError::Timeout(_)));
    assert_eq!(scraper.errors().count("staking_pool", ""), 1);
    assert!(
        report
            .families
            .iter()
            .any(|f| f.name == "cosmos_general_community_pool")
    );
}

#[test]
fn test_bech32_config_umee() {
    let prefixes = Bech32Config {
        prefix: "umee".to_string(),
        ..Default::default()
    }
    .resolve();

    assert_eq!(prefixes.account, "umee");
    assert_eq!(prefixes.validator, "umeevaloper");
    assert_eq!(prefixes.consensus_node_pubkey, "umeevalconspub");
}
