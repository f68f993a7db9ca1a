//! Per-request scraping: query fan-out, amount scaling and failure folding.
//!
//! Every node query is an independent fallible future bounded by the
//! configured deadline. The queries of one scrape run concurrently and their
//! results are folded in a fixed order: successes become metric families,
//! failures are recorded and their families omitted. A scrape never fails
//! as a whole because of upstream errors.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::denom::DenominationConfig;
use crate::mapping::{build_metric_name, sanitize_label_name};
use crate::metrics::{MetricFamily, ScrapeErrors, render};
use crate::node::{
    Coin, Delegation, DelegationReward, NodeClient, NodeError, StakingPool, UnbondingDelegation,
    Validator,
};

/// Node query performed during a scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Balances,
    Delegations,
    Unbondings,
    Rewards,
    Validator,
    Commission,
    OutstandingRewards,
    Validators,
    StakingPool,
    CommunityPool,
    Supply,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Balances => "balances",
            QueryKind::Delegations => "delegations",
            QueryKind::Unbondings => "unbondings",
            QueryKind::Rewards => "rewards",
            QueryKind::Validator => "validator",
            QueryKind::Commission => "commission",
            QueryKind::OutstandingRewards => "outstanding_rewards",
            QueryKind::Validators => "validators",
            QueryKind::StakingPool => "staking_pool",
            QueryKind::CommunityPool => "community_pool",
            QueryKind::Supply => "supply",
        }
    }
}

/// A query that failed during a scrape.
#[derive(Debug, Clone)]
pub struct QueryFailure {
    pub query: QueryKind,
    pub target: String,
    pub error: NodeError,
}

/// Result of one scrape: the families that could be built plus failures.
#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub families: Vec<MetricFamily>,
    pub failures: Vec<QueryFailure>,
}

impl ScrapeReport {
    /// Fold one query result into the report.
    fn fold<T>(
        &mut self,
        query: QueryKind,
        target: &str,
        result: Result<T, NodeError>,
        build: impl FnOnce(T) -> Vec<MetricFamily>,
    ) {
        match result {
            Ok(value) => self.families.extend(build(value)),
            Err(error) => self.failures.push(QueryFailure {
                query,
                target: target.to_string(),
                error,
            }),
        }
    }

    /// Total number of samples across families.
    pub fn sample_count(&self) -> usize {
        self.families.iter().map(|f| f.samples.len()).sum()
    }
}

/// Static settings applied to every scrape.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    /// Metric name prefix.
    pub prefix: String,
    /// Constant labels from configuration, in a stable order.
    pub default_labels: Vec<(String, String)>,
    /// Deadline for each node query.
    pub query_timeout: Duration,
    /// Maximum validators fetched by the listing.
    pub validators_limit: u64,
}

impl ScrapeSettings {
    pub fn new(
        prefix: impl Into<String>,
        default_labels: impl IntoIterator<Item = (String, String)>,
        query_timeout: Duration,
        validators_limit: u64,
    ) -> Self {
        let mut default_labels: Vec<(String, String)> = default_labels
            .into_iter()
            .map(|(k, v)| (sanitize_label_name(&k), v))
            .collect();
        default_labels.sort();

        Self {
            prefix: prefix.into(),
            default_labels,
            query_timeout,
            validators_limit,
        }
    }
}

/// Run `query`, turning a missed deadline into [`NodeError::Timeout`].
pub async fn with_deadline<T, F>(deadline: Duration, query: F) -> Result<T, NodeError>
where
    F: Future<Output = Result<T, NodeError>>,
{
    match tokio::time::timeout(deadline, query).await {
        Ok(result) => result,
        Err(_) => Err(NodeError::Timeout(deadline)),
    }
}

/// Builds names and labels for the families of one scrape.
struct Emitter<'a> {
    settings: &'a ScrapeSettings,
    denom: &'a DenominationConfig,
    target: Option<&'a str>,
}

impl Emitter<'_> {
    fn name(&self, subsystem: &str, metric: &str) -> String {
        build_metric_name(&self.settings.prefix, subsystem, metric)
    }

    /// Item labels, then request labels, then the denom and constant labels.
    fn labels(&self, query: QueryKind, extra: &[(&str, &str)]) -> Vec<(String, String)> {
        let mut labels: Vec<(String, String)> = extra
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        if let Some(target) = self.target {
            labels.push(("address".to_string(), target.to_string()));
        }
        labels.push(("query".to_string(), query.as_str().to_string()));
        labels.push(("denom".to_string(), self.denom.symbol.clone()));
        labels.extend(self.settings.default_labels.iter().cloned());
        labels
    }

    /// One scaled sample per coin, labeled with the coin's on-chain denom.
    fn coins(
        &self,
        family: &mut MetricFamily,
        query: QueryKind,
        coins: &[Coin],
        extra: &[(&str, &str)],
    ) {
        for coin in coins {
            let mut item = extra.to_vec();
            item.push(("coin", coin.denom.as_str()));
            family.push(self.labels(query, &item), self.denom.scale(coin.amount));
        }
    }

    fn balances(&self, coins: Vec<Coin>) -> Vec<MetricFamily> {
        let mut family = MetricFamily::gauge(
            self.name("wallet", "balance"),
            "Wallet balance in display units.",
        );
        self.coins(&mut family, QueryKind::Balances, &coins, &[]);
        vec![family]
    }

    fn delegations(&self, delegations: Vec<Delegation>) -> Vec<MetricFamily> {
        let mut family = MetricFamily::gauge(
            self.name("wallet", "delegations"),
            "Tokens delegated by the wallet, per validator.",
        );
        let mut shares = MetricFamily::gauge(
            self.name("wallet", "delegation_shares"),
            "Validator shares held by the wallet.",
        );
        for d in &delegations {
            let item = [("validator", d.validator_address.as_str())];
            self.coins(
                &mut family,
                QueryKind::Delegations,
                std::slice::from_ref(&d.balance),
                &item,
            );
            shares.push(
                self.labels(QueryKind::Delegations, &item),
                self.denom.scale(d.shares),
            );
        }
        vec![family, shares]
    }

    fn unbondings(&self, unbondings: Vec<UnbondingDelegation>) -> Vec<MetricFamily> {
        let mut family = MetricFamily::gauge(
            self.name("wallet", "unbondings"),
            "Tokens being unbonded by the wallet, per validator.",
        );
        let mut entries = MetricFamily::gauge(
            self.name("wallet", "unbonding_entries"),
            "Pending unbonding entries, per validator.",
        );
        for u in &unbondings {
            let labels = self.labels(
                QueryKind::Unbondings,
                &[("validator", u.validator_address.as_str())],
            );
            family.push(labels.clone(), self.denom.scale(u.balance));
            entries.push(labels, u.entries as f64);
        }
        vec![family, entries]
    }

    fn rewards(&self, rewards: Vec<DelegationReward>) -> Vec<MetricFamily> {
        let mut family = MetricFamily::gauge(
            self.name("wallet", "rewards"),
            "Unclaimed delegation rewards, per validator.",
        );
        for r in &rewards {
            self.coins(
                &mut family,
                QueryKind::Rewards,
                &r.reward,
                &[("validator", r.validator_address.as_str())],
            );
        }
        vec![family]
    }

    /// Per-validator families, shared by the single and listing handlers.
    fn validator_families(
        &self,
        subsystem: &str,
        query: QueryKind,
        validators: &[Validator],
    ) -> Vec<MetricFamily> {
        let mut tokens =
            MetricFamily::gauge(self.name(subsystem, "tokens"), "Tokens bonded to the validator.");
        let mut shares = MetricFamily::gauge(
            self.name(subsystem, "delegator_shares"),
            "Delegator shares issued by the validator.",
        );
        let mut min_self = MetricFamily::gauge(
            self.name(subsystem, "min_self_delegation"),
            "Minimum self delegation of the validator.",
        );
        let mut rate = MetricFamily::gauge(
            self.name(subsystem, "commission_rate"),
            "Current commission rate of the validator.",
        );
        let mut jailed = MetricFamily::gauge(
            self.name(subsystem, "jailed"),
            "Whether the validator is jailed (1) or not (0).",
        );
        let mut status = MetricFamily::gauge(
            self.name(subsystem, "status"),
            "Bond status: 0 unspecified, 1 unbonded, 2 unbonding, 3 bonded.",
        );

        for v in validators {
            let item = [
                ("validator", v.operator_address.as_str()),
                ("moniker", v.moniker.as_str()),
            ];
            let labels = self.labels(query, &item);

            tokens.push(labels.clone(), self.denom.scale(v.tokens));
            shares.push(labels.clone(), self.denom.scale(v.delegator_shares));
            min_self.push(labels.clone(), self.denom.scale(v.min_self_delegation));
            rate.push(labels.clone(), v.commission_rate);
            jailed.push(labels.clone(), if v.jailed { 1.0 } else { 0.0 });
            status.push(labels, v.status.as_value());
        }

        vec![tokens, shares, min_self, rate, jailed, status]
    }

    fn commission(&self, coins: Vec<Coin>) -> Vec<MetricFamily> {
        let mut family = MetricFamily::gauge(
            self.name("validator", "commission"),
            "Accumulated unclaimed validator commission.",
        );
        self.coins(&mut family, QueryKind::Commission, &coins, &[]);
        vec![family]
    }

    fn outstanding_rewards(&self, coins: Vec<Coin>) -> Vec<MetricFamily> {
        let mut family = MetricFamily::gauge(
            self.name("validator", "rewards"),
            "Outstanding rewards held for the validator and its delegators.",
        );
        self.coins(&mut family, QueryKind::OutstandingRewards, &coins, &[]);
        vec![family]
    }

    fn staking_pool(&self, pool: StakingPool) -> Vec<MetricFamily> {
        let labels = self.labels(QueryKind::StakingPool, &[]);
        vec![
            MetricFamily::gauge(
                self.name("general", "bonded_tokens"),
                "Tokens bonded across all validators.",
            )
            .with_sample(labels.clone(), self.denom.scale(pool.bonded_tokens)),
            MetricFamily::gauge(
                self.name("general", "not_bonded_tokens"),
                "Tokens not bonded to any validator.",
            )
            .with_sample(labels, self.denom.scale(pool.not_bonded_tokens)),
        ]
    }

    fn community_pool(&self, coins: Vec<Coin>) -> Vec<MetricFamily> {
        let mut family = MetricFamily::gauge(
            self.name("general", "community_pool"),
            "Community pool holdings.",
        );
        self.coins(&mut family, QueryKind::CommunityPool, &coins, &[]);
        vec![family]
    }

    fn supply(&self, coin: Coin) -> Vec<MetricFamily> {
        let mut family = MetricFamily::gauge(
            self.name("general", "supply_total"),
            "Total supply of the working denomination.",
        );
        self.coins(
            &mut family,
            QueryKind::Supply,
            std::slice::from_ref(&coin),
            &[],
        );
        vec![family]
    }
}

/// Scrapes the node on behalf of the HTTP handlers.
///
/// Holds the shared node connection, the resolved denomination and the
/// process-wide error counter. Scrapes never mutate anything else.
pub struct Scraper {
    node: Arc<dyn NodeClient>,
    denom: Arc<DenominationConfig>,
    settings: ScrapeSettings,
    errors: ScrapeErrors,
}

/// Create a shareable scraper handle.
pub type SharedScraper = Arc<Scraper>;

impl Scraper {
    pub fn new(
        node: Arc<dyn NodeClient>,
        denom: Arc<DenominationConfig>,
        settings: ScrapeSettings,
        max_error_series: usize,
    ) -> Self {
        Self {
            node,
            denom,
            settings,
            errors: ScrapeErrors::new(max_error_series),
        }
    }

    pub fn denom(&self) -> &DenominationConfig {
        &self.denom
    }

    pub fn settings(&self) -> &ScrapeSettings {
        &self.settings
    }

    pub fn errors(&self) -> &ScrapeErrors {
        &self.errors
    }

    fn emitter<'a>(&'a self, target: Option<&'a str>) -> Emitter<'a> {
        Emitter {
            settings: &self.settings,
            denom: &self.denom,
            target,
        }
    }

    /// Balances, delegations, unbondings and rewards of an account.
    pub async fn wallet(&self, address: &str) -> ScrapeReport {
        let deadline = self.settings.query_timeout;
        let node = self.node.as_ref();

        let (balances, delegations, unbondings, rewards) = tokio::join!(
            with_deadline(deadline, node.balances(address)),
            with_deadline(deadline, node.delegations(address)),
            with_deadline(deadline, node.unbonding_delegations(address)),
            with_deadline(deadline, node.delegation_rewards(address)),
        );

        let emit = self.emitter(Some(address));
        let mut report = ScrapeReport::default();
        report.fold(QueryKind::Balances, address, balances, |v| emit.balances(v));
        report.fold(QueryKind::Delegations, address, delegations, |v| {
            emit.delegations(v)
        });
        report.fold(QueryKind::Unbondings, address, unbondings, |v| {
            emit.unbondings(v)
        });
        report.fold(QueryKind::Rewards, address, rewards, |v| emit.rewards(v));

        self.record(report)
    }

    /// State, commission and outstanding rewards of one validator.
    pub async fn validator(&self, operator: &str) -> ScrapeReport {
        let deadline = self.settings.query_timeout;
        let node = self.node.as_ref();

        let (validator, commission, rewards) = tokio::join!(
            with_deadline(deadline, node.validator(operator)),
            with_deadline(deadline, node.validator_commission(operator)),
            with_deadline(deadline, node.validator_outstanding_rewards(operator)),
        );

        let emit = self.emitter(Some(operator));
        let mut report = ScrapeReport::default();
        report.fold(QueryKind::Validator, operator, validator, |v| {
            emit.validator_families("validator", QueryKind::Validator, std::slice::from_ref(&v))
        });
        report.fold(QueryKind::Commission, operator, commission, |v| {
            emit.commission(v)
        });
        report.fold(QueryKind::OutstandingRewards, operator, rewards, |v| {
            emit.outstanding_rewards(v)
        });

        self.record(report)
    }

    /// Every validator known to the node, up to the configured limit.
    pub async fn validators(&self) -> ScrapeReport {
        let validators = with_deadline(
            self.settings.query_timeout,
            self.node.validators(self.settings.validators_limit),
        )
        .await;

        let emit = self.emitter(None);
        let mut report = ScrapeReport::default();
        report.fold(QueryKind::Validators, "", validators, |v| {
            emit.validator_families("validators", QueryKind::Validators, &v)
        });

        self.record(report)
    }

    /// Chain-wide staking pool, community pool and supply.
    pub async fn general(&self) -> ScrapeReport {
        let deadline = self.settings.query_timeout;
        let node = self.node.as_ref();

        let (pool, community, supply) = tokio::join!(
            with_deadline(deadline, node.staking_pool()),
            with_deadline(deadline, node.community_pool()),
            with_deadline(deadline, node.supply_of(self.denom.query_denom())),
        );

        let emit = self.emitter(None);
        let mut report = ScrapeReport::default();
        report.fold(QueryKind::StakingPool, "", pool, |v| emit.staking_pool(v));
        report.fold(QueryKind::CommunityPool, "", community, |v| {
            emit.community_pool(v)
        });
        report.fold(QueryKind::Supply, "", supply, |v| emit.supply(v));

        self.record(report)
    }

    /// Count and log the failures of a finished scrape.
    fn record(&self, report: ScrapeReport) -> ScrapeReport {
        for failure in &report.failures {
            self.errors
                .increment(failure.query.as_str(), &failure.target);
            warn!(
                query = failure.query.as_str(),
                target = %failure.target,
                kind = failure.error.kind(),
                error = %failure.error,
                "Node query failed, omitting metric family"
            );
        }

        debug!(
            families = report.families.len(),
            samples = report.sample_count(),
            failures = report.failures.len(),
            "Scrape folded"
        );

        report
    }

    /// Render a report together with the exporter's own metrics.
    pub fn render(&self, report: &ScrapeReport, handler: &str, elapsed: Duration) -> String {
        let prefix = &self.settings.prefix;
        let mut families = report.families.clone();

        families.push(
            MetricFamily::gauge(
                format!("{}_exporter_scrape_duration_seconds", prefix),
                "Time spent querying the node for this scrape.",
            )
            .with_sample(
                vec![("handler".to_string(), handler.to_string())],
                elapsed.as_secs_f64(),
            ),
        );
        families.push(
            MetricFamily::gauge(
                format!("{}_exporter_denom_coefficient", prefix),
                "Divisor applied to raw on-chain amounts.",
            )
            .with_sample(
                vec![("denom".to_string(), self.denom.symbol.clone())],
                self.denom.coefficient,
            ),
        );
        families.extend(self.errors.families(prefix));

        render(&families)
    }
}
