use std::sync::Arc;

use dax_broker::Broker;
use dax_broker_redis::{RedisBroker, RedisBrokerConfig};
use dax_client::DomainActionClient;
use dax_keyspace::Keyspace;
use dax_state::StateStore;
use dax_state_redis::{RedisStateConfig, RedisStateStore};
use dax_tier::TierTable;
use dax_worker::{Handler, Worker, WorkerConfig};

use crate::config::{Config, TierConfigSource};
use crate::error::RuntimeError;
use crate::policy_gate::TierGate;

/// The process-level singleton: one broker connection, one keyspace, one
/// client, and (if configured) one tier table — built once at startup and
/// passed explicitly to whatever the hosting service builds on top,
/// rather than reached for as ambient module-level state (design note §9).
pub struct Runtime {
    config: Config,
    broker: Arc<dyn Broker>,
    state: Arc<dyn StateStore>,
    keyspace: Keyspace,
    client: DomainActionClient,
    tier_table: Option<TierTable>,
}

impl Runtime {
    pub async fn bootstrap(config: Config) -> Result<Self, RuntimeError> {
        let url = config.redis_connection_url();

        let broker: Arc<dyn Broker> = Arc::new(RedisBroker::connect(RedisBrokerConfig { url: url.clone() }).await?);
        let state: Arc<dyn StateStore> = Arc::new(RedisStateStore::connect(RedisStateConfig { url }).await?);
        let keyspace = Keyspace::new(config.root_prefix.clone(), config.environment.clone());
        let client = DomainActionClient::new(config.service_name.clone(), keyspace.clone(), broker.clone());

        let tier_table = match &config.tier_config {
            Some(TierConfigSource::Inline(value)) => Some(TierTable::from_json(value.clone())?),
            Some(TierConfigSource::Path(path)) => Some(TierTable::from_path(path)?),
            None => None,
        };

        Ok(Self { config, broker, state, keyspace, client, tier_table })
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        self.broker.clone()
    }

    pub fn state(&self) -> Arc<dyn StateStore> {
        self.state.clone()
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn client(&self) -> &DomainActionClient {
        &self.client
    }

    pub fn tier_table(&self) -> Option<&TierTable> {
        self.tier_table.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `<hostname>-<ulid>`, matching the teacher's own consumer-identity
    /// convention so worker logs and `XPENDING` consumer names stay
    /// recognizable across deployments that also run the teacher's stack.
    pub fn generate_consumer_id() -> String {
        let host = hostname::get().map(|h| h.to_string_lossy().to_string()).unwrap_or_else(|_| "unknown".to_string());
        format!("{host}-{}", ulid::Ulid::new())
    }

    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            batch_size: self.config.batch_size,
            block: self.config.block(),
            visibility_timeout: self.config.visibility_timeout(),
            max_deliveries: self.config.max_deliveries,
            retry_backoff: self.config.retry_backoff(),
            response_ttl: self.config.pseudo_sync_default_timeout(),
        }
    }

    /// Builds a `Worker` for `consumer_id` dispatching into `handler`.
    /// Automatically wires in tier enforcement when a tier table was
    /// configured — callers that need a worker with no policy gate at all
    /// build `dax_worker::Worker` directly instead.
    pub fn worker(&self, consumer_id: impl Into<String>, handler: Arc<dyn Handler>) -> Worker {
        let worker = Worker::new(
            self.config.service_name.clone(),
            consumer_id,
            self.keyspace.clone(),
            self.broker.clone(),
            handler,
            self.worker_config(),
        );

        match &self.tier_table {
            Some(table) => {
                let engine = dax_tier::TierPolicyEngine::new(
                    self.config.service_name.clone(),
                    table.clone(),
                    self.keyspace.clone(),
                    self.broker.clone(),
                );
                let gate = Arc::new(TierGate::new(engine, self.state.clone(), self.keyspace.clone(), self.config.service_name.clone()));
                worker.with_policy_gate(gate)
            }
            None => worker,
        }
    }
}
