use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use bytes::Bytes;
use dax_broker::{Broker, StreamEntry};
use dax_envelope::{ActionError, ActionMode, DomainAction, DomainActionResponse};
use dax_keyspace::Keyspace;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::handler::{Handler, PolicyGate};

const CONSUMER_GROUP: &str = "workers";

/// Everything in spec.md §6.1 that governs this worker's own loop (the
/// broker/redis connection and keyspace root/env live one level up, on
/// `Runtime`).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub batch_size: u32,
    pub block: Duration,
    pub visibility_timeout: Duration,
    pub max_deliveries: u32,
    pub retry_backoff: Duration,
    /// TTL applied to a pseudo-sync response list the moment this worker
    /// writes a reply to it (§4.5 "set a short TTL on that list so an
    /// abandoned response does not leak") — the list doesn't exist until
    /// this `push`, so this is the only place that TTL can actually take
    /// effect; a caller-side `EXPIRE` issued before the reply exists is a
    /// no-op on a real Redis server.
    pub response_ttl: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            block: Duration::from_millis(2000),
            visibility_timeout: Duration::from_millis(30_000),
            max_deliveries: 5,
            retry_backoff: Duration::from_millis(1000),
            response_ttl: Duration::from_secs(5),
        }
    }
}

/// One consumer in `service`'s consumer group. Owns no process-wide state;
/// every field needed to process an entry is either on `self` or on the
/// entry itself, matching design note §9's "avoid ambient module-level
/// state".
pub struct Worker {
    service: String,
    consumer_id: String,
    keyspace: Keyspace,
    broker: Arc<dyn Broker>,
    handler: Arc<dyn Handler>,
    policy: Option<Arc<dyn PolicyGate>>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        service: impl Into<String>,
        consumer_id: impl Into<String>,
        keyspace: Keyspace,
        broker: Arc<dyn Broker>,
        handler: Arc<dyn Handler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            service: service.into(),
            consumer_id: consumer_id.into(),
            keyspace,
            broker,
            handler,
            policy: None,
            config,
        }
    }

    pub fn with_policy_gate(mut self, policy: Arc<dyn PolicyGate>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Reclaim-then-read loop. New reads stop as soon as `token` is
    /// cancelled; an in-flight batch always runs to completion first, so
    /// shutdown never truncates a handler mid-call (§5). Entries this
    /// worker never gets to are simply left pending, safe for a peer
    /// consumer in the same group to reclaim once idle past
    /// `visibility_timeout`.
    pub async fn run(&self, token: CancellationToken) -> Result<(), WorkerError> {
        let stream = self.keyspace.actions(&self.service);
        self.broker.ensure_group(&stream, CONSUMER_GROUP).await?;

        // Cancellation is checked at the end of each pass, not the start,
        // so a token cancelled mid-pass still lets the current reclaim+read
        // round finish rather than abandoning a batch half-read.
        loop {
            match self
                .broker
                .reclaim(&stream, CONSUMER_GROUP, &self.consumer_id, self.config.visibility_timeout, self.config.batch_size)
                .await
            {
                Ok(entries) => {
                    for entry in entries {
                        self.process_entry(&stream, entry).await;
                    }
                }
                Err(err) => tracing::warn!(stream = %stream, "reclaim failed: {err}"),
            }

            match self
                .broker
                .read_group(&stream, CONSUMER_GROUP, &self.consumer_id, self.config.batch_size, self.config.block)
                .await
            {
                Ok(entries) => {
                    for entry in entries {
                        self.process_entry(&stream, entry).await;
                    }
                }
                Err(err) => {
                    tracing::warn!(stream = %stream, "read_group failed: {err}");
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }

            if token.is_cancelled() {
                break;
            }
        }

        tracing::debug!(stream = %stream, consumer = %self.consumer_id, "worker loop exited");
        Ok(())
    }

    /// NEW -> DELIVERED -> (HANDLED | FAILED-PENDING-RETRY | FAILED-TERMINAL).
    /// A poison entry never reaches DELIVERED at all — it is quarantined
    /// straight from NEW.
    async fn process_entry(&self, stream: &str, entry: StreamEntry) {
        let action = match dax_envelope::decode(entry.payload.clone()) {
            Ok(action) => action,
            Err(poison) => {
                self.quarantine(stream, &entry.entry_id, poison.raw, &poison.source.to_string()).await;
                return;
            }
        };

        if let Some(policy) = &self.policy
            && let Err(error) = policy.validate(&action).await
        {
            self.reply_failure(&action, error).await;
            self.route_to_dlq(&action).await;
            self.ack(stream, &entry.entry_id).await;
            return;
        }

        match self.handler.handle(action.clone()).await {
            Ok(data) => {
                if let Some(policy) = &self.policy {
                    policy.record(&action, true).await;
                }
                self.reply_success(&action, data).await;
                self.ack(stream, &entry.entry_id).await;
            }
            Err(handler_error) => {
                if let Some(policy) = &self.policy {
                    policy.record(&action, false).await;
                }
                let terminal = handler_error.terminal || entry.delivery_count >= self.config.max_deliveries as u64;
                if terminal {
                    tracing::warn!(
                        action_id = %action.action_id,
                        delivery_count = entry.delivery_count,
                        "handler failed terminally: {handler_error}"
                    );
                    self.reply_failure(&action, handler_error.into()).await;
                    self.route_to_dlq(&action).await;
                    self.ack(stream, &entry.entry_id).await;
                } else {
                    tracing::warn!(
                        action_id = %action.action_id,
                        delivery_count = entry.delivery_count,
                        "handler failed, leaving entry pending for redelivery: {handler_error}"
                    );
                    tokio::time::sleep(self.config.retry_backoff).await;
                    // No ack: the entry stays pending and is reclaimed once
                    // `visibility_timeout` elapses, by this worker or a peer.
                }
            }
        }
    }

    async fn ack(&self, stream: &str, entry_id: &str) {
        if let Err(err) = self.broker.ack(stream, CONSUMER_GROUP, entry_id).await {
            tracing::warn!(entry_id = %entry_id, "ack failed: {err}");
        }
    }

    async fn reply_success(&self, action: &DomainAction, data: Option<serde_json::Value>) {
        match action.mode() {
            ActionMode::FireAndForget => {}
            ActionMode::PseudoSync { response_list } => {
                let response = DomainActionResponse::ok(
                    action.correlation_id.clone().unwrap_or_default(),
                    action.trace_id.clone(),
                    action.action_type.clone(),
                    data,
                );
                self.send_response(&response_list, &response).await;
            }
            ActionMode::AsyncWithCallback { callback_stream, callback_action_type } => {
                self.send_callback(action, &callback_stream, &callback_action_type, data, None).await;
            }
        }
    }

    async fn reply_failure(&self, action: &DomainAction, error: ActionError) {
        match action.mode() {
            ActionMode::FireAndForget => {
                tracing::warn!(action_id = %action.action_id, error = %error.message, "fire-and-forget action failed terminally");
            }
            ActionMode::PseudoSync { response_list } => {
                let response = DomainActionResponse::failed(
                    action.correlation_id.clone().unwrap_or_default(),
                    action.trace_id.clone(),
                    action.action_type.clone(),
                    error,
                );
                self.send_response(&response_list, &response).await;
            }
            ActionMode::AsyncWithCallback { callback_stream, callback_action_type } => {
                self.send_callback(action, &callback_stream, &callback_action_type, None, Some(error)).await;
            }
        }
    }

    async fn send_response(&self, response_list: &str, response: &DomainActionResponse) {
        let encoded = match dax_envelope::encode_response(response) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!("failed to encode response: {err}");
                return;
            }
        };
        if let Err(err) = self.broker.push(response_list, encoded).await {
            tracing::warn!(response_list = %response_list, "failed to push reply: {err}");
            return;
        }
        if let Err(err) = self.broker.expire(response_list, self.config.response_ttl).await {
            tracing::warn!(response_list = %response_list, "failed to set response list TTL: {err}");
        }
    }

    /// Builds and appends the follow-up action an async-with-callback caller
    /// is waiting on. A callback is a fresh `DomainAction`, not a
    /// `DomainActionResponse`, so an error has nowhere to live but
    /// `metadata["error"]`.
    async fn send_callback(
        &self,
        original: &DomainAction,
        callback_stream: &str,
        callback_action_type: &str,
        data: Option<serde_json::Value>,
        error: Option<ActionError>,
    ) {
        let mut metadata = HashMap::new();
        if let Some(error) = error {
            metadata.insert("error".to_string(), serde_json::to_value(error).unwrap_or(serde_json::Value::Null));
        }

        let callback = DomainAction {
            action_id: dax_envelope::new_action_id(),
            action_type: callback_action_type.to_string(),
            origin_service: self.service.clone(),
            target_service: original.origin_service.clone(),
            tenant_id: original.tenant_id.clone(),
            user_id: original.user_id.clone(),
            session_id: original.session_id.clone(),
            task_id: original.task_id.clone(),
            trace_id: original.trace_id.clone(),
            correlation_id: original.correlation_id.clone(),
            data: data.unwrap_or(serde_json::Value::Null),
            metadata: if metadata.is_empty() { None } else { Some(metadata) },
            callback_queue_name: None,
            callback_action_type: None,
            created_at: dax_envelope::now_millis(),
        };

        let encoded = match dax_envelope::encode(&callback) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!("failed to encode callback action: {err}");
                return;
            }
        };
        if let Err(err) = self.broker.append(callback_stream, encoded).await {
            tracing::warn!(callback_stream = %callback_stream, "failed to append callback: {err}");
        }
    }

    async fn route_to_dlq(&self, action: &DomainAction) {
        let dlq = self.keyspace.dlq(&self.service);
        match dax_envelope::encode(action) {
            Ok(bytes) => {
                if let Err(err) = self.broker.append(&dlq, bytes).await {
                    tracing::error!(dlq = %dlq, "failed to route action to dead-letter stream: {err}");
                }
            }
            Err(err) => tracing::error!("failed to encode action for dead-letter routing: {err}"),
        }
    }

    /// A poison entry never decoded into a `DomainAction`, so it is
    /// quarantined as a raw record (base64 bytes + decode error) rather
    /// than through `route_to_dlq`.
    async fn quarantine(&self, stream: &str, entry_id: &str, raw: Bytes, reason: &str) {
        let dlq = self.keyspace.dlq(&self.service);
        let record = serde_json::json!({
            "raw": base64::engine::general_purpose::STANDARD.encode(raw.as_ref()),
            "error": reason,
            "source_stream": stream,
        });
        match serde_json::to_vec(&record) {
            Ok(bytes) => {
                if let Err(err) = self.broker.append(&dlq, Bytes::from(bytes)).await {
                    tracing::error!(dlq = %dlq, "failed to quarantine poison entry: {err}");
                }
            }
            Err(err) => tracing::error!("failed to encode poison record: {err}"),
        }
        self.ack(stream, entry_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dax_broker_memory::MemoryBroker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn handle(&self, action: DomainAction) -> Result<Option<serde_json::Value>, crate::error::HandlerError> {
            Ok(Some(action.data))
        }
    }

    struct AlwaysFailHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Handler for AlwaysFailHandler {
        async fn handle(&self, _action: DomainAction) -> Result<Option<serde_json::Value>, crate::error::HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(crate::error::HandlerError::new("Boom", "handler exploded"))
        }
    }

    struct TerminalFailHandler;

    #[async_trait]
    impl Handler for TerminalFailHandler {
        async fn handle(&self, _action: DomainAction) -> Result<Option<serde_json::Value>, crate::error::HandlerError> {
            Err(crate::error::HandlerError::new("Invalid", "will never succeed").terminal())
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            batch_size: 10,
            block: Duration::from_millis(20),
            visibility_timeout: Duration::from_millis(10),
            max_deliveries: 3,
            retry_backoff: Duration::from_millis(1),
            response_ttl: Duration::from_millis(30),
        }
    }

    fn base_action() -> DomainAction {
        DomainAction {
            action_id: dax_envelope::new_action_id(),
            action_type: "config.get".into(),
            origin_service: "agent-core".into(),
            target_service: "config-svc".into(),
            tenant_id: Some("t1".into()),
            user_id: None,
            session_id: None,
            task_id: None,
            trace_id: dax_envelope::new_trace_id(),
            correlation_id: None,
            data: serde_json::json!({"k": "v"}),
            metadata: None,
            callback_queue_name: None,
            callback_action_type: None,
            created_at: dax_envelope::now_millis(),
        }
    }

    #[tokio::test]
    async fn fire_and_forget_success_acks_with_no_reply() {
        let broker = Arc::new(MemoryBroker::new());
        let keyspace = Keyspace::new("dax", "test");
        let stream = keyspace.actions("config-svc");
        broker.ensure_group(&stream, CONSUMER_GROUP).await.unwrap();
        broker.append(&stream, dax_envelope::encode(&base_action()).unwrap()).await.unwrap();

        let worker = Worker::new("config-svc", "w1", keyspace, broker.clone(), Arc::new(EchoHandler), fast_config());
        let token = CancellationToken::new();
        token.cancel();
        worker.run(token).await.unwrap();

        // Nothing left pending; the single entry was acked.
        let entries = broker.reclaim(&stream, CONSUMER_GROUP, "w2", Duration::from_millis(0), 10).await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn pseudo_sync_success_writes_reply_to_response_list() {
        let broker = Arc::new(MemoryBroker::new());
        let keyspace = Keyspace::new("dax", "test");
        let stream = keyspace.actions("config-svc");
        broker.ensure_group(&stream, CONSUMER_GROUP).await.unwrap();

        let mut action = base_action();
        action.correlation_id = Some("corr-1".into());
        let response_list = keyspace.responses("agent-core", "corr-1");
        action.callback_queue_name = Some(response_list.clone());
        broker.append(&stream, dax_envelope::encode(&action).unwrap()).await.unwrap();

        let worker = Worker::new("config-svc", "w1", keyspace, broker.clone(), Arc::new(EchoHandler), fast_config());
        let token = CancellationToken::new();
        token.cancel();
        worker.run(token).await.unwrap();

        let raw = broker.blocking_pop(&response_list, Duration::from_millis(50)).await.unwrap().unwrap();
        let response = dax_envelope::decode_response(raw).unwrap();
        assert!(response.success);
        assert_eq!(response.data, Some(serde_json::json!({"k": "v"})));
    }

    #[tokio::test]
    async fn pseudo_sync_reply_sets_ttl_on_response_list_so_it_does_not_leak() {
        let broker = Arc::new(MemoryBroker::new());
        let keyspace = Keyspace::new("dax", "test");
        let stream = keyspace.actions("config-svc");
        broker.ensure_group(&stream, CONSUMER_GROUP).await.unwrap();

        let mut action = base_action();
        action.correlation_id = Some("corr-ttl".into());
        let response_list = keyspace.responses("agent-core", "corr-ttl");
        action.callback_queue_name = Some(response_list.clone());
        broker.append(&stream, dax_envelope::encode(&action).unwrap()).await.unwrap();

        let mut config = fast_config();
        config.response_ttl = Duration::from_millis(20);
        let worker = Worker::new("config-svc", "w1", keyspace, broker.clone(), Arc::new(EchoHandler), config);
        let token = CancellationToken::new();
        token.cancel();
        worker.run(token).await.unwrap();

        // Replied before the TTL elapses: still there.
        assert!(broker.blocking_pop(&response_list, Duration::from_millis(1)).await.unwrap().is_some());

        // A second reply demonstrates the list expires on its own once the
        // worker-applied TTL elapses, rather than living forever.
        broker.push(&response_list, dax_envelope::encode_response(&DomainActionResponse::ok(
            "corr-ttl".into(),
            "trace".into(),
            "config.get".into(),
            None,
        )).unwrap()).await.unwrap();
        broker.expire(&response_list, Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(broker.blocking_pop(&response_list, Duration::from_millis(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn async_with_callback_success_appends_callback_action() {
        let broker = Arc::new(MemoryBroker::new());
        let keyspace = Keyspace::new("dax", "test");
        let stream = keyspace.actions("embeddings");
        broker.ensure_group(&stream, CONSUMER_GROUP).await.unwrap();

        let mut action = base_action();
        action.target_service = "embeddings".into();
        action.callback_action_type = Some("embedding.result".into());
        let callback_stream = keyspace.callbacks("agent-core");
        action.callback_queue_name = Some(callback_stream.clone());
        broker.append(&stream, dax_envelope::encode(&action).unwrap()).await.unwrap();

        let worker = Worker::new("embeddings", "w1", keyspace.clone(), broker.clone(), Arc::new(EchoHandler), fast_config());
        let token = CancellationToken::new();
        token.cancel();
        worker.run(token).await.unwrap();

        broker.ensure_group(&callback_stream, "workers").await.unwrap();
        let entries = broker.read_group(&callback_stream, "workers", "c1", 10, Duration::from_millis(20)).await.unwrap();
        assert_eq!(entries.len(), 1);
        let decoded = dax_envelope::decode(entries[0].payload.clone()).unwrap();
        assert_eq!(decoded.action_type, "embedding.result");
        assert_eq!(decoded.target_service, "agent-core");
    }

    #[tokio::test]
    async fn handler_failure_below_max_deliveries_is_left_pending() {
        let broker = Arc::new(MemoryBroker::new());
        let keyspace = Keyspace::new("dax", "test");
        let stream = keyspace.actions("config-svc");
        broker.ensure_group(&stream, CONSUMER_GROUP).await.unwrap();
        broker.append(&stream, dax_envelope::encode(&base_action()).unwrap()).await.unwrap();

        let handler = Arc::new(AlwaysFailHandler { calls: AtomicUsize::new(0) });
        let worker = Worker::new("config-svc", "w1", keyspace, broker.clone(), handler.clone(), fast_config());

        // One pass: read the entry, handler fails once (delivery_count==1 < max_deliveries==3).
        let token = CancellationToken::new();
        token.cancel();
        worker.run(token).await.unwrap();
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        // Still pending: immediately reclaimable with a zero min_idle.
        let reclaimed = broker.reclaim(&stream, CONSUMER_GROUP, "w1", Duration::from_millis(0), 10).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
    }

    #[tokio::test]
    async fn handler_failure_at_max_deliveries_routes_to_dlq_and_acks() {
        let broker = Arc::new(MemoryBroker::new());
        let keyspace = Keyspace::new("dax", "test");
        let stream = keyspace.actions("config-svc");
        broker.ensure_group(&stream, CONSUMER_GROUP).await.unwrap();

        let mut action = base_action();
        action.correlation_id = Some("corr-2".into());
        let response_list = keyspace.responses("agent-core", "corr-2");
        action.callback_queue_name = Some(response_list.clone());
        broker.append(&stream, dax_envelope::encode(&action).unwrap()).await.unwrap();

        let handler = Arc::new(AlwaysFailHandler { calls: AtomicUsize::new(0) });
        let worker = Worker::new("config-svc", "w1", keyspace.clone(), broker.clone(), handler.clone(), fast_config());

        // Drive delivery_count from 1 up to max_deliveries (3): each pass
        // reads or reclaims the one outstanding entry, so three passes with
        // enough idle time between them simulate three redeliveries.
        for _ in 0..3 {
            let token = CancellationToken::new();
            token.cancel();
            worker.run(token).await.unwrap();
            tokio::time::sleep(Duration::from_millis(15)).await;
        }

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let dlq = keyspace.dlq("config-svc");
        broker.ensure_group(&dlq, "workers").await.unwrap();
        let dlq_entries = broker.read_group(&dlq, "workers", "d1", 10, Duration::from_millis(20)).await.unwrap();
        assert_eq!(dlq_entries.len(), 1);

        let raw = broker.blocking_pop(&response_list, Duration::from_millis(50)).await.unwrap().unwrap();
        let response = dax_envelope::decode_response(raw).unwrap();
        assert!(!response.success);
        assert_eq!(response.error.unwrap().error_type, "Boom");
    }

    #[tokio::test]
    async fn terminal_handler_error_skips_retry_budget_entirely() {
        let broker = Arc::new(MemoryBroker::new());
        let keyspace = Keyspace::new("dax", "test");
        let stream = keyspace.actions("config-svc");
        broker.ensure_group(&stream, CONSUMER_GROUP).await.unwrap();
        broker.append(&stream, dax_envelope::encode(&base_action()).unwrap()).await.unwrap();

        let worker = Worker::new("config-svc", "w1", keyspace.clone(), broker.clone(), Arc::new(TerminalFailHandler), fast_config());
        let token = CancellationToken::new();
        token.cancel();
        worker.run(token).await.unwrap();

        let reclaimed = broker.reclaim(&stream, CONSUMER_GROUP, "w1", Duration::from_millis(0), 10).await.unwrap();
        assert!(reclaimed.is_empty(), "terminal failure must ack rather than leave pending");

        let dlq = keyspace.dlq("config-svc");
        broker.ensure_group(&dlq, "workers").await.unwrap();
        let dlq_entries = broker.read_group(&dlq, "workers", "d1", 10, Duration::from_millis(20)).await.unwrap();
        assert_eq!(dlq_entries.len(), 1);
    }

    #[tokio::test]
    async fn poison_entry_is_quarantined_without_reaching_handler() {
        let broker = Arc::new(MemoryBroker::new());
        let keyspace = Keyspace::new("dax", "test");
        let stream = keyspace.actions("config-svc");
        broker.ensure_group(&stream, CONSUMER_GROUP).await.unwrap();
        broker.append(&stream, Bytes::from_static(b"not json")).await.unwrap();

        let handler = Arc::new(AlwaysFailHandler { calls: AtomicUsize::new(0) });
        let worker = Worker::new("config-svc", "w1", keyspace.clone(), broker.clone(), handler.clone(), fast_config());
        let token = CancellationToken::new();
        token.cancel();
        worker.run(token).await.unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        let reclaimed = broker.reclaim(&stream, CONSUMER_GROUP, "w1", Duration::from_millis(0), 10).await.unwrap();
        assert!(reclaimed.is_empty());

        let dlq = keyspace.dlq("config-svc");
        broker.ensure_group(&dlq, "workers").await.unwrap();
        let dlq_entries = broker.read_group(&dlq, "workers", "d1", 10, Duration::from_millis(20)).await.unwrap();
        assert_eq!(dlq_entries.len(), 1);
        let record: serde_json::Value = serde_json::from_slice(&dlq_entries[0].payload).unwrap();
        assert!(record["error"].as_str().unwrap().contains("expected"));
    }
}
