//! Per-session schema cache with in-flight request deduplication.

use std::{
    collections::HashMap,
    sync::{Arc, mpsc::Sender},
};

use super::schema::FeatureSchema;
use crate::api::{ApiError, ApiGateway, ModelId};
use crate::jobs::{self, CancelFlag, JobMessage, SchemaFetchMessage};

/// Identifies one underlying schema request. Every caller that joined the
/// request holds the same ticket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FetchTicket(u64);

/// Immediate answer of [`SchemaRegistry::fetch`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemaFetch {
    Ready(Arc<FeatureSchema>),
    Pending(FetchTicket),
}

/// Schema retrieval failed; not retried automatically.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Failed to fetch schema for model {model_id}: {cause}")]
pub struct SchemaFetchError {
    pub model_id: ModelId,
    pub cause: ApiError,
}

/// A finished request, shared by all of its waiters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchemaResolution {
    pub ticket: FetchTicket,
    pub model_id: ModelId,
    /// Number of `fetch` calls that joined this request.
    pub waiters: usize,
    pub result: Result<Arc<FeatureSchema>, SchemaFetchError>,
}

struct InFlightFetch {
    ticket: FetchTicket,
    cancel: CancelFlag,
    waiters: usize,
}

/// Fetches feature schemas through the gateway and caches them for the
/// lifetime of one workflow session.
pub struct SchemaRegistry {
    gateway: Arc<dyn ApiGateway>,
    sender: Sender<JobMessage>,
    cache: HashMap<ModelId, Arc<FeatureSchema>>,
    in_flight: HashMap<ModelId, InFlightFetch>,
    next_ticket: u64,
    network_fetches: u64,
}

impl SchemaRegistry {
    /// Create a registry whose fetch jobs report to `sender`.
    pub fn new(gateway: Arc<dyn ApiGateway>, sender: Sender<JobMessage>) -> Self {
        Self {
            gateway,
            sender,
            cache: HashMap::new(),
            in_flight: HashMap::new(),
            next_ticket: 1,
            network_fetches: 0,
        }
    }

    /// Return the cached schema or the ticket of the (possibly shared)
    /// request that will deliver it.
    pub fn fetch(&mut self, model_id: ModelId) -> SchemaFetch {
        if let Some(schema) = self.cache.get(&model_id) {
            return SchemaFetch::Ready(Arc::clone(schema));
        }
        if let Some(flight) = self.in_flight.get_mut(&model_id) {
            flight.waiters += 1;
            tracing::debug!(%model_id, waiters = flight.waiters, "Joining in-flight schema fetch");
            return SchemaFetch::Pending(flight.ticket);
        }

        let ticket = FetchTicket(self.next_ticket);
        self.next_ticket += 1;
        self.network_fetches += 1;
        let cancel = CancelFlag::default();
        let gateway = Arc::clone(&self.gateway);
        jobs::spawn_job("schema fetch", self.sender.clone(), cancel.clone(), move || {
            JobMessage::SchemaFetched(SchemaFetchMessage {
                ticket,
                model_id,
                result: gateway.fetch_schema(model_id),
            })
        });
        tracing::debug!(%model_id, ?ticket, "Schema fetch dispatched");
        self.in_flight.insert(
            model_id,
            InFlightFetch {
                ticket,
                cancel,
                waiters: 1,
            },
        );
        SchemaFetch::Pending(ticket)
    }

    /// Apply a finished fetch. Returns `None` when the request was
    /// invalidated or superseded while it was running.
    pub fn complete(&mut self, message: SchemaFetchMessage) -> Option<SchemaResolution> {
        let SchemaFetchMessage {
            ticket,
            model_id,
            result,
        } = message;
        match self.in_flight.get(&model_id) {
            Some(flight) if flight.ticket == ticket => {}
            _ => {
                tracing::debug!(%model_id, ?ticket, "Ignoring superseded schema response");
                return None;
            }
        }
        let flight = self.in_flight.remove(&model_id)?;
        let result = match result {
            Ok(schema) => {
                let schema = Arc::new(schema);
                self.cache.insert(model_id, Arc::clone(&schema));
                Ok(schema)
            }
            Err(cause) => {
                tracing::warn!(%model_id, "Schema fetch failed: {cause}");
                Err(SchemaFetchError { model_id, cause })
            }
        };
        Some(SchemaResolution {
            ticket,
            model_id,
            waiters: flight.waiters,
            result,
        })
    }

    /// Cached schema for `model_id`, if any.
    pub fn get(&self, model_id: ModelId) -> Option<Arc<FeatureSchema>> {
        self.cache.get(&model_id).cloned()
    }

    pub fn is_pending(&self, model_id: ModelId) -> bool {
        self.in_flight.contains_key(&model_id)
    }

    /// Drop the cached schema and forget any in-flight request for it.
    pub fn invalidate(&mut self, model_id: ModelId) {
        self.cache.remove(&model_id);
        if let Some(flight) = self.in_flight.remove(&model_id) {
            flight.cancel.cancel();
        }
    }

    /// Forget every cached schema and cancel all in-flight requests.
    pub fn clear(&mut self) {
        for (model_id, flight) in self.in_flight.drain() {
            tracing::debug!(%model_id, ticket = ?flight.ticket, "Cancelling schema fetch");
            flight.cancel.cancel();
        }
        if !self.cache.is_empty() {
            tracing::debug!(cached = self.cache.len(), "Discarding cached schemas");
            self.cache.clear();
        }
    }

    /// Number of requests actually sent to the gateway.
    pub fn network_fetches(&self) -> u64 {
        self.network_fetches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobChannel;
    use crate::test_support::{FakeGateway, schema_for};
    use std::time::Duration;

    fn next_schema_message(channel: &JobChannel) -> SchemaFetchMessage {
        match channel.recv_timeout(Duration::from_secs(5)) {
            Some(JobMessage::SchemaFetched(message)) => message,
            other => panic!("expected schema message, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_fetches_share_one_request() {
        let gateway = Arc::new(FakeGateway::default());
        let release = gateway.hold_schema(ModelId(5));
        let channel = JobChannel::new();
        let mut registry = SchemaRegistry::new(gateway.clone(), channel.sender());

        let first = registry.fetch(ModelId(5));
        let second = registry.fetch(ModelId(5));
        assert_eq!(first, second);
        assert!(registry.is_pending(ModelId(5)));

        release.send(Ok(schema_for(ModelId(5)))).unwrap();
        let resolution = registry.complete(next_schema_message(&channel)).unwrap();
        assert_eq!(resolution.waiters, 2);
        assert!(resolution.result.is_ok());
        assert_eq!(gateway.schema_calls(), vec![ModelId(5)]);
        assert_eq!(registry.network_fetches(), 1);
    }

    #[test]
    fn cached_schema_is_returned_without_network() {
        let gateway = Arc::new(FakeGateway::default());
        let channel = JobChannel::new();
        let mut registry = SchemaRegistry::new(gateway.clone(), channel.sender());

        registry.fetch(ModelId(2));
        registry.complete(next_schema_message(&channel)).unwrap();
        match registry.fetch(ModelId(2)) {
            SchemaFetch::Ready(schema) => assert_eq!(schema.model_id(), ModelId(2)),
            other => panic!("expected cached schema, got {other:?}"),
        }
        assert_eq!(gateway.schema_calls().len(), 1);
    }

    #[test]
    fn failure_carries_model_id_and_is_not_cached() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail_schema(ModelId(9), ApiError::NotFound("Model not found".to_string()));
        let channel = JobChannel::new();
        let mut registry = SchemaRegistry::new(gateway.clone(), channel.sender());

        registry.fetch(ModelId(9));
        let resolution = registry.complete(next_schema_message(&channel)).unwrap();
        let err = resolution.result.unwrap_err();
        assert_eq!(err.model_id, ModelId(9));
        assert_eq!(err.cause, ApiError::NotFound("Model not found".to_string()));
        assert!(registry.get(ModelId(9)).is_none());
        assert!(!registry.is_pending(ModelId(9)));
    }

    #[test]
    fn invalidate_drops_cache_and_ignores_late_result() {
        let gateway = Arc::new(FakeGateway::default());
        let release = gateway.hold_schema(ModelId(4));
        let channel = JobChannel::new();
        let mut registry = SchemaRegistry::new(gateway.clone(), channel.sender());

        let SchemaFetch::Pending(ticket) = registry.fetch(ModelId(4)) else {
            panic!("expected pending fetch");
        };
        registry.invalidate(ModelId(4));
        let late = SchemaFetchMessage {
            ticket,
            model_id: ModelId(4),
            result: Ok(schema_for(ModelId(4))),
        };
        assert!(registry.complete(late).is_none());
        assert!(registry.get(ModelId(4)).is_none());
        drop(release);

        registry.fetch(ModelId(4));
        assert_eq!(registry.network_fetches(), 2);
    }

    #[test]
    fn clear_forgets_cached_and_pending_schemas() {
        let gateway = Arc::new(FakeGateway::default());
        let channel = JobChannel::new();
        let mut registry = SchemaRegistry::new(gateway.clone(), channel.sender());

        registry.fetch(ModelId(1));
        registry.complete(next_schema_message(&channel)).unwrap();
        let release = gateway.hold_schema(ModelId(2));
        let SchemaFetch::Pending(stale) = registry.fetch(ModelId(2)) else {
            panic!("expected pending fetch");
        };

        registry.clear();
        assert!(!registry.is_pending(ModelId(2)));
        assert!(registry.get(ModelId(1)).is_none());

        release.send(Ok(schema_for(ModelId(2)))).unwrap();
        let late = next_schema_message(&channel);
        assert_eq!(late.ticket, stale);
        assert!(registry.complete(late).is_none());

        assert!(matches!(registry.fetch(ModelId(1)), SchemaFetch::Pending(_)));
        assert_eq!(registry.network_fetches(), 3);
    }
}
