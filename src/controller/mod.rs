//! Controllers for the OAM custom resources
//!
//! Both controllers follow the observe-diff-act loop and share one
//! [`Context`] shape: every side effect goes through an [`ObjectStore`] and
//! an [`EventPublisher`], so tests swap the cluster for memory.

pub mod manual_scaler;
pub mod workload;

use std::sync::Arc;

use kube::Client;

use crate::config::ReconcileConfig;
use crate::events::{EventPublisher, KubeEventPublisher};
use crate::registry::TypeRegistry;
use crate::store::{KubeObjectStore, ObjectStore};

/// State shared by every reconcile pass of a controller
pub struct Context {
    /// Object storage (trait object for testability)
    pub store: Arc<dyn ObjectStore>,
    /// Known resource kinds
    pub registry: Arc<TypeRegistry>,
    /// Event sink
    pub events: Arc<dyn EventPublisher>,
    /// Requeue delay and field manager
    pub config: ReconcileConfig,
}

impl Context {
    /// Create a context from explicit parts
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<TypeRegistry>,
        events: Arc<dyn EventPublisher>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            config,
        }
    }

    /// Create a context talking to the cluster behind `client`. Events are
    /// reported as `controller_name`.
    pub fn from_client(
        client: Client,
        registry: Arc<TypeRegistry>,
        config: ReconcileConfig,
        controller_name: &str,
    ) -> Self {
        let store = KubeObjectStore::new(client.clone(), config.field_manager.clone());
        let events = KubeEventPublisher::new(client, controller_name);
        Self::new(Arc::new(store), registry, Arc::new(events), config)
    }
}
