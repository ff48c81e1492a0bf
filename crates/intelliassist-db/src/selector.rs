//! Chooses the storage backend once per process and routes every call to it.

use async_trait::async_trait;
use intelliassist_core::{ChatMessage, NewChatMessage, NewTask, Task, TaskFilter, TaskId, TaskPatch};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::memory::MemoryStore;
use crate::postgres::PostgresStore;
use crate::store::TaskStore;
use crate::supabase::SupabaseStore;
use crate::{BackendKind, Error, Result};

/// Builds a live store for one backend kind.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// False when the credentials needed to even attempt a connection are absent
    fn is_configured(&self) -> bool;

    async fn connect(&self) -> Result<Arc<dyn TaskStore>>;
}

pub struct PostgresConnector {
    database_url: Option<String>,
    max_connections: u32,
    timeout: Duration,
}

impl PostgresConnector {
    pub fn new(database_url: Option<String>, max_connections: u32, timeout: Duration) -> Self {
        Self {
            database_url: database_url.filter(|url| !url.trim().is_empty()),
            max_connections,
            timeout,
        }
    }
}

#[async_trait]
impl BackendConnector for PostgresConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Postgres
    }

    fn is_configured(&self) -> bool {
        self.database_url.is_some()
    }

    async fn connect(&self) -> Result<Arc<dyn TaskStore>> {
        let url = self.database_url.as_deref().ok_or_else(|| {
            Error::backend(BackendKind::Postgres, "connect", "DATABASE_URL not set")
        })?;
        let store = PostgresStore::connect(url, self.max_connections, self.timeout).await?;
        store.init_schema().await?;
        Ok(Arc::new(store))
    }
}

pub struct SupabaseConnector {
    url: Option<String>,
    anon_key: Option<String>,
    timeout: Duration,
}

impl SupabaseConnector {
    pub fn new(url: Option<String>, anon_key: Option<String>, timeout: Duration) -> Self {
        Self {
            url: url.filter(|u| !u.trim().is_empty()),
            anon_key: anon_key.filter(|k| !k.trim().is_empty()),
            timeout,
        }
    }
}

#[async_trait]
impl BackendConnector for SupabaseConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Supabase
    }

    fn is_configured(&self) -> bool {
        self.url.is_some() && self.anon_key.is_some()
    }

    async fn connect(&self) -> Result<Arc<dyn TaskStore>> {
        match (&self.url, &self.anon_key) {
            (Some(url), Some(key)) => Ok(Arc::new(SupabaseStore::new(url, key, self.timeout)?)),
            _ => Err(Error::backend(
                BackendKind::Supabase,
                "connect",
                "SUPABASE_URL or SUPABASE_ANON_KEY not set",
            )),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryConnector;

#[async_trait]
impl BackendConnector for MemoryConnector {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<Arc<dyn TaskStore>> {
        Ok(Arc::new(MemoryStore::new()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum ProbeStatus {
    Connected,
    Failed(String),
    NotConfigured,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub backend: BackendKind,
    #[serde(flatten)]
    pub status: ProbeStatus,
}

/// Outcome of backend selection. Fixed for the lifetime of the selector.
#[derive(Debug, Clone, Serialize)]
pub struct BackendState {
    pub active: BackendKind,
    pub probes: Vec<ProbeResult>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_url: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub probe_timeout: Duration,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            supabase_url: None,
            supabase_anon_key: None,
            probe_timeout: Duration::from_secs(5),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageStatus {
    Connected,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct StorageHealth {
    pub backend: BackendKind,
    pub status: StorageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct StorageSelector {
    connectors: Vec<Box<dyn BackendConnector>>,
    probe_timeout: Duration,
    active: OnceCell<(BackendState, Arc<dyn TaskStore>)>,
}

impl StorageSelector {
    /// Connectors are tried in the given order. A memory connector is
    /// appended when the list does not contain one.
    pub fn new(mut connectors: Vec<Box<dyn BackendConnector>>, probe_timeout: Duration) -> Self {
        if !connectors.iter().any(|c| c.kind() == BackendKind::Memory) {
            connectors.push(Box::new(MemoryConnector));
        }
        Self {
            connectors,
            probe_timeout,
            active: OnceCell::new(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        let connectors: Vec<Box<dyn BackendConnector>> = vec![
            Box::new(PostgresConnector::new(
                config.database_url.clone(),
                config.max_connections,
                config.probe_timeout,
            )),
            Box::new(SupabaseConnector::new(
                config.supabase_url.clone(),
                config.supabase_anon_key.clone(),
                config.probe_timeout,
            )),
            Box::new(MemoryConnector),
        ];
        Self::new(connectors, config.probe_timeout)
    }

    /// Selects the backend on first call; later calls return the same state
    /// without probing again.
    pub async fn initialize(&self) -> &BackendState {
        &self.active().await.0
    }

    /// `None` until `initialize` (or any storage call) has run.
    pub fn state(&self) -> Option<&BackendState> {
        self.active.get().map(|(state, _)| state)
    }

    /// Re-probes the active backend without changing the selection.
    pub async fn health_check(&self) -> StorageHealth {
        let (state, store) = self.active().await;
        let probe = tokio::time::timeout(self.probe_timeout, store.probe()).await;
        let error = match probe {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("probe timed out after {:?}", self.probe_timeout)),
        };
        StorageHealth {
            backend: state.active,
            status: if error.is_none() {
                StorageStatus::Connected
            } else {
                StorageStatus::Error
            },
            error,
        }
    }

    async fn active(&self) -> &(BackendState, Arc<dyn TaskStore>) {
        self.active.get_or_init(|| self.select()).await
    }

    async fn store(&self) -> &Arc<dyn TaskStore> {
        &self.active().await.1
    }

    async fn try_connector(&self, connector: &dyn BackendConnector) -> Result<Arc<dyn TaskStore>> {
        let attempt = async {
            let store = connector.connect().await?;
            store.probe().await?;
            Ok::<_, Error>(store)
        };
        tokio::time::timeout(self.probe_timeout, attempt)
            .await
            .unwrap_or_else(|_| {
                Err(Error::backend(
                    connector.kind(),
                    "probe",
                    format!("timed out after {:?}", self.probe_timeout),
                ))
            })
    }

    async fn select(&self) -> (BackendState, Arc<dyn TaskStore>) {
        let mut probes = Vec::with_capacity(self.connectors.len());

        for connector in &self.connectors {
            let kind = connector.kind();
            if !connector.is_configured() {
                debug!(backend = %kind, "Storage backend not configured");
                probes.push(ProbeResult {
                    backend: kind,
                    status: ProbeStatus::NotConfigured,
                });
                continue;
            }

            match self.try_connector(connector.as_ref()).await {
                Ok(store) => {
                    info!(backend = %kind, "Storage backend connected");
                    probes.push(ProbeResult {
                        backend: kind,
                        status: ProbeStatus::Connected,
                    });
                    info!(backend = %kind, "Active storage backend selected");
                    return (BackendState { active: kind, probes }, store);
                }
                Err(e) => {
                    warn!(backend = %kind, error = %e, "Storage backend probe failed");
                    probes.push(ProbeResult {
                        backend: kind,
                        status: ProbeStatus::Failed(e.to_string()),
                    });
                }
            }
        }

        warn!("No storage backend connected, using in-memory store");
        let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new());
        (
            BackendState {
                active: BackendKind::Memory,
                probes,
            },
            store,
        )
    }

    pub async fn create_task(&self, task: NewTask) -> Result<Task> {
        self.store().await.create_task(task).await
    }

    pub async fn get_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.store().await.get_tasks(filter).await
    }

    pub async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task> {
        self.store().await.update_task(id, patch).await
    }

    pub async fn delete_task(&self, id: &TaskId) -> Result<()> {
        self.store().await.delete_task(id).await
    }

    pub async fn clear_tasks(&self, filter: &TaskFilter) -> Result<u64> {
        self.store().await.clear_tasks(filter).await
    }

    pub async fn save_chat_message(&self, message: NewChatMessage) -> Result<ChatMessage> {
        self.store().await.save_chat_message(message).await
    }

    pub async fn get_chat_history(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<ChatMessage>> {
        self.store().await.get_chat_history(user_id, limit).await
    }

    pub async fn clear_chat_history(&self, user_id: Option<&str>) -> Result<u64> {
        self.store().await.clear_chat_history(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connects only on the first attempt.
    struct FlakyConnector {
        kind: BackendKind,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl BackendConnector for FlakyConnector {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn connect(&self) -> Result<Arc<dyn TaskStore>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(Arc::new(MemoryStore::new()))
            } else {
                Err(Error::backend(self.kind, "connect", "connection refused"))
            }
        }
    }

    struct FailingConnector(BackendKind);

    #[async_trait]
    impl BackendConnector for FailingConnector {
        fn kind(&self) -> BackendKind {
            self.0
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn connect(&self) -> Result<Arc<dyn TaskStore>> {
            Err(Error::backend(self.0, "connect", "connection refused"))
        }
    }

    struct HangingConnector;

    #[async_trait]
    impl BackendConnector for HangingConnector {
        fn kind(&self) -> BackendKind {
            BackendKind::Postgres
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn connect(&self) -> Result<Arc<dyn TaskStore>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Arc::new(MemoryStore::new()))
        }
    }

    #[tokio::test]
    async fn test_initialize_is_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let selector = StorageSelector::new(
            vec![Box::new(FlakyConnector {
                kind: BackendKind::Postgres,
                calls: calls.clone(),
            })],
            Duration::from_secs(1),
        );
        assert!(selector.state().is_none());

        let first = selector.initialize().await.active;
        let second = selector.initialize().await.active;
        assert_eq!(first, BackendKind::Postgres);
        assert_eq!(second, BackendKind::Postgres);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(selector.state().map(|s| s.active), Some(BackendKind::Postgres));
    }

    #[tokio::test]
    async fn test_concurrent_initialize_probes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let selector = Arc::new(StorageSelector::new(
            vec![Box::new(FlakyConnector {
                kind: BackendKind::Supabase,
                calls: calls.clone(),
            })],
            Duration::from_secs(1),
        ));

        let (a, b) = tokio::join!(selector.initialize(), selector.initialize());
        assert_eq!(a.active, BackendKind::Supabase);
        assert_eq!(b.active, BackendKind::Supabase);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_falls_back_in_priority_order() {
        let selector = StorageSelector::new(
            vec![
                Box::new(FailingConnector(BackendKind::Postgres)),
                Box::new(FailingConnector(BackendKind::Supabase)),
            ],
            Duration::from_secs(1),
        );

        let state = selector.initialize().await;
        assert_eq!(state.active, BackendKind::Memory);
        let backends: Vec<BackendKind> = state.probes.iter().map(|p| p.backend).collect();
        assert_eq!(
            backends,
            vec![BackendKind::Postgres, BackendKind::Supabase, BackendKind::Memory]
        );
        assert!(matches!(state.probes[0].status, ProbeStatus::Failed(_)));
        assert_eq!(state.probes[2].status, ProbeStatus::Connected);
    }

    #[tokio::test]
    async fn test_unconfigured_backends_are_skipped() {
        let selector = StorageSelector::from_config(&StorageConfig::default());
        let state = selector.initialize().await;
        assert_eq!(state.active, BackendKind::Memory);
        assert_eq!(state.probes[0].status, ProbeStatus::NotConfigured);
        assert_eq!(state.probes[1].status, ProbeStatus::NotConfigured);
    }

    #[tokio::test]
    async fn test_placeholder_supabase_credentials_fail_probe() {
        let config = StorageConfig {
            supabase_url: Some("https://your-project.supabase.co".into()),
            supabase_anon_key: Some("your-anon-key".into()),
            ..StorageConfig::default()
        };
        let state = StorageSelector::from_config(&config).initialize().await.clone();
        assert_eq!(state.active, BackendKind::Memory);
        assert!(matches!(state.probes[1].status, ProbeStatus::Failed(_)));
    }

    #[tokio::test]
    async fn test_slow_probe_times_out() {
        let selector = StorageSelector::new(vec![Box::new(HangingConnector)], Duration::from_millis(50));
        let state = selector.initialize().await;
        assert_eq!(state.active, BackendKind::Memory);
        match &state.probes[0].status {
            ProbeStatus::Failed(message) => assert!(message.contains("timed out")),
            other => panic!("unexpected probe status: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_crud_routes_to_active_backend() {
        let selector = StorageSelector::new(Vec::new(), Duration::from_secs(1));
        let created = selector
            .create_task(NewTask::new("Finish report").with_user("u1"))
            .await
            .unwrap();

        let tasks = selector.get_tasks(&TaskFilter::for_user("u1")).await.unwrap();
        assert!(tasks.iter().any(|t| t.summary == "Finish report"));

        selector.delete_task(&created.id).await.unwrap();
        assert!(matches!(
            selector.delete_task(&created.id).await,
            Err(Error::TaskNotFound(_))
        ));

        let health = selector.health_check().await;
        assert_eq!(health.backend, BackendKind::Memory);
        assert_eq!(health.status, StorageStatus::Connected);
    }

    /// Answers its probe, then fails every storage call.
    struct BrokenStore;

    impl BrokenStore {
        fn fail<T>(operation: &'static str) -> Result<T> {
            Err(Error::backend(BackendKind::Supabase, operation, "connection reset"))
        }
    }

    #[async_trait]
    impl TaskStore for BrokenStore {
        fn kind(&self) -> BackendKind {
            BackendKind::Supabase
        }

        async fn probe(&self) -> Result<()> {
            Ok(())
        }

        async fn create_task(&self, _task: NewTask) -> Result<Task> {
            Self::fail("create_task")
        }

        async fn get_tasks(&self, _filter: &TaskFilter) -> Result<Vec<Task>> {
            Self::fail("get_tasks")
        }

        async fn update_task(&self, _id: &TaskId, _patch: &TaskPatch) -> Result<Task> {
            Self::fail("update_task")
        }

        async fn delete_task(&self, _id: &TaskId) -> Result<()> {
            Self::fail("delete_task")
        }

        async fn clear_tasks(&self, _filter: &TaskFilter) -> Result<u64> {
            Self::fail("clear_tasks")
        }

        async fn save_chat_message(&self, _message: NewChatMessage) -> Result<ChatMessage> {
            Self::fail("save_chat_message")
        }

        async fn get_chat_history(&self, _user_id: Option<&str>, _limit: usize) -> Result<Vec<ChatMessage>> {
            Self::fail("get_chat_history")
        }

        async fn clear_chat_history(&self, _user_id: Option<&str>) -> Result<u64> {
            Self::fail("clear_chat_history")
        }
    }

    struct BrokenConnector;

    #[async_trait]
    impl BackendConnector for BrokenConnector {
        fn kind(&self) -> BackendKind {
            BackendKind::Supabase
        }

        fn is_configured(&self) -> bool {
            true
        }

        async fn connect(&self) -> Result<Arc<dyn TaskStore>> {
            Ok(Arc::new(BrokenStore))
        }
    }

    #[tokio::test]
    async fn test_runtime_failure_is_typed_and_not_retried() {
        let selector = StorageSelector::new(vec![Box::new(BrokenConnector)], Duration::from_secs(1));

        match selector.create_task(NewTask::new("Call dentist")).await {
            Err(Error::Backend {
                backend, operation, ..
            }) => {
                assert_eq!(backend, BackendKind::Supabase);
                assert_eq!(operation, "create_task");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        match selector.get_tasks(&TaskFilter::default()).await {
            Err(Error::Backend { operation, .. }) => assert_eq!(operation, "get_tasks"),
            other => panic!("unexpected result: {:?}", other),
        }

        let state = selector.state().unwrap();
        assert_eq!(state.active, BackendKind::Supabase);
        let probed: Vec<BackendKind> = state.probes.iter().map(|p| p.backend).collect();
        assert_eq!(probed, vec![BackendKind::Supabase]);

        let health = selector.health_check().await;
        assert_eq!(health.backend, BackendKind::Supabase);
        assert_eq!(health.status, StorageStatus::Connected);
        assert!(matches!(
            selector.get_tasks(&TaskFilter::default()).await,
            Err(Error::Backend { .. })
        ));
    }
}
