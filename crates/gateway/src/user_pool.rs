//! On-demand per-`(user, mcp)` connections with resource caps, idle
//! teardown, and a health-check loop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use shared::error::CommonError;
use tokio::sync::{Mutex, RwLock};

use crate::connection::{McpConnection, ToolInvocationResult, TransportConfig};

const DEFAULT_ERROR_THRESHOLD: u32 = 5;

pub struct UserPoolConfig {
    pub max_per_user: usize,
    pub max_total: usize,
    pub idle_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for UserPoolConfig {
    fn default() -> Self {
        Self {
            max_per_user: 8,
            max_total: 256,
            idle_timeout: Duration::from_secs(15 * 60),
            health_check_interval: Duration::from_secs(30),
        }
    }
}

struct Instance {
    connection: Arc<McpConnection>,
    last_used: Instant,
}

#[derive(Hash, PartialEq, Eq, Clone, Debug)]
struct InstanceKey {
    user_id: String,
    mcp_name: String,
}

/// Per-`(user,mcp)` instance table. Per-user locks (one `Mutex` per user via
/// the per-key entry lock below) prevent spawn/terminate races for the same
/// user, as required by the concurrency model.
pub struct PerUserMcpPool {
    instances: RwLock<HashMap<InstanceKey, Instance>>,
    spawn_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    total: AtomicUsize,
    config: UserPoolConfig,
}

impl PerUserMcpPool {
    pub fn new(config: UserPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            instances: RwLock::new(HashMap::new()),
            spawn_locks: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
            config,
        })
    }

    async fn lock_for_user(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.spawn_locks.lock().await;
        locks.entry(user_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn per_user_count(instances: &HashMap<InstanceKey, Instance>, user_id: &str) -> usize {
        instances.keys().filter(|k| k.user_id == user_id).count()
    }

    /// Returns the existing instance or spawns one, enforcing `max_per_user`
    /// and `max_total`. Exceeding either fails with
    /// `capacity_exceeded`, mapped by callers to HTTP 503.
    pub async fn get_or_spawn(
        self: &Arc<Self>,
        user_id: &str,
        mcp_name: &str,
        call_timeout: Option<Duration>,
        transport_factory: impl FnOnce() -> TransportConfig,
    ) -> Result<Arc<McpConnection>, CommonError> {
        let key = InstanceKey { user_id: user_id.to_string(), mcp_name: mcp_name.to_string() };

        if let Some(instance) = self.instances.read().await.get(&key) {
            return Ok(instance.connection.clone());
        }

        let user_lock = self.lock_for_user(user_id).await;
        let _guard = user_lock.lock().await;

        if let Some(instance) = self.instances.read().await.get(&key) {
            return Ok(instance.connection.clone());
        }

        {
            let instances = self.instances.read().await;
            if Self::per_user_count(&instances, user_id) >= self.config.max_per_user {
                return Err(CommonError::CapacityExceeded {
                    msg: format!("user {user_id} already has {} mcp instances", self.config.max_per_user),
                });
            }
        }
        if self.total.load(Ordering::SeqCst) >= self.config.max_total {
            return Err(CommonError::CapacityExceeded { msg: "pool is at max_total capacity".to_string() });
        }

        let connection = Arc::new(McpConnection::new(mcp_name, transport_factory(), call_timeout));
        connection.start().await?;

        self.instances.write().await.insert(key, Instance { connection: connection.clone(), last_used: Instant::now() });
        self.total.fetch_add(1, Ordering::SeqCst);
        Ok(connection)
    }

    pub async fn invoke_tool(
        self: &Arc<Self>,
        user_id: &str,
        mcp_name: &str,
        tool_name: &str,
        args: serde_json::Value,
        call_timeout: Option<Duration>,
        transport_factory: impl FnOnce() -> TransportConfig,
    ) -> Result<ToolInvocationResult, CommonError> {
        let connection = self.get_or_spawn(user_id, mcp_name, call_timeout, transport_factory).await?;
        let key = InstanceKey { user_id: user_id.to_string(), mcp_name: mcp_name.to_string() };
        if let Some(instance) = self.instances.write().await.get_mut(&key) {
            instance.last_used = Instant::now();
        }
        connection.invoke_tool(tool_name, args).await
    }

    /// Stops every instance belonging to `user_id`. Called on credential
    /// change, user suspension, or session termination.
    pub async fn terminate_for_user(&self, user_id: &str) {
        let mut instances = self.instances.write().await;
        let keys: Vec<InstanceKey> = instances.keys().filter(|k| k.user_id == user_id).cloned().collect();
        for key in keys {
            if let Some(instance) = instances.remove(&key) {
                let _ = instance.connection.stop().await;
                self.total.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    pub async fn terminate_for_mcp(&self, mcp_name: &str) {
        let mut instances = self.instances.write().await;
        let keys: Vec<InstanceKey> = instances.keys().filter(|k| k.mcp_name == mcp_name).cloned().collect();
        for key in keys {
            if let Some(instance) = instances.remove(&key) {
                let _ = instance.connection.stop().await;
                self.total.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    async fn reap_idle(&self) {
        let now = Instant::now();
        let mut instances = self.instances.write().await;
        let stale: Vec<InstanceKey> = instances
            .iter()
            .filter(|(_, instance)| now.duration_since(instance.last_used) > self.config.idle_timeout)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            if let Some(instance) = instances.remove(&key) {
                let _ = instance.connection.stop().await;
                self.total.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    async fn run_health_pass(&self, error_threshold: u32) {
        let snapshot: Vec<(InstanceKey, Arc<McpConnection>)> = self
            .instances
            .read()
            .await
            .iter()
            .map(|(k, instance)| (k.clone(), instance.connection.clone()))
            .collect();

        for (key, connection) in snapshot {
            let status = connection.health_check().await;
            if !status.healthy && connection.error_count.load(Ordering::SeqCst) >= error_threshold {
                tracing::warn!(user = %key.user_id, mcp = %key.mcp_name, "restarting per-user mcp connection after repeated health check failures");
                let _ = connection.stop().await;
                self.instances.write().await.remove(&key);
                self.total.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }

    /// Spawns the idle-reaper and health-check loops; both run for the
    /// lifetime of the pool.
    pub fn spawn_background_loops(self: &Arc<Self>) {
        let pool = self.clone();
        let idle_timeout = self.config.idle_timeout;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(idle_timeout / 4);
            loop {
                ticker.tick().await;
                pool.reap_idle().await;
            }
        });

        let pool = self.clone();
        let interval = self.config.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                pool.run_health_pass(DEFAULT_ERROR_THRESHOLD).await;
            }
        });
    }

    pub async fn shutdown(&self) {
        let mut instances = self.instances.write().await;
        for (_, instance) in instances.drain() {
            let _ = instance.connection.stop().await;
        }
        self.total.store(0, Ordering::SeqCst);
    }

    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }
}
