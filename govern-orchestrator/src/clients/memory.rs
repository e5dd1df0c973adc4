//! In-memory collaborators.
//!
//! They keep the same "already exists" / "not found" behavior as the real
//! systems and count side effects, which is what idempotence tests assert on.
//! The service binary also uses [`MemoryIam`] when no cloud IAM backend is
//! configured.

use super::{
    ClientError, ClientResult, Clients, DiscoveryStatus, IamClient, JobStatus, KubeClient,
    ReleaseSpec, ReleaseStatus, SchedulerClient, VaultClient,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct IamState {
    roles: HashMap<String, HashSet<String>>,
    roles_created: usize,
    policies_attached: usize,
    injected: VecDeque<ClientError>,
}

#[derive(Debug, Default)]
pub struct MemoryIam {
    state: Mutex<IamState>,
}

impl MemoryIam {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next IAM call fail with `err`.
    pub fn fail_next(&self, err: ClientError) {
        lock(&self.state).injected.push_back(err);
    }

    pub fn role_names(&self) -> Vec<String> {
        let mut names: Vec<_> = lock(&self.state).roles.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn attached_policies(&self, role_name: &str) -> Vec<String> {
        let mut policies: Vec<_> = lock(&self.state)
            .roles
            .get(role_name)
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default();
        policies.sort();
        policies
    }

    /// Number of roles actually created (already-exists calls are not counted)
    pub fn roles_created(&self) -> usize {
        lock(&self.state).roles_created
    }

    pub fn policies_attached(&self) -> usize {
        lock(&self.state).policies_attached
    }
}

#[async_trait]
impl IamClient for MemoryIam {
    async fn create_role(&self, role_name: &str, _trust_policy: &str) -> ClientResult<()> {
        let mut state = lock(&self.state);
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        if state.roles.contains_key(role_name) {
            return Err(ClientError::AlreadyExists(format!("role {}", role_name)));
        }
        state.roles.insert(role_name.to_string(), HashSet::new());
        state.roles_created += 1;
        Ok(())
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> ClientResult<()> {
        let mut state = lock(&self.state);
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        let policies = state
            .roles
            .get_mut(role_name)
            .ok_or_else(|| ClientError::NotFound(format!("role {}", role_name)))?;
        // Attaching an attached policy is a no-op in IAM
        if policies.insert(policy_arn.to_string()) {
            state.policies_attached += 1;
        }
        Ok(())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> ClientResult<()> {
        let mut state = lock(&self.state);
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        let policies = state
            .roles
            .get_mut(role_name)
            .ok_or_else(|| ClientError::NotFound(format!("role {}", role_name)))?;
        if !policies.remove(policy_arn) {
            return Err(ClientError::NotFound(format!(
                "policy {} on {}",
                policy_arn, role_name
            )));
        }
        Ok(())
    }

    async fn delete_role(&self, role_name: &str) -> ClientResult<()> {
        let mut state = lock(&self.state);
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        match state.roles.get(role_name) {
            None => Err(ClientError::NotFound(format!("role {}", role_name))),
            Some(policies) if !policies.is_empty() => Err(ClientError::Rejected(format!(
                "role {} still has attached policies",
                role_name
            ))),
            Some(_) => {
                state.roles.remove(role_name);
                Ok(())
            }
        }
    }
}

#[derive(Debug, Default)]
struct KubeState {
    namespaces: HashSet<String>,
    releases: HashMap<(String, String), (ReleaseSpec, ReleaseStatus)>,
    namespaces_created: usize,
    releases_applied: usize,
    injected: VecDeque<ClientError>,
}

#[derive(Debug)]
pub struct MemoryKube {
    state: Mutex<KubeState>,
    initial_release_status: ReleaseStatus,
    latency: Duration,
}

impl Default for MemoryKube {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            initial_release_status: ReleaseStatus::Ready,
            latency: Duration::ZERO,
        }
    }
}

impl MemoryKube {
    /// Releases become ready as soon as they are applied.
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases stay `Progressing` until [`MemoryKube::set_release_status`] says otherwise.
    pub fn progressing() -> Self {
        Self {
            initial_release_status: ReleaseStatus::Progressing,
            ..Self::default()
        }
    }

    /// Every call takes `latency` before it touches the cluster state.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn respond(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    pub fn fail_next(&self, err: ClientError) {
        lock(&self.state).injected.push_back(err);
    }

    pub fn set_release_status(&self, namespace: &str, name: &str, status: ReleaseStatus) {
        let mut state = lock(&self.state);
        if let Some(entry) = state
            .releases
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            entry.1 = status;
        }
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        lock(&self.state).namespaces.contains(name)
    }

    pub fn release(&self, namespace: &str, name: &str) -> Option<ReleaseSpec> {
        lock(&self.state)
            .releases
            .get(&(namespace.to_string(), name.to_string()))
            .map(|(spec, _)| spec.clone())
    }

    pub fn namespaces_created(&self) -> usize {
        lock(&self.state).namespaces_created
    }

    pub fn releases_applied(&self) -> usize {
        lock(&self.state).releases_applied
    }
}

#[async_trait]
impl KubeClient for MemoryKube {
    async fn create_namespace(&self, name: &str) -> ClientResult<()> {
        self.respond().await;
        let mut state = lock(&self.state);
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        if !state.namespaces.insert(name.to_string()) {
            return Err(ClientError::AlreadyExists(format!("namespace {}", name)));
        }
        state.namespaces_created += 1;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> ClientResult<()> {
        self.respond().await;
        let mut state = lock(&self.state);
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        if !state.namespaces.remove(name) {
            return Err(ClientError::NotFound(format!("namespace {}", name)));
        }
        state.releases.retain(|(ns, _), _| ns != name);
        Ok(())
    }

    async fn apply_release(&self, release: &ReleaseSpec) -> ClientResult<()> {
        self.respond().await;
        let mut state = lock(&self.state);
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        if !state.namespaces.contains(&release.namespace) {
            return Err(ClientError::Rejected(format!(
                "namespace {} does not exist",
                release.namespace
            )));
        }
        let key = (release.namespace.clone(), release.name.clone());
        if state.releases.contains_key(&key) {
            return Err(ClientError::AlreadyExists(format!(
                "release {}/{}",
                release.namespace, release.name
            )));
        }
        let status = self.initial_release_status.clone();
        state.releases.insert(key, (release.clone(), status));
        state.releases_applied += 1;
        Ok(())
    }

    async fn release_status(&self, namespace: &str, name: &str) -> ClientResult<ReleaseStatus> {
        self.respond().await;
        let mut state = lock(&self.state);
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        state
            .releases
            .get(&(namespace.to_string(), name.to_string()))
            .map(|(_, status)| status.clone())
            .ok_or_else(|| ClientError::NotFound(format!("release {}/{}", namespace, name)))
    }

    async fn delete_release(&self, namespace: &str, name: &str) -> ClientResult<()> {
        self.respond().await;
        let mut state = lock(&self.state);
        if let Some(err) = state.injected.pop_front() {
            return Err(err);
        }
        state
            .releases
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("release {}/{}", namespace, name)))
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    discovery: HashMap<String, DiscoveryStatus>,
    jobs: HashMap<i64, JobStatus>,
    next_job_id: i64,
    jobs_triggered: usize,
}

#[derive(Debug)]
pub struct MemoryScheduler {
    state: Mutex<SchedulerState>,
    default_discovery: DiscoveryStatus,
    default_job: JobStatus,
}

impl Default for MemoryScheduler {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            default_discovery: DiscoveryStatus::Completed,
            default_job: JobStatus::Succeeded,
        }
    }
}

impl MemoryScheduler {
    /// Discovery is complete and jobs succeed immediately.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discovery stays in progress and jobs stay queued until told otherwise.
    pub fn pending() -> Self {
        Self {
            state: Mutex::default(),
            default_discovery: DiscoveryStatus::InProgress,
            default_job: JobStatus::Queued,
        }
    }

    pub fn set_discovery_status(&self, workspace_handle: &str, status: DiscoveryStatus) {
        lock(&self.state)
            .discovery
            .insert(workspace_handle.to_string(), status);
    }

    pub fn set_job_status(&self, job_id: i64, status: JobStatus) {
        lock(&self.state).jobs.insert(job_id, status);
    }

    pub fn jobs_triggered(&self) -> usize {
        lock(&self.state).jobs_triggered
    }
}

#[async_trait]
impl SchedulerClient for MemoryScheduler {
    async fn discovery_status(&self, workspace_handle: &str) -> ClientResult<DiscoveryStatus> {
        Ok(lock(&self.state)
            .discovery
            .get(workspace_handle)
            .copied()
            .unwrap_or(self.default_discovery))
    }

    async fn trigger_analytics_job(&self, _workspace_handle: &str) -> ClientResult<i64> {
        let mut state = lock(&self.state);
        state.next_job_id += 1;
        state.jobs_triggered += 1;
        let id = state.next_job_id;
        state.jobs.insert(id, self.default_job);
        Ok(id)
    }

    async fn analytics_job_status(
        &self,
        _workspace_handle: &str,
        job_id: i64,
    ) -> ClientResult<JobStatus> {
        lock(&self.state)
            .jobs
            .get(&job_id)
            .copied()
            .ok_or_else(|| ClientError::NotFound(format!("analytics job {}", job_id)))
    }
}

#[derive(Debug, Default)]
struct VaultState {
    secrets: HashMap<String, serde_json::Value>,
    writes: usize,
}

#[derive(Debug, Default)]
pub struct MemoryVault {
    state: Mutex<VaultState>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &str, data: serde_json::Value) {
        lock(&self.state).secrets.insert(path.to_string(), data);
    }

    pub fn get(&self, path: &str) -> Option<serde_json::Value> {
        lock(&self.state).secrets.get(path).cloned()
    }

    pub fn writes(&self) -> usize {
        lock(&self.state).writes
    }
}

#[async_trait]
impl VaultClient for MemoryVault {
    async fn secret_exists(&self, path: &str) -> ClientResult<bool> {
        Ok(lock(&self.state).secrets.contains_key(path))
    }

    async fn put_secret(&self, path: &str, data: &serde_json::Value) -> ClientResult<()> {
        let mut state = lock(&self.state);
        state.secrets.insert(path.to_string(), data.clone());
        state.writes += 1;
        Ok(())
    }

    async fn delete_secret(&self, path: &str) -> ClientResult<()> {
        lock(&self.state)
            .secrets
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(format!("secret {}", path)))
    }
}

/// Concrete handles to every in-memory collaborator.
#[derive(Clone, Default)]
pub struct MemoryClients {
    pub iam: Arc<MemoryIam>,
    pub kube: Arc<MemoryKube>,
    pub scheduler: Arc<MemoryScheduler>,
    pub vault: Arc<MemoryVault>,
}

impl MemoryClients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clients(&self) -> Clients {
        Clients {
            iam: self.iam.clone(),
            kube: self.kube.clone(),
            scheduler: self.scheduler.clone(),
            vault: self.vault.clone(),
        }
    }
}
