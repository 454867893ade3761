//! End-to-end engine tests against a scripted in-memory gateway.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use dirsync_core::{
    DirectoryPrincipal, GatewayError, GatewayResult, NewUser, Page, PageCursor, RemoteGroup,
    RemoteId, RemoteUser, SyncSettings, TestOpsGateway, UserChanges,
};
use dirsync_engine::{
    compute_plan, fetch_remote_snapshot, ChangeOp, ConvergenceExecutor, PlanOptions, SkipReason,
};

/// In-memory TestOps double. Failures are scripted per call site and popped
/// in order; writes are applied to the in-memory state unless the scripted
/// error models a request that never reached the remote.
#[derive(Default)]
struct MockGateway {
    users: Mutex<HashMap<String, RemoteUser>>,
    groups: Mutex<HashMap<String, RemoteGroup>>,
    // keyed by "call:target", e.g. "create_user:u1"
    scripted: Mutex<HashMap<String, VecDeque<ScriptedError>>>,
    calls: Mutex<Vec<String>>,
    next_id: AtomicU64,
}

/// A scripted failure. `LostResponse` applies the write anyway, modeling a
/// request that landed but whose response was lost on the wire.
enum ScriptedError {
    RateLimited(u64),
    ValidationFailed,
    LostResponse,
}

impl ScriptedError {
    fn to_error(&self) -> GatewayError {
        match self {
            ScriptedError::RateLimited(secs) => GatewayError::RateLimited {
                retry_after_secs: Some(*secs),
            },
            ScriptedError::ValidationFailed => {
                GatewayError::ValidationFailed("rejected by remote".into())
            }
            ScriptedError::LostResponse => GatewayError::network("response lost"),
        }
    }
}

impl MockGateway {
    fn new() -> Self {
        Self::default()
    }

    fn script(&self, key: &str, errors: Vec<ScriptedError>) {
        self.scripted
            .lock()
            .unwrap()
            .insert(key.to_string(), errors.into());
    }

    fn pop_scripted(&self, key: &str) -> Option<ScriptedError> {
        self.scripted
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front)
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn fresh_id(&self) -> RemoteId {
        RemoteId::new(format!("r{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn seed_user(&self, external_id: &str) -> RemoteId {
        let id = self.fresh_id();
        self.users.lock().unwrap().insert(
            external_id.to_string(),
            RemoteUser {
                id: id.clone(),
                external_id: Some(external_id.to_string()),
                display_name: format!("User {external_id}"),
                email: format!("{external_id}@example.com"),
                managed: true,
            },
        );
        id
    }

    fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn insert_user(&self, user: &NewUser) -> RemoteUser {
        let created = RemoteUser {
            id: self.fresh_id(),
            external_id: Some(user.external_id.clone()),
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            managed: true,
        };
        self.users
            .lock()
            .unwrap()
            .insert(user.external_id.clone(), created.clone());
        created
    }
}

#[async_trait]
impl TestOpsGateway for MockGateway {
    async fn list_users(&self, cursor: Option<&str>) -> GatewayResult<Page<RemoteUser>> {
        // One item per page to exercise cursor draining.
        let mut users: Vec<RemoteUser> = self.users.lock().unwrap().values().cloned().collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        let offset: usize = cursor.map_or(0, |c| c.parse().unwrap());
        match users.get(offset) {
            None => Ok(Page::last(vec![])),
            Some(user) => Ok(Page {
                items: vec![user.clone()],
                next: if offset + 1 < users.len() {
                    PageCursor::More((offset + 1).to_string())
                } else {
                    PageCursor::Done
                },
            }),
        }
    }

    async fn list_groups(&self, cursor: Option<&str>) -> GatewayResult<Page<RemoteGroup>> {
        let mut groups: Vec<RemoteGroup> = self.groups.lock().unwrap().values().cloned().collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        let offset: usize = cursor.map_or(0, |c| c.parse().unwrap());
        match groups.get(offset) {
            None => Ok(Page::last(vec![])),
            Some(group) => Ok(Page {
                items: vec![group.clone()],
                next: if offset + 1 < groups.len() {
                    PageCursor::More((offset + 1).to_string())
                } else {
                    PageCursor::Done
                },
            }),
        }
    }

    async fn create_user(&self, user: &NewUser, _key: &str) -> GatewayResult<RemoteUser> {
        self.record(&format!("create_user:{}", user.external_id));
        if let Some(err) = self.pop_scripted(&format!("create_user:{}", user.external_id)) {
            if matches!(err, ScriptedError::LostResponse) {
                self.insert_user(user);
            }
            return Err(err.to_error());
        }
        if self.users.lock().unwrap().contains_key(&user.external_id) {
            return Err(GatewayError::Conflict(format!(
                "user {} already exists",
                user.external_id
            )));
        }
        Ok(self.insert_user(user))
    }

    async fn update_user(&self, id: &RemoteId, changes: &UserChanges) -> GatewayResult<()> {
        self.record(&format!("update_user:{id}"));
        let mut users = self.users.lock().unwrap();
        let user = users
            .values_mut()
            .find(|u| &u.id == id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        if let Some(name) = &changes.display_name {
            user.display_name = name.clone();
        }
        if let Some(email) = &changes.email {
            user.email = email.clone();
        }
        Ok(())
    }

    async fn delete_user(&self, id: &RemoteId) -> GatewayResult<()> {
        self.record(&format!("delete_user:{id}"));
        if let Some(err) = self.pop_scripted(&format!("delete_user:{id}")) {
            return Err(err.to_error());
        }
        let mut users = self.users.lock().unwrap();
        let key = users
            .iter()
            .find(|(_, u)| &u.id == id)
            .map(|(k, _)| k.clone())
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        users.remove(&key);
        Ok(())
    }

    async fn create_group(&self, name: &str, _key: &str) -> GatewayResult<RemoteGroup> {
        self.record(&format!("create_group:{name}"));
        if let Some(err) = self.pop_scripted(&format!("create_group:{name}")) {
            return Err(err.to_error());
        }
        let mut groups = self.groups.lock().unwrap();
        if groups.contains_key(name) {
            return Err(GatewayError::Conflict(format!("group {name} already exists")));
        }
        let created = RemoteGroup {
            id: self.fresh_id(),
            name: name.to_string(),
            managed: true,
            members: BTreeSet::new(),
        };
        groups.insert(name.to_string(), created.clone());
        Ok(created)
    }

    async fn add_member(&self, group: &RemoteId, user: &RemoteId) -> GatewayResult<()> {
        self.record(&format!("add_member:{group}:{user}"));
        let mut groups = self.groups.lock().unwrap();
        let group = groups
            .values_mut()
            .find(|g| &g.id == group)
            .ok_or_else(|| GatewayError::NotFound(group.to_string()))?;
        if !group.members.insert(user.clone()) {
            return Err(GatewayError::Conflict("already a member".into()));
        }
        Ok(())
    }

    async fn remove_member(&self, group: &RemoteId, user: &RemoteId) -> GatewayResult<()> {
        self.record(&format!("remove_member:{group}:{user}"));
        let mut groups = self.groups.lock().unwrap();
        let group = groups
            .values_mut()
            .find(|g| &g.id == group)
            .ok_or_else(|| GatewayError::NotFound(group.to_string()))?;
        if !group.members.remove(user) {
            return Err(GatewayError::NotFound("not a member".into()));
        }
        Ok(())
    }

    async fn find_user_by_external_id(
        &self,
        external_id: &str,
    ) -> GatewayResult<Option<RemoteUser>> {
        Ok(self.users.lock().unwrap().get(external_id).cloned())
    }

    async fn find_group_by_name(&self, name: &str) -> GatewayResult<Option<RemoteGroup>> {
        Ok(self.groups.lock().unwrap().get(name).cloned())
    }
}

fn principal(external_id: &str, groups: &[&str]) -> DirectoryPrincipal {
    DirectoryPrincipal {
        external_id: external_id.to_string(),
        display_name: format!("User {external_id}"),
        email: format!("{external_id}@example.com"),
        groups: groups.iter().map(ToString::to_string).collect(),
    }
}

fn fast_settings() -> SyncSettings {
    SyncSettings {
        max_retries: 3,
        backoff_base_secs: 0,
        ..SyncSettings::default()
    }
}

#[tokio::test]
async fn full_run_then_idempotent_replan() {
    let gateway = Arc::new(MockGateway::new());
    let directory = [principal("u1", &["QA"])];

    let remote = fetch_remote_snapshot(gateway.as_ref()).await.unwrap();
    let plan = compute_plan(&directory, &remote, &PlanOptions::default());
    assert_eq!(plan.pending_ops(), 3);

    let executor = ConvergenceExecutor::new(gateway.clone(), fast_settings());
    let report = executor.apply(plan).await;
    assert!(report.is_success(), "failures: {:?}", report.failed);
    assert_eq!(report.applied.len(), 3);

    // Re-deriving the plan from the converged remote yields no work.
    let remote = fetch_remote_snapshot(gateway.as_ref()).await.unwrap();
    let replan = compute_plan(&directory, &remote, &PlanOptions::default());
    assert!(replan.is_converged(), "unexpected ops: {:?}", replan.ops);
}

#[tokio::test]
async fn creates_complete_before_memberships_dispatch() {
    let gateway = Arc::new(MockGateway::new());
    let directory = [principal("u1", &["QA"]), principal("u2", &["QA"])];

    let remote = fetch_remote_snapshot(gateway.as_ref()).await.unwrap();
    let plan = compute_plan(&directory, &remote, &PlanOptions::default());
    let report = ConvergenceExecutor::new(gateway.clone(), fast_settings())
        .apply(plan)
        .await;
    assert!(report.is_success());

    let calls = gateway.calls.lock().unwrap().clone();
    let last_create = calls
        .iter()
        .rposition(|c| c.starts_with("create_"))
        .unwrap();
    let first_member = calls
        .iter()
        .position(|c| c.starts_with("add_member"))
        .unwrap();
    assert!(
        last_create < first_member,
        "memberships dispatched before creates finished: {calls:?}"
    );
}

#[tokio::test]
async fn one_permanent_failure_never_aborts_the_plan() {
    let gateway = Arc::new(MockGateway::new());
    gateway.script("create_user:u2", vec![ScriptedError::ValidationFailed]);
    let directory = [
        principal("u1", &["QA"]),
        principal("u2", &["QA"]),
        principal("u3", &["QA"]),
    ];

    let remote = fetch_remote_snapshot(gateway.as_ref()).await.unwrap();
    let plan = compute_plan(&directory, &remote, &PlanOptions::default());
    let total = plan.pending_ops();
    let report = ConvergenceExecutor::new(gateway.clone(), fast_settings())
        .apply(plan)
        .await;

    // u2's create fails permanently, and u2's membership cannot resolve;
    // every other op still reaches a terminal, reported state.
    assert!(!report.incomplete);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.applied.len() + report.failed.len(), total);
    assert_eq!(report.failed[0].error_kind, "VALIDATION_FAILED");
    assert!(gateway
        .find_user_by_external_id("u1")
        .await
        .unwrap()
        .is_some());
    assert!(gateway
        .find_user_by_external_id("u3")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test(start_paused = true)]
async fn rate_limited_create_retries_without_duplicating() {
    let gateway = Arc::new(MockGateway::new());
    gateway.script(
        "create_user:u1",
        vec![ScriptedError::RateLimited(2), ScriptedError::RateLimited(2)],
    );
    let directory = [principal("u1", &[])];

    let remote = fetch_remote_snapshot(gateway.as_ref()).await.unwrap();
    let plan = compute_plan(&directory, &remote, &PlanOptions::default());

    let start = tokio::time::Instant::now();
    let report = ConvergenceExecutor::new(gateway.clone(), fast_settings())
        .apply(plan)
        .await;
    let elapsed = start.elapsed();

    assert!(report.is_success(), "failures: {:?}", report.failed);
    assert_eq!(report.applied.len(), 1);
    assert_eq!(gateway.user_count(), 1);
    // Two Retry-After waits of 2s each.
    assert!(elapsed >= std::time::Duration::from_secs(4), "elapsed {elapsed:?}");
    assert_eq!(gateway.calls_matching("create_user:u1").len(), 3);
}

#[tokio::test]
async fn lost_create_response_resolved_by_precheck() {
    let gateway = Arc::new(MockGateway::new());
    // The first create lands remotely but its response is lost.
    gateway.script("create_user:u1", vec![ScriptedError::LostResponse]);
    let directory = [principal("u1", &["QA"])];

    let remote = fetch_remote_snapshot(gateway.as_ref()).await.unwrap();
    let plan = compute_plan(&directory, &remote, &PlanOptions::default());
    let report = ConvergenceExecutor::new(gateway.clone(), fast_settings())
        .apply(plan)
        .await;

    assert!(report.is_success(), "failures: {:?}", report.failed);
    assert_eq!(gateway.user_count(), 1, "duplicate user created");
    // The create was issued once; the retry resolved via pre-check.
    assert_eq!(gateway.calls_matching("create_user:u1").len(), 1);
    // The membership op still resolved the user id from the pre-check.
    let groups = gateway.groups.lock().unwrap();
    assert_eq!(groups.get("QA").unwrap().members.len(), 1);
}

#[tokio::test]
async fn absent_user_reported_skipped_and_untouched() {
    let gateway = Arc::new(MockGateway::new());
    gateway.seed_user("u2");

    let remote = fetch_remote_snapshot(gateway.as_ref()).await.unwrap();
    let plan = compute_plan(&[], &remote, &PlanOptions::default());
    let report = ConvergenceExecutor::new(gateway.clone(), fast_settings())
        .apply(plan)
        .await;

    assert!(report.is_success());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].reason, SkipReason::PruneDisabled);
    assert!(matches!(
        report.skipped[0].op,
        ChangeOp::DeleteUser { ref external_id, .. } if external_id == "u2"
    ));
    assert_eq!(gateway.user_count(), 1, "remote user must stay untouched");
}

#[tokio::test]
async fn prune_mode_deletes_absent_users() {
    let gateway = Arc::new(MockGateway::new());
    gateway.seed_user("u2");

    let remote = fetch_remote_snapshot(gateway.as_ref()).await.unwrap();
    let plan = compute_plan(&[], &remote, &PlanOptions { prune_absent: true });
    let report = ConvergenceExecutor::new(gateway.clone(), fast_settings())
        .apply(plan)
        .await;

    assert!(report.is_success());
    assert_eq!(report.applied.len(), 1);
    assert_eq!(gateway.user_count(), 0);
}

#[tokio::test]
async fn cancellation_skips_undispatched_ops() {
    let gateway = Arc::new(MockGateway::new());
    let directory = [principal("u1", &["QA"])];

    let remote = fetch_remote_snapshot(gateway.as_ref()).await.unwrap();
    let plan = compute_plan(&directory, &remote, &PlanOptions::default());
    let total = plan.pending_ops();

    let executor = ConvergenceExecutor::new(gateway.clone(), fast_settings());
    executor.cancellation().cancel();
    let report = executor.apply(plan).await;

    assert!(report.incomplete);
    assert!(report.applied.is_empty());
    assert_eq!(report.skipped.len(), total);
    assert!(report
        .skipped
        .iter()
        .all(|s| s.reason == SkipReason::Cancelled));
    assert_eq!(gateway.user_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_stops_dispatch_of_later_batches() {
    let gateway = Arc::new(MockGateway::new());
    // The create batch outlives the deadline: one rate-limit wait of 10s
    // against a 5s run deadline.
    gateway.script("create_user:u1", vec![ScriptedError::RateLimited(10)]);
    gateway.seed_user("gone");
    let directory = [principal("u1", &[])];

    let remote = fetch_remote_snapshot(gateway.as_ref()).await.unwrap();
    let plan = compute_plan(&directory, &remote, &PlanOptions { prune_absent: true });

    let settings = SyncSettings {
        deadline_secs: Some(5),
        ..fast_settings()
    };
    let report = ConvergenceExecutor::new(gateway.clone(), settings)
        .apply(plan)
        .await;

    // The in-flight create finishes and is reported applied; the delete
    // batch is never dispatched.
    assert!(report.incomplete);
    assert_eq!(report.applied.len(), 1);
    assert!(matches!(report.applied[0], ChangeOp::CreateUser { .. }));
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].reason, SkipReason::Cancelled);
    assert!(matches!(
        report.skipped[0].op,
        ChangeOp::DeleteUser { ref external_id, .. } if external_id == "gone"
    ));
    assert!(gateway
        .find_user_by_external_id("gone")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn exhausted_majority_aborts_following_batches() {
    let gateway = Arc::new(MockGateway::new());
    // Every create attempt for u1 is rate limited; the retry budget runs
    // out, which is a majority (1 of 1) of the create batch.
    gateway.script(
        "create_user:u1",
        vec![
            ScriptedError::RateLimited(0),
            ScriptedError::RateLimited(0),
            ScriptedError::RateLimited(0),
            ScriptedError::RateLimited(0),
        ],
    );
    let directory = [principal("u1", &[])];
    // Seed a managed absentee so there is a delete batch to abort.
    gateway.seed_user("gone");
    let remote = fetch_remote_snapshot(gateway.as_ref()).await.unwrap();

    let plan = compute_plan(&directory, &remote, &PlanOptions { prune_absent: true });
    let report = ConvergenceExecutor::new(gateway.clone(), fast_settings())
        .apply(plan)
        .await;

    assert!(report.incomplete);
    assert_eq!(report.failed.len(), 1);
    assert!(report
        .skipped
        .iter()
        .any(|s| s.reason == SkipReason::RunAborted));
    // The delete was never dispatched.
    assert_eq!(gateway.user_count(), 1);
}
