//! Diff engine: computes the set-difference between the directory snapshot
//! and the remote snapshot as an ordered [`ChangePlan`].
//!
//! `compute_plan` is a pure function of its two input snapshots: identical
//! snapshots always produce an identical plan, and converged snapshots
//! produce an empty one.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::{debug, warn};

use dirsync_core::{
    DirectoryPrincipal, NewUser, RemoteGroup, RemoteId, RemoteSnapshot, RemoteUser, UserChanges,
};

use crate::plan::{Anomaly, ChangeOp, ChangePlan, PlannedOp, SkipReason};

/// Options influencing plan generation.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Emit `DeleteUser` for managed remote users absent from the
    /// directory. When disabled (the default) a skip-tagged entry is
    /// retained for reporting instead.
    pub prune_absent: bool,
}

/// Compute the ordered change plan converging `remote` towards `directory`.
///
/// Ordering invariant: all `CreateGroup`/`CreateUser`/`UpdateUser` ops come
/// first, then membership ops, then deletes. Anomalous entities (duplicate
/// correlation keys, unmanaged collisions) are excluded from the plan and
/// surfaced in [`ChangePlan::anomalies`].
#[must_use]
pub fn compute_plan(
    directory: &[DirectoryPrincipal],
    remote: &RemoteSnapshot,
    options: &PlanOptions,
) -> ChangePlan {
    let mut anomalies = Vec::new();

    // Duplicate external ids within the directory snapshot: both entries
    // are excluded and reported, never processed.
    let mut dir_counts: HashMap<&str, usize> = HashMap::new();
    for principal in directory {
        *dir_counts.entry(principal.external_id.as_str()).or_default() += 1;
    }
    let mut dup_dir_ids: Vec<&str> = dir_counts
        .iter()
        .filter(|(_, n)| **n > 1)
        .map(|(id, _)| *id)
        .collect();
    dup_dir_ids.sort_unstable();
    for id in &dup_dir_ids {
        warn!(external_id = %id, "duplicate external id in directory snapshot, excluding");
        anomalies.push(Anomaly::DuplicateDirectoryId {
            external_id: (*id).to_string(),
        });
    }
    let dup_dir_ids: HashSet<&str> = dup_dir_ids.into_iter().collect();

    // Every external id seen in the directory, duplicates included; used
    // to decide prune eligibility (an anomalous principal still blocks a
    // delete of its remote counterpart).
    let all_dir_ids: HashSet<&str> = directory
        .iter()
        .map(|p| p.external_id.as_str())
        .collect();

    // Index managed remote users by correlation key. A collision on the
    // remote side is a reportable anomaly, not a silent merge.
    let mut users_by_external: HashMap<&str, &RemoteUser> = HashMap::new();
    let mut remote_dup_ids: BTreeSet<&str> = BTreeSet::new();
    for user in remote.users.iter().filter(|u| u.managed) {
        let Some(external_id) = user.external_id.as_deref() else {
            continue;
        };
        if users_by_external.insert(external_id, user).is_some() {
            remote_dup_ids.insert(external_id);
        }
    }
    for id in &remote_dup_ids {
        warn!(external_id = %id, "two managed remote users share one external id, excluding");
        anomalies.push(Anomaly::DuplicateRemoteCorrelation {
            external_id: (*id).to_string(),
        });
        users_by_external.remove(id);
    }

    // Deterministic iteration order over valid principals. A principal
    // whose external id is anomalous on either side is not processed.
    let principals: BTreeMap<&str, &DirectoryPrincipal> = directory
        .iter()
        .filter(|p| !dup_dir_ids.contains(p.external_id.as_str()))
        .filter(|p| !remote_dup_ids.contains(p.external_id.as_str()))
        .map(|p| (p.external_id.as_str(), p))
        .collect();

    let users_by_id: HashMap<&RemoteId, &RemoteUser> =
        remote.users.iter().map(|u| (&u.id, u)).collect();
    let groups_by_name: HashMap<&str, &RemoteGroup> =
        remote.groups.iter().map(|g| (g.name.as_str(), g)).collect();

    // Current membership of each remote user across managed groups.
    let mut memberships: HashMap<&RemoteId, BTreeSet<&str>> = HashMap::new();
    for group in remote.groups.iter().filter(|g| g.managed) {
        for member in &group.members {
            memberships
                .entry(member)
                .or_default()
                .insert(group.name.as_str());
        }
    }

    // Groups referenced by directory membership. Existing unmanaged groups
    // with a colliding name are suppressed entirely.
    let needed_groups: BTreeSet<&str> = principals
        .values()
        .flat_map(|p| p.groups.iter().map(String::as_str))
        .collect();
    let mut suppressed_groups: HashSet<&str> = HashSet::new();
    let mut ops = Vec::new();
    for name in &needed_groups {
        match groups_by_name.get(name) {
            Some(group) if !group.managed => {
                warn!(group = %name, "directory group collides with unmanaged remote group");
                anomalies.push(Anomaly::UnmanagedGroupCollision {
                    group_name: (*name).to_string(),
                });
                suppressed_groups.insert(name);
            }
            Some(_) => {}
            None => ops.push(PlannedOp::apply(ChangeOp::CreateGroup {
                name: (*name).to_string(),
            })),
        }
    }

    // User creates and field updates.
    for (external_id, principal) in &principals {
        match users_by_external.get(external_id) {
            None => ops.push(PlannedOp::apply(ChangeOp::CreateUser {
                user: NewUser {
                    external_id: (*external_id).to_string(),
                    display_name: principal.display_name.clone(),
                    email: principal.email.clone(),
                },
            })),
            Some(user) => {
                let changes = UserChanges {
                    display_name: (user.display_name != principal.display_name)
                        .then(|| principal.display_name.clone()),
                    email: (user.email != principal.email).then(|| principal.email.clone()),
                };
                if !changes.is_empty() {
                    ops.push(PlannedOp::apply(ChangeOp::UpdateUser {
                        id: user.id.clone(),
                        external_id: (*external_id).to_string(),
                        changes,
                    }));
                }
            }
        }
    }

    // Membership additions.
    for (external_id, principal) in &principals {
        let existing = users_by_external.get(external_id);
        let current: Option<&BTreeSet<&str>> =
            existing.and_then(|u| memberships.get(&u.id));
        for group_name in &principal.groups {
            if suppressed_groups.contains(group_name.as_str()) {
                continue;
            }
            if current.is_some_and(|c| c.contains(group_name.as_str())) {
                continue;
            }
            ops.push(PlannedOp::apply(ChangeOp::AddMember {
                group_name: group_name.clone(),
                group_id: groups_by_name.get(group_name.as_str()).map(|g| g.id.clone()),
                user_external_id: (*external_id).to_string(),
                user_id: existing.map(|u| u.id.clone()),
            }));
        }
    }

    // Membership removals under managed groups. Only managed member users
    // with a live directory counterpart are eligible; unmanaged members
    // are never touched and absent users are handled by the delete pass.
    let mut managed_groups: Vec<&RemoteGroup> =
        remote.groups.iter().filter(|g| g.managed).collect();
    managed_groups.sort_by(|a, b| a.name.cmp(&b.name));
    for group in managed_groups {
        for member_id in &group.members {
            let Some(member) = users_by_id.get(member_id) else {
                continue;
            };
            if !member.managed {
                continue;
            }
            let Some(member_external) = member.external_id.as_deref() else {
                continue;
            };
            let Some(principal) = principals.get(member_external) else {
                continue;
            };
            if !principal.groups.contains(&group.name) {
                ops.push(PlannedOp::apply(ChangeOp::RemoveMember {
                    group_name: group.name.clone(),
                    group_id: group.id.clone(),
                    user_external_id: member_external.to_string(),
                    user_id: member.id.clone(),
                }));
            }
        }
    }

    // Managed remote users whose principal left the directory: delete under
    // prune mode, otherwise a skip-tagged no-op retained for reporting.
    let mut absentees: Vec<(&str, &RemoteUser)> = users_by_external
        .iter()
        .filter(|(external_id, _)| !all_dir_ids.contains(**external_id))
        .map(|(external_id, user)| (*external_id, *user))
        .collect();
    absentees.sort_by_key(|(external_id, _)| *external_id);
    for (external_id, user) in absentees {
        let op = ChangeOp::DeleteUser {
            id: user.id.clone(),
            external_id: external_id.to_string(),
        };
        if options.prune_absent {
            ops.push(PlannedOp::apply(op));
        } else {
            ops.push(PlannedOp::skip(op, SkipReason::PruneDisabled));
        }
    }

    debug!(
        ops = ops.len(),
        anomalies = anomalies.len(),
        prune = options.prune_absent,
        "change plan computed"
    );

    ChangePlan { ops, anomalies }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Disposition;

    fn principal(external_id: &str, groups: &[&str]) -> DirectoryPrincipal {
        DirectoryPrincipal {
            external_id: external_id.to_string(),
            display_name: format!("User {external_id}"),
            email: format!("{external_id}@example.com"),
            groups: groups.iter().map(ToString::to_string).collect(),
        }
    }

    fn remote_user(id: &str, external_id: Option<&str>) -> RemoteUser {
        RemoteUser {
            id: RemoteId::new(id),
            external_id: external_id.map(ToString::to_string),
            display_name: external_id
                .map(|e| format!("User {e}"))
                .unwrap_or_else(|| "Manual".to_string()),
            email: external_id
                .map(|e| format!("{e}@example.com"))
                .unwrap_or_else(|| "manual@example.com".to_string()),
            managed: external_id.is_some(),
        }
    }

    fn remote_group(id: &str, name: &str, managed: bool, members: &[&str]) -> RemoteGroup {
        RemoteGroup {
            id: RemoteId::new(id),
            name: name.to_string(),
            managed,
            members: members.iter().map(|m| RemoteId::new(*m)).collect(),
        }
    }

    fn applied_keys(plan: &ChangePlan) -> Vec<String> {
        plan.ops
            .iter()
            .filter(|p| p.disposition == Disposition::Apply)
            .map(|p| p.op.key())
            .collect()
    }

    #[test]
    fn new_user_and_group_ordering() {
        // Scenario: principal u1 in group QA, remote entirely empty.
        let plan = compute_plan(
            &[principal("u1", &["QA"])],
            &RemoteSnapshot::default(),
            &PlanOptions::default(),
        );
        assert_eq!(
            applied_keys(&plan),
            vec!["create-group:QA", "create-user:u1", "add-member:QA:u1"]
        );
        assert!(plan.anomalies.is_empty());
    }

    #[test]
    fn converged_snapshots_yield_empty_plan() {
        let directory = [principal("u1", &["QA"])];
        let remote = RemoteSnapshot {
            users: vec![remote_user("100", Some("u1"))],
            groups: vec![remote_group("g1", "QA", true, &["100"])],
        };
        let plan = compute_plan(&directory, &remote, &PlanOptions::default());
        assert!(plan.is_converged(), "expected empty plan, got {:?}", plan.ops);
    }

    #[test]
    fn update_carries_only_changed_fields() {
        let mut p = principal("u1", &[]);
        p.display_name = "Renamed".to_string();
        let remote = RemoteSnapshot {
            users: vec![remote_user("100", Some("u1"))],
            groups: vec![],
        };
        let plan = compute_plan(&[p], &remote, &PlanOptions::default());
        assert_eq!(plan.ops.len(), 1);
        match &plan.ops[0].op {
            ChangeOp::UpdateUser { changes, .. } => {
                assert_eq!(changes.display_name.as_deref(), Some("Renamed"));
                assert!(changes.email.is_none());
            }
            other => panic!("expected UpdateUser, got {other:?}"),
        }
    }

    #[test]
    fn absent_user_skipped_without_prune() {
        // Remote managed user u2 with no directory counterpart.
        let remote = RemoteSnapshot {
            users: vec![remote_user("200", Some("u2"))],
            groups: vec![],
        };
        let plan = compute_plan(&[], &remote, &PlanOptions::default());
        assert_eq!(plan.ops.len(), 1);
        assert_eq!(
            plan.ops[0].disposition,
            Disposition::Skip(SkipReason::PruneDisabled)
        );
        assert!(plan.is_converged());
    }

    #[test]
    fn absent_user_deleted_with_prune() {
        let remote = RemoteSnapshot {
            users: vec![remote_user("200", Some("u2"))],
            groups: vec![],
        };
        let plan = compute_plan(&[], &remote, &PlanOptions { prune_absent: true });
        assert_eq!(applied_keys(&plan), vec!["delete-user:u2"]);
    }

    #[test]
    fn unmanaged_users_never_referenced() {
        // Manual remote user with no external id: no op may touch it, even
        // with prune enabled and an empty directory.
        let remote = RemoteSnapshot {
            users: vec![remote_user("300", None)],
            groups: vec![remote_group("g1", "QA", true, &["300"])],
        };
        let plan = compute_plan(&[], &remote, &PlanOptions { prune_absent: true });
        assert!(plan.ops.is_empty());
    }

    #[test]
    fn duplicate_directory_ids_excluded_and_reported() {
        let directory = [principal("u1", &["QA"]), principal("u1", &["DEV"])];
        let plan = compute_plan(&directory, &RemoteSnapshot::default(), &PlanOptions::default());
        assert!(plan.ops.is_empty());
        assert_eq!(
            plan.anomalies,
            vec![Anomaly::DuplicateDirectoryId {
                external_id: "u1".to_string()
            }]
        );
    }

    #[test]
    fn duplicate_principal_blocks_prune_of_counterpart() {
        // u1 appears twice in the directory; its remote counterpart must
        // not be deleted even under prune.
        let directory = [principal("u1", &[]), principal("u1", &[])];
        let remote = RemoteSnapshot {
            users: vec![remote_user("100", Some("u1"))],
            groups: vec![],
        };
        let plan = compute_plan(&directory, &remote, &PlanOptions { prune_absent: true });
        assert!(plan.ops.is_empty());
        assert_eq!(plan.anomalies.len(), 1);
    }

    #[test]
    fn duplicate_remote_correlation_reported() {
        let remote = RemoteSnapshot {
            users: vec![remote_user("100", Some("u1")), remote_user("101", Some("u1"))],
            groups: vec![],
        };
        let plan = compute_plan(&[principal("u1", &[])], &remote, &PlanOptions::default());
        assert_eq!(
            plan.anomalies,
            vec![Anomaly::DuplicateRemoteCorrelation {
                external_id: "u1".to_string()
            }]
        );
        // The principal is not matched against either candidate, and no
        // create is emitted that could make the collision worse.
        assert!(plan.ops.is_empty());
    }

    #[test]
    fn membership_diff_adds_and_removes() {
        let directory = [principal("u1", &["QA"])];
        let remote = RemoteSnapshot {
            users: vec![remote_user("100", Some("u1"))],
            groups: vec![
                remote_group("g1", "QA", true, &[]),
                remote_group("g2", "Legacy", true, &["100"]),
            ],
        };
        let plan = compute_plan(&directory, &remote, &PlanOptions::default());
        assert_eq!(
            applied_keys(&plan),
            vec!["add-member:QA:u1", "remove-member:Legacy:u1"]
        );
    }

    #[test]
    fn unmanaged_group_collision_suppresses_membership() {
        let directory = [principal("u1", &["Ops"])];
        let remote = RemoteSnapshot {
            users: vec![remote_user("100", Some("u1"))],
            groups: vec![remote_group("g1", "Ops", false, &[])],
        };
        let plan = compute_plan(&directory, &remote, &PlanOptions::default());
        assert!(plan.is_converged());
        assert_eq!(
            plan.anomalies,
            vec![Anomaly::UnmanagedGroupCollision {
                group_name: "Ops".to_string()
            }]
        );
    }

    #[test]
    fn plan_is_deterministic() {
        let directory = [
            principal("u2", &["QA", "DEV"]),
            principal("u1", &["QA"]),
            principal("u3", &[]),
        ];
        let remote = RemoteSnapshot {
            users: vec![remote_user("100", Some("u3")), remote_user("101", Some("gone"))],
            groups: vec![remote_group("g1", "DEV", true, &["100"])],
        };
        let first = compute_plan(&directory, &remote, &PlanOptions::default());
        let second = compute_plan(&directory, &remote, &PlanOptions::default());
        assert_eq!(first.ops, second.ops);
        assert_eq!(first.anomalies, second.anomalies);
    }

    #[test]
    fn membership_ordering_follows_creates() {
        // Every AddMember referencing a newly created group appears after
        // that group's CreateGroup op.
        let directory = [principal("u1", &["QA", "DEV"])];
        let plan = compute_plan(&directory, &RemoteSnapshot::default(), &PlanOptions::default());
        let keys = applied_keys(&plan);
        for group in ["QA", "DEV"] {
            let create = keys
                .iter()
                .position(|k| k == &format!("create-group:{group}"))
                .expect("create op present");
            let member = keys
                .iter()
                .position(|k| k == &format!("add-member:{group}:u1"))
                .expect("member op present");
            assert!(create < member, "create must precede membership");
        }
    }
}
