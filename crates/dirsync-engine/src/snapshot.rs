//! Remote snapshot assembly.
//!
//! Listings are drained cursor-by-cursor until the gateway signals
//! [`PageCursor::Done`]; cursors are opaque and no fixed page count is
//! assumed.

use tracing::{debug, warn};

use dirsync_core::{GatewayResult, PageCursor, RemoteSnapshot, TestOpsGateway};

/// Hard cap per resource type, preventing unbounded memory growth against
/// a misbehaving remote that never terminates its listing.
const MAX_REMOTE_RESOURCES: usize = 50_000;

/// Drain the gateway's paginated listings into an immutable snapshot.
pub async fn fetch_remote_snapshot<G: TestOpsGateway + ?Sized>(
    gateway: &G,
) -> GatewayResult<RemoteSnapshot> {
    let mut snapshot = RemoteSnapshot::default();

    let mut cursor: Option<String> = None;
    loop {
        let page = gateway.list_users(cursor.as_deref()).await?;
        snapshot.users.extend(page.items);
        if snapshot.users.len() >= MAX_REMOTE_RESOURCES {
            warn!(
                fetched = snapshot.users.len(),
                "remote user listing hit the resource cap, stopping fetch"
            );
            break;
        }
        match page.next {
            PageCursor::More(next) => cursor = Some(next),
            PageCursor::Done => break,
        }
    }

    let mut cursor: Option<String> = None;
    loop {
        let page = gateway.list_groups(cursor.as_deref()).await?;
        snapshot.groups.extend(page.items);
        if snapshot.groups.len() >= MAX_REMOTE_RESOURCES {
            warn!(
                fetched = snapshot.groups.len(),
                "remote group listing hit the resource cap, stopping fetch"
            );
            break;
        }
        match page.next {
            PageCursor::More(next) => cursor = Some(next),
            PageCursor::Done => break,
        }
    }

    debug!(
        users = snapshot.users.len(),
        groups = snapshot.groups.len(),
        "remote snapshot assembled"
    );

    Ok(snapshot)
}
