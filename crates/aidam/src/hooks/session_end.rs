//! `SessionEnd`: on `/clear`, checkpoint the session for the next one.
//!
//! The orchestrator row moves to `clearing`, the conversation tail is
//! brought up to date (or an emergency compact produces the first
//! checkpoint), the row settles at `cleared`, and the legacy marker file is
//! written as a hand-off fallback.

use std::path::Path;

use tracing::info;

use crate::compaction::CompactionCoordinator;
use crate::config::AidamConfig;
use crate::hooks::{HookInput, HookResponse};
use crate::inbox::InboxBus;
use crate::orchestrator::OrchestratorRegistry;
use crate::session_state::SessionStateStore;
use crate::store::Store;
use crate::Result;

pub async fn run(config: &AidamConfig, input: HookInput) -> Result<HookResponse> {
    if input.reason != "clear" || input.session_id.is_empty() {
        return Ok(HookResponse::Allow(None));
    }

    let store = Store::connect(&config.db).await?;
    let registry = OrchestratorRegistry::new(store.clone());
    let states = SessionStateStore::new(store.clone());
    let compaction = CompactionCoordinator::new(InboxBus::new(store), states.clone());

    registry.mark_clearing(&input.session_id).await?;

    let transcript = Path::new(&input.transcript_path);
    if transcript.is_file() {
        if states.latest_state(&input.session_id).await?.is_some() {
            // A compaction exists; only the tail is stale.
            compaction.refresh_tail(&input.session_id, transcript).await?;
        } else {
            compaction
                .emergency_compact(&input.session_id, transcript)
                .await?;
        }
    }

    registry.mark_cleared(&input.session_id).await?;
    write_marker(config, &input.session_id);

    info!("session {} cleared and checkpointed", input.session_id);
    Ok(HookResponse::Allow(None))
}

/// Best-effort legacy marker; the DB hand-off is primary.
fn write_marker(config: &AidamConfig, session_id: &str) {
    let path = config.cleared_marker_path();
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(path, session_id);
}
