//! `UserPromptSubmit`: command routing first, then retrieval injection.

use crate::config::AidamConfig;
use crate::hooks::commands::{self, CommandOutcome};
use crate::hooks::{HookEvent, HookInput, HookOutput, HookResponse};
use crate::inbox::InboxBus;
use crate::retrieval::RetrievalCoordinator;
use crate::store::Store;
use crate::Result;

pub async fn run(config: &AidamConfig, input: HookInput) -> Result<HookResponse> {
    // Slash commands are intercepted before they ever reach the assistant.
    if let CommandOutcome::Executed(message) =
        commands::route(&config.plugin_root, &config.commands_dir(), &input.prompt).await?
    {
        return Ok(HookResponse::Block(message));
    }

    if !config.retriever_enabled
        || input.prompt.trim().is_empty()
        || input.session_id.is_empty()
    {
        return Ok(HookResponse::Allow(None));
    }

    let store = Store::connect(&config.db).await?;
    let coordinator = RetrievalCoordinator::new(InboxBus::new(store));

    match coordinator
        .retrieve_context(&input.session_id, &input.prompt)
        .await?
    {
        Some(context) => Ok(HookResponse::Allow(Some(HookOutput::context(
            HookEvent::UserPromptSubmit,
            context,
        )))),
        None => Ok(HookResponse::Allow(None)),
    }
}
