use tauri::{command, ipc::Channel, AppHandle, Runtime};
use tracing::warn;

use crate::models::SharePayload;
use crate::{ListenerId, Result, ShareBridgeExt};

/// Fetch the share that launched the app, if any.
///
/// The frontend should call this once after initialization to pick up
/// content that arrived before the webview was ready.
#[command]
pub(crate) async fn get_initial_share<R: Runtime>(
    app: AppHandle<R>,
) -> Result<Option<SharePayload>> {
    Ok(app.sharebridge().get_initial_share().await)
}

/// Subscribe to shares delivered while the app is running.
///
/// Returns the listener id used by `remove_intent_listener`.
#[command]
pub(crate) async fn on_intent_listener<R: Runtime>(
    app: AppHandle<R>,
    channel: Channel<SharePayload>,
) -> Result<u64> {
    let id = app
        .sharebridge()
        .on_intent_listener(move |payload| {
            if let Err(e) = channel.send(payload) {
                warn!("Failed to forward share to frontend: {}", e);
            }
        })
        .await;
    Ok(id.get())
}

#[command]
pub(crate) async fn remove_intent_listener<R: Runtime>(app: AppHandle<R>, id: u64) -> Result<()> {
    app.sharebridge().remove_listener(ListenerId::new(id)).await
}
