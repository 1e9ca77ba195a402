//! Receive content shared into the app by the operating system (text, a
//! file, or several files) as one uniform [`SharePayload`].
//!
//! Platform glue feeds [`InboundEvent`]s into a [`ShareBridge`]. The bridge
//! classifies them, resolves content references to local paths, probes media
//! dimensions, and delivers the result to registered listeners. Where the
//! platform drops files into a staging directory instead of raising an event,
//! the bridge polls that directory around app launch and resume.
//!
//! With the `tauri` feature the bridge is exposed to a Tauri frontend as the
//! `sharebridge` plugin.

pub use models::*;

mod bridge;
mod builder;
mod config;
mod controller;
mod error;
mod event;
mod logging;
mod mime;
mod models;
mod poller;
pub mod probe;
mod resolver;

#[cfg(feature = "tauri")]
mod commands;
#[cfg(test)]
mod test_support;

pub use bridge::{EventSender, ShareBridge, SharePipeline};
pub use builder::{FileInfo, PayloadBuilder};
pub use config::{load_config, save_config, BridgeConfig};
pub use controller::{
    DeliveryController, DeliveryPolicy, InitialShareFallback, ListenerCardinality, ListenerId,
    ShareListener,
};
pub use error::{Result, ShareBridgeError};
pub use event::{
    classify, InboundEvent, IntentAction, IntentExtras, ShareRequest, ACTION_SEND,
    ACTION_SEND_MULTIPLE, ACTION_VIEW, ACTIVITY_BROWSING_WEB,
};
pub use logging::init_tracing;
pub use mime::{extension_for_mime, mime_for_extension};
pub use poller::{InboxPoller, PollSchedule, PollTrigger};
pub use resolver::{
    ContentRef, ContentRegistry, NullRegistry, ReferenceResolver, ResolvedReference, Selection,
    COLUMN_DATA, COLUMN_DISPLAY_NAME, COLUMN_SIZE,
};

#[cfg(feature = "tauri")]
pub use plugin::{init, init_with_registry, ShareBridgeExt};

#[cfg(feature = "tauri")]
mod plugin {
    use std::sync::Arc;

    use tauri::{
        plugin::{Builder, TauriPlugin},
        Manager, RunEvent, Runtime,
    };
    use tracing::info;

    use crate::{commands, BridgeConfig, ContentRegistry, NullRegistry, ShareBridge};

    /// Extensions to [`tauri::App`], [`tauri::AppHandle`] and [`tauri::Window`] to access the share bridge.
    pub trait ShareBridgeExt<R: Runtime> {
        fn sharebridge(&self) -> &ShareBridge;
    }

    impl<R: Runtime, T: Manager<R>> ShareBridgeExt<R> for T {
        fn sharebridge(&self) -> &ShareBridge {
            self.state::<ShareBridge>().inner()
        }
    }

    /// Initializes the sharebridge plugin without a content registry.
    ///
    /// `content://` references stay unresolved. Use [`init_with_registry`]
    /// to let the bridge query and copy platform content.
    pub fn init<R: Runtime>() -> TauriPlugin<R> {
        init_with_registry(Arc::new(NullRegistry))
    }

    /// Initializes the sharebridge plugin backed by `registry`.
    ///
    /// Native glue forwards platform events through
    /// [`ShareBridge::event_sender`]; the frontend reads them with
    /// `get_initial_share` and `on_intent_listener`.
    pub fn init_with_registry<R: Runtime>(registry: Arc<dyn ContentRegistry>) -> TauriPlugin<R> {
        Builder::new("sharebridge")
            .invoke_handler(tauri::generate_handler![
                commands::get_initial_share,
                commands::on_intent_listener,
                commands::remove_intent_listener,
            ])
            .setup(move |app, _api| {
                let cache_dir = app.path().app_cache_dir()?.join("shared");
                let config = if cfg!(target_os = "ios") {
                    let inbox_dir = app.path().document_dir()?.join("Inbox");
                    BridgeConfig::ios(cache_dir, inbox_dir)
                } else if cfg!(target_os = "android") {
                    BridgeConfig::android(cache_dir)
                } else {
                    BridgeConfig {
                        cache_dir,
                        ..BridgeConfig::default()
                    }
                };

                let bridge = ShareBridge::new(config, registry)?;
                app.manage(bridge);
                info!("Share bridge plugin initialized");
                Ok(())
            })
            .on_event(|app, event| {
                let Some(bridge) = app.try_state::<ShareBridge>() else {
                    return;
                };
                match event {
                    RunEvent::Ready => {
                        let bridge = bridge.inner().clone();
                        tauri::async_runtime::spawn(async move { bridge.on_app_launch() });
                    }
                    RunEvent::Resumed => {
                        let bridge = bridge.inner().clone();
                        tauri::async_runtime::spawn(async move { bridge.on_app_resume() });
                    }
                    RunEvent::Exit => bridge.shutdown(),
                    _ => {}
                }
            })
            .build()
    }
}
