//! JSON-lines protocol between the rendering layer and the core.
//!
//! Each stdin line is one command object tagged by `"command"`. Each
//! command gets exactly one reply line, `{"ok": ...}` or `{"error": ...}`.
//! Events are written to the same stream as they happen.

use std::io::Write;

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::{
    cache::commands as cache_commands,
    catalog::{commands as catalog_commands, ContactChannel},
    events::JsonLinesSink,
    navigation::{
        commands as navigation_commands, BackOutcome, BackSource, TouchPoint, UiObservation,
    },
    notify::commands as notify_commands,
    version::commands as version_commands,
    AppState,
};

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum HostCommand {
    LoadCatalog,
    Search {
        #[serde(default)]
        query: String,
        #[serde(default)]
        category: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    OpenProduct {
        product_id: String,
    },
    OpenImage {
        #[serde(default)]
        index: usize,
    },
    CloseImage,
    CloseModal,
    Back {
        #[serde(default = "history_source")]
        source: BackSource,
    },
    TouchStart {
        x: f64,
        y: f64,
    },
    TouchEnd {
        x: f64,
        y: f64,
    },
    #[serde(rename_all = "camelCase")]
    Observe {
        #[serde(default)]
        image_overlay_active: bool,
        #[serde(default)]
        modal_visible: bool,
    },
    #[serde(rename_all = "camelCase")]
    Contact {
        product_id: String,
        channel: ContactChannel,
    },
    Online,
    Offline,
    CheckUpdate,
    FlushQueues,
    PendingQueues,
    CacheStats,
    ClearImageCache,
    ResolveImage {
        url: String,
    },
    NavigationState,
    Quit,
}

fn history_source() -> BackSource {
    BackSource::History
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Reply {
    Ok(Value),
    Error(String),
}

impl Reply {
    fn from_result<T: Serialize>(result: Result<T, String>) -> Self {
        match result.and_then(|value| serde_json::to_value(value).map_err(|e| e.to_string())) {
            Ok(value) => Reply::Ok(value),
            Err(message) => Reply::Error(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

fn back_flow(result: &Result<BackOutcome, String>) -> Flow {
    match result {
        Ok(BackOutcome::ExitRequested { .. }) => Flow::Exit,
        _ => Flow::Continue,
    }
}

fn touch_flow(result: &Result<Option<BackOutcome>, String>) -> Flow {
    match result {
        Ok(Some(BackOutcome::ExitRequested { .. })) => Flow::Exit,
        _ => Flow::Continue,
    }
}

pub async fn handle(state: &AppState, command: HostCommand) -> (Reply, Flow) {
    use HostCommand::*;

    let reply = match command {
        LoadCatalog => Reply::from_result(catalog_commands::load_catalog(state).await),
        Search { query, category } => {
            Reply::from_result(catalog_commands::search(state, query, category).await)
        }
        OpenProduct { product_id } => {
            Reply::from_result(navigation_commands::open_product(state, product_id).await)
        }
        OpenImage { index } => {
            Reply::from_result(navigation_commands::open_image(state, index).await)
        }
        CloseImage => Reply::from_result(navigation_commands::close_image(state).await),
        CloseModal => Reply::from_result(navigation_commands::close_modal(state).await),
        Back { source } => {
            let result = navigation_commands::back(state, source).await;
            let flow = back_flow(&result);
            return (Reply::from_result(result), flow);
        }
        TouchStart { x, y } => Reply::from_result(
            navigation_commands::touch_start(state, TouchPoint { x, y }).await,
        ),
        TouchEnd { x, y } => {
            let result = navigation_commands::touch_end(state, TouchPoint { x, y }).await;
            let flow = touch_flow(&result);
            return (Reply::from_result(result), flow);
        }
        Observe {
            image_overlay_active,
            modal_visible,
        } => {
            let observation = UiObservation {
                image_overlay_active,
                modal_visible,
            };
            Reply::from_result(navigation_commands::observe(state, observation).await)
        }
        Contact {
            product_id,
            channel,
        } => Reply::from_result(catalog_commands::contact(state, product_id, channel).await),
        Online => {
            state.lifecycle.set_online(true).await;
            Reply::Ok(Value::Bool(state.lifecycle.is_online()))
        }
        Offline => {
            state.lifecycle.set_online(false).await;
            Reply::Ok(Value::Bool(state.lifecycle.is_online()))
        }
        CheckUpdate => Reply::from_result(version_commands::check_update(state).await),
        FlushQueues => Reply::from_result(notify_commands::flush_queues(state).await),
        PendingQueues => Reply::from_result(notify_commands::pending_queues(state).await),
        CacheStats => Reply::from_result(cache_commands::cache_stats(state).await),
        ClearImageCache => Reply::from_result(cache_commands::clear_image_cache(state).await),
        ResolveImage { url } => {
            Reply::from_result(cache_commands::resolve_image(state, url).await)
        }
        NavigationState => {
            Reply::from_result(navigation_commands::get_navigation_state(state).await)
        }
        Quit => return (Reply::Ok(Value::Null), Flow::Exit),
    };

    (reply, Flow::Continue)
}

/// Reads commands until end of input, `quit`, or an accepted exit request.
pub async fn serve<R, W>(state: &AppState, input: R, output: &JsonLinesSink<W>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("failed to read command")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (reply, flow) = match serde_json::from_str::<HostCommand>(line) {
            Ok(command) => handle(state, command).await,
            Err(err) => {
                warn!("Rejected command line: {err}");
                (Reply::Error(format!("invalid command: {err}")), Flow::Continue)
            }
        };
        output.write_line(&reply);

        if flow == Flow::Exit {
            info!("Exit requested by the rendering layer");
            break;
        }
    }
    Ok(())
}
