use std::io::Write;
use std::sync::Mutex;

use log::error;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    navigation::{Level, NavEffect},
    queue::{FlushReport, QueueName},
};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ToastKind {
    Info,
    Success,
    Error,
}

/// Everything the core tells the rendering layer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum AppEvent {
    Navigation {
        effect: NavEffect,
    },
    #[serde(rename_all = "camelCase")]
    NavigationStateChanged {
        level: Level,
        product_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Toast {
        message: String,
        kind: ToastKind,
        duration_ms: u64,
    },
    QueueFlushed {
        queue: QueueName,
        report: FlushReport,
    },
    #[serde(rename_all = "camelCase")]
    VersionUpdate {
        old_version: Option<String>,
        new_version: String,
        force_update: bool,
    },
    ReloadRequested {
        version: String,
    },
    ImageCached {
        url: String,
    },
    ConnectivityChanged {
        online: bool,
    },
}

impl AppEvent {
    pub fn toast(message: impl Into<String>, kind: ToastKind) -> Self {
        Self::Toast {
            message: message.into(),
            kind,
            duration_ms: 3000,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: AppEvent);
}

/// Writes one JSON object per line. Host replies share the writer with
/// events so lines never interleave.
pub struct JsonLinesSink<W = std::io::Stdout> {
    out: Mutex<W>,
}

impl JsonLinesSink {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn write_line<T: Serialize>(&self, value: &T) {
        let line = match serde_json::to_string(value) {
            Ok(line) => line,
            Err(err) => {
                error!("Failed to encode output line: {err}");
                return;
            }
        };

        let mut out = match self.out.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = writeln!(out, "{line}").and_then(|_| out.flush()) {
            error!("Failed to write output line: {err}");
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&self, event: AppEvent) {
        self.write_line(&event);
    }
}

/// Forwards events into a channel; used by tests and embedders.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AppEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: AppEvent) {
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_kebab_case_tags() {
        let event = AppEvent::NavigationStateChanged {
            level: Level::MaximizedImage,
            product_id: Some("p-7".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "navigation-state-changed");
        assert_eq!(json["level"], "maximizedImage");
        assert_eq!(json["productId"], "p-7");
    }

    #[test]
    fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(AppEvent::ConnectivityChanged { online: false });
        sink.emit(AppEvent::ConnectivityChanged { online: true });

        assert_eq!(
            rx.try_recv().unwrap(),
            AppEvent::ConnectivityChanged { online: false }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            AppEvent::ConnectivityChanged { online: true }
        );
    }

    #[test]
    fn json_lines_sink_writes_one_object_per_line() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.emit(AppEvent::ImageCached {
            url: "https://shop.test/a.jpg".into(),
        });
        sink.emit(AppEvent::toast("Saved", ToastKind::Success));

        let output = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            r#"{"event":"image-cached","url":"https://shop.test/a.jpg"}"#
        );
        assert!(lines[1].contains(r#""durationMs":3000"#));
    }
}
