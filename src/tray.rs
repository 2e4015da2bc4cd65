use ksni::{self, menu::StandardItem, Tray, TrayService};
use tokio::sync::mpsc;
use tracing::info;

use crate::service::{StatusIndicator, UiRequest};

/// Status notifier shown while the bubble is up
pub struct SparkTray {
    requests: mpsc::UnboundedSender<UiRequest>,
    count: u32,
}

impl SparkTray {
    pub fn new(requests: mpsc::UnboundedSender<UiRequest>) -> Self {
        Self { requests, count: 0 }
    }
}

impl Tray for SparkTray {
    fn id(&self) -> String {
        "spark-bubble".into()
    }

    fn title(&self) -> String {
        "Spark tasks".into()
    }

    fn icon_name(&self) -> String {
        "view-list-symbolic".into()
    }

    fn tool_tip(&self) -> ksni::ToolTip {
        ksni::ToolTip {
            title: "Spark tasks".into(),
            description: format!("Bubble is running ({} open)", self.count),
            ..Default::default()
        }
    }

    // Left-click collapses an open menu
    fn activate(&mut self, _x: i32, _y: i32) {
        let _ = self.requests.send(UiRequest::Collapse);
    }

    fn menu(&self) -> Vec<ksni::MenuItem<Self>> {
        use ksni::MenuItem::*;

        vec![
            StandardItem {
                label: format!("Open tasks: {}", self.count),
                enabled: false,
                ..Default::default()
            }
            .into(),
            Separator,
            StandardItem {
                label: "Collapse".into(),
                activate: Box::new(|tray: &mut Self| {
                    let _ = tray.requests.send(UiRequest::Collapse);
                }),
                ..Default::default()
            }
            .into(),
            StandardItem {
                label: "Stop bubble".into(),
                activate: Box::new(|tray: &mut Self| {
                    let _ = tray.requests.send(UiRequest::Stop);
                }),
                ..Default::default()
            }
            .into(),
        ]
    }
}

/// Handle to a running tray, owned by the overlay service
pub struct TrayStatus {
    handle: ksni::Handle<SparkTray>,
}

impl StatusIndicator for TrayStatus {
    fn set_count(&self, count: u32) {
        self.handle.update(move |tray| {
            tray.count = count;
        });
    }

    fn shutdown(&self) {
        self.handle.shutdown();
        info!("System tray stopped");
    }
}

/// Spawn the system tray in a separate thread
pub fn spawn_tray(requests: mpsc::UnboundedSender<UiRequest>) -> TrayStatus {
    let service = TrayService::new(SparkTray::new(requests));
    let handle = service.handle();

    std::thread::spawn(move || {
        info!("Starting system tray service");
        if let Err(e) = service.run() {
            tracing::error!("System tray service error: {}", e);
        }
    });

    TrayStatus { handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_items_send_requests() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tray = SparkTray::new(tx);
        tray.count = 4;
        assert!(tray.tool_tip().description.contains('4'));

        let items = tray.menu();
        assert_eq!(items.len(), 4);
        for item in items {
            if let ksni::MenuItem::Standard(item) = item {
                (item.activate)(&mut tray);
            }
        }
        assert!(matches!(rx.try_recv(), Ok(UiRequest::Collapse)));
        assert!(matches!(rx.try_recv(), Ok(UiRequest::Stop)));
        assert!(rx.try_recv().is_err());
    }
}
