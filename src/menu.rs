//! Quick actions offered by the expanded bubble.

use serde::{Deserialize, Serialize};

/// One quick action: a label and the host screen it opens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MenuEntry {
    pub label: &'static str,
    pub route: &'static str,
    /// Ask the target screen to start its primary action right away
    pub auto_trigger: bool,
}

pub const MENU_ENTRIES: [MenuEntry; 6] = [
    MenuEntry {
        label: "CBT",
        route: "CBTGuide",
        auto_trigger: false,
    },
    MenuEntry {
        label: "Tasks",
        route: "FogCutter",
        auto_trigger: false,
    },
    MenuEntry {
        label: "TODO",
        route: "Tasks",
        auto_trigger: false,
    },
    MenuEntry {
        label: "Breathing",
        route: "Anchor",
        auto_trigger: false,
    },
    MenuEntry {
        label: "Thinking Help",
        route: "CheckIn",
        auto_trigger: false,
    },
    MenuEntry {
        label: "Voice Task",
        route: "Tasks",
        auto_trigger: true,
    },
];

/// Deep-link payload handed to the host application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteIntent {
    pub route: String,
    #[serde(default)]
    pub auto_record: bool,
}

impl RouteIntent {
    /// Build an intent, rejecting blank routes.
    pub fn new(route: impl Into<String>, auto_record: bool) -> Option<Self> {
        let route = route.into();
        if route.trim().is_empty() {
            return None;
        }
        Some(Self { route, auto_record })
    }

    /// Launch parameters understood by the host application
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = vec!["--route".to_string(), self.route.clone()];
        if self.auto_record {
            args.push("--auto-record".to_string());
        }
        args
    }
}

impl From<&MenuEntry> for RouteIntent {
    fn from(entry: &MenuEntry) -> Self {
        Self {
            route: entry.route.to_string(),
            auto_record: entry.auto_trigger,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_voice_task_auto_triggers() {
        let auto: Vec<_> = MENU_ENTRIES.iter().filter(|e| e.auto_trigger).collect();
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0].label, "Voice Task");
        assert_eq!(auto[0].route, "Tasks");
    }

    #[test]
    fn blank_routes_are_rejected() {
        assert!(RouteIntent::new("", false).is_none());
        assert!(RouteIntent::new("   ", true).is_none());
        assert!(RouteIntent::new("Anchor", false).is_some());
    }

    #[test]
    fn auto_record_defaults_to_false_on_the_wire() {
        let intent: RouteIntent = serde_json::from_str(r#"{"route":"Anchor"}"#).unwrap();
        assert!(!intent.auto_record);
        let json = serde_json::to_value(RouteIntent::from(&MENU_ENTRIES[5])).unwrap();
        assert_eq!(json, serde_json::json!({"route": "Tasks", "autoRecord": true}));
    }

    #[test]
    fn launch_args_carry_the_flag_only_when_set() {
        let plain = RouteIntent::new("CheckIn", false).unwrap();
        assert_eq!(plain.launch_args(), vec!["--route", "CheckIn"]);
        let auto = RouteIntent::new("Tasks", true).unwrap();
        assert_eq!(auto.launch_args(), vec!["--route", "Tasks", "--auto-record"]);
    }
}
