//! Plugin lifecycle states and the allowed transitions between them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    /// No plugin object exists.
    Unloaded,
    /// The loader is producing (or has produced) the plugin object.
    Loading,
    /// `init` is running.
    Initializing,
    /// `init` succeeded.
    Initialized,
    /// `start` is running.
    Starting,
    /// Serving hooks and events.
    Running,
    /// Still serving while a replacement is built.
    Reloading,
    /// `stop` is running.
    Stopping,
    /// Stopped; may be unloaded.
    Stopped,
    /// A load, init, or start step failed. Terminal until retried.
    Failed,
}

impl PluginState {
    /// Every state, in lifecycle order.
    pub const ALL: [PluginState; 10] = [
        PluginState::Unloaded,
        PluginState::Loading,
        PluginState::Initializing,
        PluginState::Initialized,
        PluginState::Starting,
        PluginState::Running,
        PluginState::Reloading,
        PluginState::Stopping,
        PluginState::Stopped,
        PluginState::Failed,
    ];

    /// States reachable from `self` in one step.
    pub fn valid_transitions(&self) -> &'static [PluginState] {
        use PluginState::*;
        match self {
            Unloaded => &[Loading],
            Loading => &[Initializing, Failed, Unloaded],
            Initializing => &[Initialized, Failed],
            Initialized => &[Starting, Stopping],
            Starting => &[Running, Failed],
            Running => &[Stopping, Reloading],
            Reloading => &[Running, Stopping],
            Stopping => &[Stopped],
            Stopped => &[Unloaded],
            Failed => &[Loading, Stopped, Unloaded],
        }
    }

    /// Whether `self -> target` is allowed.
    pub fn can_transition_to(&self, target: PluginState) -> bool {
        self.valid_transitions().contains(&target)
    }

    /// Whether the instance serves hooks and satisfies dependents.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Reloading)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Initializing => "initializing",
            Self::Initialized => "initialized",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Reloading => "reloading",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_allowed() {
        let path = [
            PluginState::Unloaded,
            PluginState::Loading,
            PluginState::Initializing,
            PluginState::Initialized,
            PluginState::Starting,
            PluginState::Running,
            PluginState::Stopping,
            PluginState::Stopped,
            PluginState::Unloaded,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failed_reachable_only_from_startup_phases() {
        let sources: Vec<_> = PluginState::ALL
            .iter()
            .filter(|s| s.can_transition_to(PluginState::Failed))
            .copied()
            .collect();
        assert_eq!(
            sources,
            vec![PluginState::Loading, PluginState::Initializing, PluginState::Starting]
        );
    }

    #[test]
    fn test_reloading_only_from_running() {
        assert!(PluginState::Running.can_transition_to(PluginState::Reloading));
        assert!(!PluginState::Initialized.can_transition_to(PluginState::Reloading));
        assert!(!PluginState::Stopped.can_transition_to(PluginState::Reloading));
    }
}
