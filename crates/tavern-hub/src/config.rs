//! Hub configuration.

/// Settings for the hub task.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of the command queue. Senders wait when it is full; the hub
    /// itself never waits on anyone.
    pub command_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 1024,
        }
    }
}

impl HubConfig {
    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity.max(1);
        self
    }
}
