//! Process resolver: raw process labels -> canonical process names.

use crate::config::ModelConfig;
use crate::domain::Role;

/// Outcome of resolving one raw process label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Process { name: String, role: Role },
    /// Observed data; not part of the rate model.
    Data,
    /// Neither a known signal nor a known background.
    Unknown,
}

/// Resolves raw labels against the configured rename table and role lists.
///
/// Holds only borrowed configuration, so repeated calls (nominal pass, then
/// systematic pass) always agree.
#[derive(Debug, Clone, Copy)]
pub struct ProcessResolver<'a> {
    config: &'a ModelConfig,
}

impl<'a> ProcessResolver<'a> {
    pub fn new(config: &'a ModelConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, raw: &str) -> Resolution {
        let raw = raw.trim();

        // Signal samples carry `_<suffix>`; the stem is what gets renamed and keyed.
        if let Some(suffix) = self.config.signal_suffix.as_deref() {
            if let Some(stem) = raw.strip_suffix(suffix).and_then(|s| s.strip_suffix('_')) {
                let name = self.rename(stem);
                if self.config.role_of(&name) == Some(Role::Signal) {
                    return Resolution::Process {
                        name,
                        role: Role::Signal,
                    };
                }
            }
        }

        let name = self.rename(raw);
        match self.config.role_of(&name) {
            Some(Role::Background) => {
                return Resolution::Process {
                    name,
                    role: Role::Background,
                };
            }
            // Without a configured suffix, bare signal names are accepted as-is.
            Some(Role::Signal) if self.config.signal_suffix.is_none() => {
                return Resolution::Process {
                    name,
                    role: Role::Signal,
                };
            }
            _ => {}
        }

        if self.config.data_labels.iter().any(|d| d == raw) {
            return Resolution::Data;
        }
        Resolution::Unknown
    }

    fn rename(&self, label: &str) -> String {
        self.config
            .process_renames
            .get(label)
            .cloned()
            .unwrap_or_else(|| label.to_string())
    }
}
