//! Read-only module metadata consumed by the tasking dispatcher.
//!
//! Module stores live outside this crate; the dispatcher only needs the
//! flags that drive command-kind selection and the admin gate.

use serde::{Deserialize, Serialize};

/// Metadata describing how a module's generated payload must be tasked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    /// Module name, e.g. `collection/screenshot`. The final path segment
    /// (truncated to 15 chars) becomes the save-framing name token.
    pub name: String,
    /// Run detached as a background job.
    pub background: bool,
    /// Write to disk on the agent before executing.
    pub run_on_disk: bool,
    /// File extension of server-saved output; empty/absent means the
    /// output is plain text delivered inline.
    pub output_extension: Option<String>,
    /// Requires a privileged execution context on the agent.
    pub needs_admin: bool,
}

impl ModuleMetadata {
    /// Final path segment of the module name, used as the save-file prefix.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Output extension, treating an empty string as absent.
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        self.output_extension.as_deref().filter(|ext| !ext.is_empty())
    }
}
