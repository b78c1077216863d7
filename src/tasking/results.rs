//! Multi-part result reassembly.
//!
//! Large output arrives as fragments sharing a correlation key. Fragments
//! may race; they are held until the set is complete, then assembled in
//! sequence order and released as one result.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::Mutex;

use crate::models::task::ResultFragment;
use crate::{AppError, Result};

#[derive(Debug)]
struct Partial {
    total: u32,
    parts: BTreeMap<u32, String>,
}

/// Collector holding incomplete multi-part results per session.
#[derive(Debug, Default)]
pub struct ResultCollector {
    partials: Mutex<HashMap<(String, String), Partial>>,
}

impl ResultCollector {
    /// Ingest one fragment.
    ///
    /// Returns the assembled result text once every fragment of the
    /// correlation key has arrived; `None` while parts are still missing.
    /// A single-part fragment (`total <= 1`) completes immediately.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the fragment is out of range or
    /// disagrees with previously seen fragments about the total.
    pub async fn ingest(&self, session_id: &str, fragment: ResultFragment) -> Result<Option<String>> {
        if fragment.total <= 1 {
            return Ok(Some(fragment.data));
        }
        if fragment.seq >= fragment.total {
            return Err(AppError::Validation(format!(
                "result fragment {}/{} out of range for key '{}'",
                fragment.seq, fragment.total, fragment.key
            )));
        }

        let mut partials = self.partials.lock().await;
        let slot = (session_id.to_owned(), fragment.key.clone());
        let partial = partials.entry(slot.clone()).or_insert_with(|| Partial {
            total: fragment.total,
            parts: BTreeMap::new(),
        });

        if partial.total != fragment.total {
            return Err(AppError::Validation(format!(
                "result key '{}' changed fragment count from {} to {}",
                fragment.key, partial.total, fragment.total
            )));
        }
        partial.parts.insert(fragment.seq, fragment.data);

        if partial.parts.len() == partial.total as usize {
            let Some(complete) = partials.remove(&slot) else {
                return Ok(None);
            };
            // BTreeMap iteration yields fragments in sequence order.
            Ok(Some(complete.parts.into_values().collect()))
        } else {
            Ok(None)
        }
    }

    /// Drop any incomplete results held for a session.
    pub async fn remove_session(&self, session_id: &str) {
        self.partials
            .lock()
            .await
            .retain(|(sid, _), _| sid != session_id);
    }

    /// Number of incomplete results currently held.
    pub async fn pending(&self) -> usize {
        self.partials.lock().await.len()
    }
}
