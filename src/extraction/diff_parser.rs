//! Activity diff markup parsing.
//!
//! Each activity carries an HTML fragment describing one row edit as a set of
//! per-cell containers. The parser walks the containers in document order,
//! keeps only headings that map into the tracked-field whitelist, and reads
//! the removed/added value markers into [`ChangeRecord`] drafts. Markup that
//! does not match the expected structure simply produces no drafts; the shard
//! keeps going.

use anyhow::{anyhow, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::domain::entities::{Activity, ChangeRecord, FieldCategory};

/// CSS selectors for the activity diff fragments.
///
/// The defaults match the markup the activity endpoint currently emits; all
/// of them are configurable because the upstream markup is undocumented and
/// has shifted before.
#[derive(Debug, Clone)]
pub struct DiffSelectors {
    /// One container per changed cell.
    pub container: String,
    /// Heading element inside a container carrying the field label.
    pub heading: String,
    /// Marker on the removed (pre-change) value.
    pub removed: String,
    /// Marker on the added (post-change) value.
    pub added: String,
    /// Marker for a transition out of an empty cell.
    pub null_marker: String,
    /// Added entries of list-valued (collaborator) cells.
    pub added_list_entry: String,
}

impl Default for DiffSelectors {
    fn default() -> Self {
        Self {
            container: "div.historicalCellContainer".to_string(),
            heading: ".cellHeading, .fieldName".to_string(),
            removed: ".strikethrough".to_string(),
            added: ".colorSuccess".to_string(),
            null_marker: ".emptyCell".to_string(),
            added_list_entry: ".collaboratorList .colorSuccess .name".to_string(),
        }
    }
}

/// Parses activity diff fragments into change-record drafts.
pub struct ActivityDiffParser {
    container: Selector,
    heading: Selector,
    removed: Selector,
    added: Selector,
    null_marker: Selector,
    added_list_entry: Selector,
    whitespace: Regex,
}

impl ActivityDiffParser {
    pub fn new() -> Result<Self> {
        Self::with_selectors(DiffSelectors::default())
    }

    pub fn with_selectors(selectors: DiffSelectors) -> Result<Self> {
        Ok(Self {
            container: parse_selector(&selectors.container)?,
            heading: parse_selector(&selectors.heading)?,
            removed: parse_selector(&selectors.removed)?,
            added: parse_selector(&selectors.added)?,
            null_marker: parse_selector(&selectors.null_marker)?,
            added_list_entry: parse_selector(&selectors.added_list_entry)?,
            whitespace: Regex::new(r"\s+")?,
        })
    }

    /// Extract zero or more change records from one activity.
    ///
    /// Containers keep their document-order index in the draft id even when
    /// earlier containers were skipped, so re-parsing the same activity always
    /// reproduces the same ids.
    pub fn parse_activity(&self, activity: &Activity, user_scope: &str) -> Vec<ChangeRecord> {
        if activity.diff_html.trim().is_empty() {
            return Vec::new();
        }

        let fragment = Html::parse_fragment(&activity.diff_html);
        let mut drafts = Vec::new();

        for (index, container) in fragment.select(&self.container).enumerate() {
            let Some(label) = self.first_text(container, &self.heading) else {
                continue;
            };
            let Some(category) = FieldCategory::from_heading(&label) else {
                debug!("Skipping untracked field {:?}", label);
                continue;
            };

            let from_empty = container.select(&self.null_marker).next().is_some();
            let old_value = if from_empty {
                None
            } else {
                self.first_text(container, &self.removed)
            };
            let new_value = match category {
                FieldCategory::Assignee => self
                    .collect_list_entries(container)
                    .or_else(|| self.last_text(container, &self.added)),
                _ => self.last_text(container, &self.added),
            };

            if old_value.is_none() && new_value.is_none() {
                continue;
            }

            drafts.push(ChangeRecord {
                id: format!("{}_{}", activity.id, index),
                record_id: activity.record_id.clone(),
                field_category: category,
                old_value,
                new_value,
                occurred_at: activity.occurred_at,
                actor_id: activity.actor_id.clone(),
                user_scope: user_scope.to_string(),
            });
        }

        debug!(
            "Activity {}: {} change records extracted",
            activity.id,
            drafts.len()
        );
        drafts
    }

    fn first_text(&self, scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
        scope
            .select(selector)
            .next()
            .and_then(|element| self.element_text(element))
    }

    fn last_text(&self, scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
        scope
            .select(selector)
            .last()
            .and_then(|element| self.element_text(element))
    }

    fn collect_list_entries(&self, scope: ElementRef<'_>) -> Option<String> {
        let entries: Vec<String> = scope
            .select(&self.added_list_entry)
            .filter_map(|element| self.element_text(element))
            .collect();
        if entries.is_empty() {
            None
        } else {
            Some(entries.join(", "))
        }
    }

    fn element_text(&self, element: ElementRef<'_>) -> Option<String> {
        let joined: String = element.text().collect();
        let normalized = self.whitespace.replace_all(joined.trim(), " ").to_string();
        if normalized.is_empty() {
            None
        } else {
            Some(normalized)
        }
    }
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector {:?}: {}", css, e))
}
