//! Collect stage: turn a profile into scheduled calls and gather the responses.
//!
//! Sections of one unit are submitted concurrently so the scheduler can
//! order them by priority; pages of one section are fetched in sequence
//! because each page decides whether another is needed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::{ApiError, ApiRequest};
use crate::error::{LmsflowError, Result};
use crate::pipeline::profile::{CollectionProfile, Section};
use crate::scheduler::{AdaptiveScheduler, Priority};

/// Everything collected for one unit, keyed by section name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectedDocument {
    pub unit_id: u64,
    pub collected_at: DateTime<Utc>,
    pub sections: BTreeMap<String, Value>,
}

impl CollectedDocument {
    pub fn new(unit_id: u64) -> Self {
        Self {
            unit_id,
            collected_at: Utc::now(),
            sections: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, section: impl Into<String>, data: Value) {
        self.sections.insert(section.into(), data);
    }

    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name)
    }

    /// Records across all sections. Arrays count their elements, objects count once.
    pub fn record_count(&self) -> u64 {
        self.sections.values().map(count_records).sum()
    }
}

fn count_records(value: &Value) -> u64 {
    match value {
        Value::Array(items) => items.len() as u64,
        Value::Null => 0,
        _ => 1,
    }
}

/// Result of collecting one unit. Sections that failed are absent from the
/// document and listed in `errors`.
#[derive(Debug, Clone)]
pub struct CollectionOutcome {
    pub document: CollectedDocument,
    pub api_calls: u64,
    pub errors: Vec<String>,
}

impl CollectionOutcome {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.join("; "))
        }
    }
}

/// Unit selection for bulk runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkFilters {
    /// Stop after this many units.
    pub max_units: Option<usize>,
    /// e.g. `active`, `invited_or_pending`, `completed`.
    pub enrollment_state: Option<String>,
    pub search_term: Option<String>,
    /// Include concluded units alongside available ones.
    pub include_completed: bool,
}

impl BulkFilters {
    pub fn with_max_units(mut self, max_units: usize) -> Self {
        self.max_units = Some(max_units);
        self
    }

    fn request(&self) -> ApiRequest {
        let mut request = ApiRequest::new("/courses").param("state[]", "available");
        if self.include_completed {
            request = request.param("state[]", "completed");
        }
        if let Some(state) = &self.enrollment_state {
            request = request.param("enrollment_state", state);
        }
        if let Some(term) = &self.search_term {
            request = request.param("search_term", term);
        }
        request
    }
}

/// Issues Collect-stage calls through a shared scheduler.
#[derive(Debug, Clone)]
pub struct Collector {
    scheduler: AdaptiveScheduler,
    per_page: u32,
    max_pages: u32,
}

impl Collector {
    pub fn new(scheduler: AdaptiveScheduler, per_page: u32, max_pages: u32) -> Self {
        Self {
            scheduler,
            per_page: per_page.max(1),
            max_pages: max_pages.max(1),
        }
    }

    /// Fetch every section `profile` selects for `unit_id`.
    pub async fn collect_unit(&self, unit_id: u64, profile: &CollectionProfile) -> CollectionOutcome {
        let sections = profile.sections(unit_id);
        let fetched = join_all(sections.iter().map(|section| self.fetch_section(section))).await;

        let mut outcome = CollectionOutcome {
            document: CollectedDocument::new(unit_id),
            api_calls: 0,
            errors: Vec::new(),
        };
        for (section, (calls, result)) in sections.iter().zip(fetched) {
            outcome.api_calls += calls;
            match result {
                Ok(data) => outcome.document.insert(section.name, data),
                Err(error) => {
                    tracing::warn!(unit_id = unit_id, section = section.name, code = error.code(), "Section collection failed");
                    outcome.errors.push(format!("{}: {}", section.name, error));
                }
            }
        }

        tracing::debug!(
            unit_id = unit_id,
            api_calls = outcome.api_calls,
            records = outcome.document.record_count(),
            "Unit collected"
        );
        outcome
    }

    /// List the unit IDs matching `filters`.
    ///
    /// Returns the calls spent alongside the error so a failed discovery
    /// still reports its API usage.
    pub async fn discover_units(&self, filters: &BulkFilters) -> (u64, Result<Vec<u64>>) {
        let limit = filters.max_units.unwrap_or(usize::MAX);
        let (calls, result) = self.fetch_pages(&filters.request(), Priority::High, Some(limit)).await;

        let ids = match result {
            Ok(items) => items,
            Err(error) => return (calls, Err(LmsflowError::Api(error))),
        };

        let mut unit_ids = Vec::new();
        for item in &ids {
            match item.get("id").and_then(Value::as_u64) {
                Some(id) => unit_ids.push(id),
                None => {
                    return (
                        calls,
                        Err(LmsflowError::stage("discover", format!("unit listing entry without numeric id: {}", item))),
                    );
                }
            }
        }
        unit_ids.truncate(limit);
        (calls, Ok(unit_ids))
    }

    async fn fetch_section(&self, section: &Section) -> (u64, std::result::Result<Value, ApiError>) {
        if !section.paginated {
            let result = self.scheduler.execute(section.request.clone(), section.priority).await;
            return (1, result.outcome.map(|response| response.body));
        }
        let (calls, result) = self.fetch_pages(&section.request, section.priority, None).await;
        (calls, result.map(Value::Array))
    }

    /// Follow `page=N` while pages come back full, up to `max_pages` or `limit` items.
    async fn fetch_pages(
        &self,
        request: &ApiRequest,
        priority: Priority,
        limit: Option<usize>,
    ) -> (u64, std::result::Result<Vec<Value>, ApiError>) {
        let mut items = Vec::new();
        let mut calls = 0;

        for page in 1..=self.max_pages {
            let paged = request.clone().param("page", page).param("per_page", self.per_page);
            calls += 1;
            let body = match self.scheduler.execute(paged, priority).await.outcome {
                Ok(response) => response.body,
                Err(error) => return (calls, Err(error)),
            };

            let page_items = match body {
                Value::Array(page_items) => page_items,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            let full = page_items.len() >= self.per_page as usize;
            items.extend(page_items);

            if !full || limit.is_some_and(|limit| items.len() >= limit) {
                break;
            }
            if page == self.max_pages {
                tracing::warn!(endpoint = %request.endpoint, max_pages = self.max_pages, "Page limit reached, listing truncated");
            }
        }

        (calls, Ok(items))
    }
}
