use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{CatalogEntry, CoverageStatus, DrilldownEntry};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoverageFilter {
    #[default]
    All,
    Full,
    Partial,
    Missing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    #[default]
    DriftCount,
    Coverage,
    Format,
    Severity,
    LastUpdated,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

/// Filter and sort selections for the catalog; persisted with the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CatalogQuery {
    #[serde(default)]
    pub coverage: CoverageFilter,
    /// `None` means any severity.
    #[serde(default)]
    pub severity: Option<String>,
    /// `None` means any format.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub search: String,
    #[serde(default)]
    pub sort: SortColumn,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Lower rank sorts as more severe.
pub fn severity_rank(severity: &str) -> u8 {
    match severity.trim().to_lowercase().as_str() {
        "high" => 0,
        "medium" => 1,
        "low" => 2,
        "none" => 3,
        _ => 4,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogItemView {
    pub entry: CatalogEntry,
    pub total_hosts: usize,
    pub present_count: usize,
    pub coverage_ratio: f64,
    pub coverage_text: String,
    pub coverage: CoverageStatus,
    pub severity_rank: u8,
    pub is_full_coverage: bool,
    pub is_partial_coverage: bool,
    pub is_missing_coverage: bool,
}

impl CatalogItemView {
    pub fn derive(entry: CatalogEntry, total_hosts: usize) -> Self {
        let present_count = entry.present_hosts.len().min(total_hosts);
        let coverage_ratio = if total_hosts == 0 {
            0.0
        } else {
            present_count as f64 / total_hosts as f64
        };
        let coverage = if total_hosts > 0 && present_count == total_hosts {
            CoverageStatus::Full
        } else if present_count == 0 {
            CoverageStatus::Missing
        } else {
            CoverageStatus::Partial
        };
        let severity_rank = severity_rank(&entry.severity);

        Self {
            coverage_text: format!("{present_count}/{total_hosts}"),
            is_full_coverage: coverage == CoverageStatus::Full,
            is_partial_coverage: coverage == CoverageStatus::Partial,
            is_missing_coverage: coverage == CoverageStatus::Missing,
            entry,
            total_hosts,
            present_count,
            coverage_ratio,
            coverage,
            severity_rank,
        }
    }

    fn matches(&self, query: &CatalogQuery) -> bool {
        let coverage_ok = match query.coverage {
            CoverageFilter::All => true,
            CoverageFilter::Full => self.is_full_coverage,
            CoverageFilter::Partial => self.is_partial_coverage,
            CoverageFilter::Missing => self.is_missing_coverage,
        };
        let severity_ok = query
            .severity
            .as_deref()
            .map_or(true, |wanted| same_text(&self.entry.severity, wanted));
        let format_ok = query
            .format
            .as_deref()
            .map_or(true, |wanted| same_text(&self.entry.format, wanted));
        let search = query.search.trim().to_lowercase();
        let search_ok = search.is_empty()
            || self.entry.display_name.to_lowercase().contains(&search)
            || self.entry.config_id.to_lowercase().contains(&search);

        coverage_ok && severity_ok && format_ok && search_ok
    }

    fn compare_column(&self, other: &Self, column: SortColumn) -> Ordering {
        match column {
            SortColumn::DriftCount => self.entry.drift_count.cmp(&other.entry.drift_count),
            SortColumn::Coverage => self.coverage_ratio.total_cmp(&other.coverage_ratio),
            SortColumn::Format => self
                .entry
                .format
                .to_lowercase()
                .cmp(&other.entry.format.to_lowercase()),
            SortColumn::Severity => self.severity_rank.cmp(&other.severity_rank),
            SortColumn::LastUpdated => cmp_timestamps(self.entry.last_updated, other.entry.last_updated),
        }
    }
}

fn cmp_timestamps(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    // Missing timestamps sort as oldest.
    a.cmp(&b)
}

fn tie_break(a: &CatalogItemView, b: &CatalogItemView) -> Ordering {
    a.entry
        .display_name
        .to_lowercase()
        .cmp(&b.entry.display_name.to_lowercase())
        .then_with(|| a.entry.config_id.cmp(&b.entry.config_id))
}

/// Latest catalog snapshot plus per-host drilldown rows.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Catalog {
    items: Vec<CatalogItemView>,
    drilldown: Vec<DrilldownEntry>,
    loaded_at: Option<DateTime<Utc>>,
}

impl Catalog {
    /// Replaces the snapshot wholesale; nothing from the previous load survives.
    pub fn load(
        &mut self,
        entries: Vec<CatalogEntry>,
        drilldown: Vec<DrilldownEntry>,
        total_hosts: usize,
    ) {
        self.items = entries
            .into_iter()
            .map(|entry| CatalogItemView::derive(entry, total_hosts))
            .collect();
        self.drilldown = drilldown;
        self.loaded_at = Some(Utc::now());
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn items(&self) -> &[CatalogItemView] {
        &self.items
    }

    pub fn get(&self, config_id: &str) -> Option<&CatalogItemView> {
        self.items
            .iter()
            .find(|item| item.entry.config_id.eq_ignore_ascii_case(config_id))
    }

    /// Filtered and sorted view; ties always fall back to display name.
    pub fn query(&self, query: &CatalogQuery) -> Vec<CatalogItemView> {
        let mut view = self
            .items
            .iter()
            .filter(|item| item.matches(query))
            .cloned()
            .collect::<Vec<_>>();
        sort_items(&mut view, query.sort, query.direction);
        view
    }

    pub fn missing_hosts_for(&self, config_id: &str) -> Vec<String> {
        self.get(config_id)
            .map(|item| dedupe_hosts(item.entry.missing_hosts.iter()))
            .unwrap_or_default()
    }

    /// Union of missing hosts across every partial or missing entry, in first-seen order.
    pub fn missing_hosts_union(&self) -> Vec<String> {
        dedupe_hosts(
            self.items
                .iter()
                .filter(|item| !item.is_full_coverage)
                .flat_map(|item| item.entry.missing_hosts.iter()),
        )
    }

    pub fn drilldown_for(&self, config_id: &str) -> Vec<&DrilldownEntry> {
        self.drilldown
            .iter()
            .filter(|row| row.config_id.eq_ignore_ascii_case(config_id))
            .collect()
    }
}

pub fn sort_items(items: &mut [CatalogItemView], column: SortColumn, direction: SortDirection) {
    items.sort_by(|a, b| {
        let primary = a.compare_column(b, column);
        let primary = match direction {
            SortDirection::Ascending => primary,
            SortDirection::Descending => primary.reverse(),
        };
        primary.then_with(|| tie_break(a, b))
    });
}

fn dedupe_hosts<'a>(hosts: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    hosts
        .filter(|host| !host.trim().is_empty())
        .filter(|host| seen.insert(host.to_lowercase()))
        .cloned()
        .collect()
}

fn same_text(value: &str, wanted: &str) -> bool {
    value.trim().to_lowercase() == wanted.trim().to_lowercase()
}
