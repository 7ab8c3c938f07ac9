//! Filter -> sort -> paginate over rows the sidecar already fetched.
//!
//! Every list screen in the desktop client renders the same window: a set of
//! per-column substring filters, at most one sort key, and a fixed page size.
//! The window is recomputed from the full row set on each call.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A row whose columns can be rendered as strings.
pub trait Tabular {
    /// Derived string for `key`; `None` when the field is absent.
    fn cell(&self, key: &str) -> Option<String>;
}

impl Tabular for serde_json::Value {
    fn cell(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ViewParamError {
    #[error("page size must be one of 10, 25, 50, 100 (got {0})")]
    InvalidPageSize(u64),
    #[error("sort direction must be asc or desc (got {0})")]
    InvalidDirection(String),
    #[error("invalid view params: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageSize {
    #[default]
    Ten,
    TwentyFive,
    Fifty,
    Hundred,
}

impl PageSize {
    pub fn get(self) -> usize {
        match self {
            PageSize::Ten => 10,
            PageSize::TwentyFive => 25,
            PageSize::Fifty => 50,
            PageSize::Hundred => 100,
        }
    }
}

impl TryFrom<u64> for PageSize {
    type Error = ViewParamError;

    fn try_from(v: u64) -> Result<Self, Self::Error> {
        match v {
            10 => Ok(PageSize::Ten),
            25 => Ok(PageSize::TwentyFive),
            50 => Ok(PageSize::Fifty),
            100 => Ok(PageSize::Hundred),
            other => Err(ViewParamError::InvalidPageSize(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn parse(s: &str) -> Result<Self, ViewParamError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(ViewParamError::InvalidDirection(s.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }

    fn flipped(self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub key: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            direction: SortDirection::Asc,
        }
    }
}

/// Column key -> substring predicate. Empty predicates match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnFilters(BTreeMap<String, String>);

impl ColumnFilters {
    pub fn set(&mut self, key: impl Into<String>, needle: impl Into<String>) {
        self.0.insert(key.into(), needle.into());
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn matches<T: Tabular>(&self, row: &T) -> bool {
        self.0.iter().all(|(key, needle)| {
            if needle.is_empty() {
                return true;
            }
            let hay = row.cell(key).unwrap_or_default().to_lowercase();
            hay.contains(&needle.to_lowercase())
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSpec {
    pub size: PageSize,
    /// 1-based.
    pub index: usize,
}

impl Default for PageSpec {
    fn default() -> Self {
        Self {
            size: PageSize::default(),
            index: 1,
        }
    }
}

/// The rows a screen shows plus the "Showing X to Y of Z entries" caption.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableWindow<T> {
    #[serde(rename = "rows")]
    pub visible_rows: Vec<T>,
    pub start_entry: usize,
    pub end_entry: usize,
    pub total_entries: usize,
    pub total_pages: usize,
    pub page_index: usize,
}

pub fn total_pages(count: usize, size: PageSize) -> usize {
    count.div_ceil(size.get()).max(1)
}

pub fn clamp_page(index: usize, count: usize, size: PageSize) -> usize {
    index.clamp(1, total_pages(count, size))
}

/// Rows passing every active filter, in source order.
pub fn filter_rows<'a, T: Tabular>(rows: &'a [T], filters: &ColumnFilters) -> Vec<&'a T> {
    rows.iter().filter(|r| filters.matches(*r)).collect()
}

/// Stable, case-insensitive sort on the derived string for `spec.key`.
pub fn sort_rows<T: Tabular>(rows: &mut Vec<&T>, spec: &SortSpec) {
    let mut keyed: Vec<(String, &T)> = rows
        .drain(..)
        .map(|r| (r.cell(&spec.key).unwrap_or_default().to_lowercase(), r))
        .collect();
    keyed.sort_by(|a, b| {
        let ord = a.0.cmp(&b.0);
        match spec.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });
    rows.extend(keyed.into_iter().map(|(_, r)| r));
}

/// Slice one page out of an already filtered and sorted list.
pub fn paginate<T: Clone>(rows: &[T], page: PageSpec) -> TableWindow<T> {
    let total = rows.len();
    let size = page.size.get();
    let page_index = clamp_page(page.index, total, page.size);
    let start = (page_index - 1) * size;
    let end = (start + size).min(total);
    let visible_rows = if start < end {
        rows[start..end].to_vec()
    } else {
        Vec::new()
    };
    TableWindow {
        visible_rows,
        start_entry: if total == 0 { 0 } else { start + 1 },
        end_entry: end,
        total_entries: total,
        total_pages: total_pages(total, page.size),
        page_index,
    }
}

pub fn apply<T: Tabular + Clone>(
    rows: &[T],
    filters: &ColumnFilters,
    sort: Option<&SortSpec>,
    page: PageSpec,
) -> TableWindow<T> {
    let mut kept = filter_rows(rows, filters);
    if let Some(spec) = sort {
        sort_rows(&mut kept, spec);
    }
    let window = paginate(&kept, page);
    TableWindow {
        visible_rows: window.visible_rows.into_iter().cloned().collect(),
        start_entry: window.start_entry,
        end_entry: window.end_entry,
        total_entries: window.total_entries,
        total_pages: window.total_pages,
        page_index: window.page_index,
    }
}

/// Per-screen view state. Changing a filter or the page size jumps back to
/// page 1; changing the sort keeps the current page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    filters: ColumnFilters,
    sort: Option<SortSpec>,
    page: PageSpec,
}

impl ViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_filter(&mut self, key: impl Into<String>, needle: impl Into<String>) {
        self.filters.set(key, needle);
        self.page.index = 1;
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
        self.page.index = 1;
    }

    pub fn set_page_size(&mut self, size: PageSize) {
        self.page.size = size;
        self.page.index = 1;
    }

    pub fn set_sort(&mut self, sort: Option<SortSpec>) {
        self.sort = sort;
    }

    /// Clicking a header: same key flips direction, a new key starts ascending.
    pub fn toggle_sort(&mut self, key: &str) {
        self.sort = match self.sort.take() {
            Some(s) if s.key == key => Some(SortSpec {
                key: s.key,
                direction: s.direction.flipped(),
            }),
            _ => Some(SortSpec::asc(key)),
        };
    }

    pub fn go_to_page(&mut self, index: usize) {
        self.page.index = index.max(1);
    }

    pub fn window<T: Tabular + Clone>(&self, rows: &[T]) -> TableWindow<T> {
        apply(rows, &self.filters, self.sort.as_ref(), self.page)
    }

    /// The state in the shape `from_params` reads, so a client can send it
    /// back with its next request.
    pub fn to_params(&self) -> serde_json::Value {
        serde_json::json!({
            "filters": self.filters.0,
            "sort": self.sort.as_ref().map(|s| serde_json::json!({
                "key": s.key,
                "direction": s.direction.as_str(),
            })),
            "page": { "size": self.page.size.get(), "index": self.page.index },
        })
    }

    /// Parse `{filters?: {key: needle}, sort?: {key, direction?}|null,
    /// page?: {size?, index?}, clearFilters?: bool, toggleSort?: key}`.
    /// `clearFilters` and `toggleSort` are header clicks applied on top of
    /// the state the request carries.
    pub fn from_params(v: &serde_json::Value) -> Result<Self, ViewParamError> {
        let raw: RawView = serde_json::from_value(v.clone())
            .map_err(|e| ViewParamError::Malformed(e.to_string()))?;
        let mut state = ViewState::new();
        for (k, needle) in raw.filters {
            state.set_filter(k, needle);
        }
        if let Some(s) = raw.sort {
            let direction = match s.direction.as_deref() {
                Some(d) => SortDirection::parse(d)?,
                None => SortDirection::Asc,
            };
            state.set_sort(Some(SortSpec {
                key: s.key,
                direction,
            }));
        }
        if let Some(p) = raw.page {
            if let Some(size) = p.size {
                state.set_page_size(PageSize::try_from(size)?);
            }
            state.go_to_page(p.index.unwrap_or(1) as usize);
        }
        if raw.clear_filters {
            state.clear_filters();
        }
        if let Some(key) = raw.toggle_sort {
            state.toggle_sort(&key);
        }
        Ok(state)
    }
}

#[derive(Debug, Deserialize)]
struct RawView {
    #[serde(default)]
    filters: BTreeMap<String, String>,
    #[serde(default)]
    sort: Option<RawSort>,
    #[serde(default)]
    page: Option<RawPage>,
    #[serde(default, rename = "clearFilters")]
    clear_filters: bool,
    #[serde(default, rename = "toggleSort")]
    toggle_sort: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSort {
    key: String,
    #[serde(default)]
    direction: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    index: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ROLES: [&str; 4] = ["admin", "teacher", "student", "working_student"];

    fn users(n: usize) -> Vec<serde_json::Value> {
        (0..n)
            .map(|i| {
                json!({
                    "id": i + 1,
                    "name": format!("User {:02}", i + 1),
                    "role": ROLES[i % 4],
                })
            })
            .collect()
    }

    // Small deterministic generator so the property checks cover many shapes.
    fn lcg(seed: &mut u64) -> u64 {
        *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        *seed >> 33
    }

    fn random_rows(seed: &mut u64, n: usize) -> Vec<serde_json::Value> {
        (0..n)
            .map(|i| {
                let bucket = lcg(seed) % 5;
                let pc = if lcg(seed) % 3 == 0 {
                    serde_json::Value::Null
                } else {
                    json!(format!("PC-{}", lcg(seed) % 7))
                };
                json!({
                    "id": i,
                    "name": format!("N{}", bucket),
                    "pc": pc,
                })
            })
            .collect()
    }

    const SIZES: [PageSize; 4] = [
        PageSize::Ten,
        PageSize::TwentyFive,
        PageSize::Fifty,
        PageSize::Hundred,
    ];

    fn only(key: &str, needle: &str) -> ColumnFilters {
        let mut f = ColumnFilters::default();
        f.set(key, needle);
        f
    }

    fn desc(key: &str) -> SortSpec {
        SortSpec {
            key: key.into(),
            direction: SortDirection::Desc,
        }
    }

    fn ids(rows: &[serde_json::Value]) -> Vec<u64> {
        rows.iter().map(|r| r["id"].as_u64().unwrap()).collect()
    }

    #[test]
    fn twenty_five_rows_in_pages_of_ten() {
        let rows = users(25);
        let filters = ColumnFilters::default();

        let p1 = apply(&rows, &filters, None, PageSpec { size: PageSize::Ten, index: 1 });
        assert_eq!((p1.start_entry, p1.end_entry), (1, 10));
        assert_eq!(p1.total_pages, 3);
        assert_eq!(p1.visible_rows.len(), 10);

        let p3 = apply(&rows, &filters, None, PageSpec { size: PageSize::Ten, index: 3 });
        assert_eq!((p3.start_entry, p3.end_entry), (21, 25));
        assert_eq!(p3.visible_rows.len(), 5);
        assert_eq!(p3.total_entries, 25);
    }

    #[test]
    fn role_filter_is_independent_of_sort_and_page() {
        let rows = users(20);
        let filters = only("role", "teacher");
        for sort in [None, Some(SortSpec::asc("name")), Some(desc("id"))] {
            for size in SIZES {
                let w = apply(&rows, &filters, sort.as_ref(), PageSpec { size, index: 1 });
                assert_eq!(w.total_entries, 5);
                assert!(w.visible_rows.iter().all(|r| r["role"] == "teacher"));
            }
        }
    }

    #[test]
    fn empty_rows_yield_empty_window() {
        let rows: Vec<serde_json::Value> = Vec::new();
        let w = apply(&rows, &ColumnFilters::default(), None, PageSpec::default());
        assert!(w.visible_rows.is_empty());
        assert_eq!(w.start_entry, 0);
        assert_eq!(w.end_entry, 0);
        assert_eq!(w.total_entries, 0);
        assert_eq!(w.total_pages, 1);
        assert_eq!(w.page_index, 1);
    }

    #[test]
    fn page_index_is_clamped() {
        let rows = users(12);
        let w = apply(&rows, &ColumnFilters::default(), None, PageSpec { size: PageSize::Ten, index: 9 });
        assert_eq!(w.page_index, 2);
        assert_eq!((w.start_entry, w.end_entry), (11, 12));

        let w = apply(&rows, &ColumnFilters::default(), None, PageSpec { size: PageSize::Ten, index: 0 });
        assert_eq!(w.page_index, 1);
    }

    #[test]
    fn filter_is_case_insensitive_and_missing_fields_are_empty() {
        let rows = vec![
            json!({ "id": 1, "name": "ALPHA", "pc": "Lab-01" }),
            json!({ "id": 2, "name": "beta" }),
            json!({ "id": 3, "name": "Alphabet", "pc": null }),
        ];
        let w = apply(&rows, &only("name", "alp"), None, PageSpec::default());
        assert_eq!(ids(&w.visible_rows), vec![1, 3]);

        let w = apply(&rows, &only("pc", "lab"), None, PageSpec::default());
        assert_eq!(ids(&w.visible_rows), vec![1]);

        let w = apply(&rows, &only("pc", ""), None, PageSpec::default());
        assert_eq!(w.total_entries, 3);
    }

    #[test]
    fn sort_is_stable_in_both_directions() {
        let rows = vec![
            json!({ "id": 1, "role": "teacher" }),
            json!({ "id": 2, "role": "Admin" }),
            json!({ "id": 3, "role": "teacher" }),
            json!({ "id": 4, "role": "admin" }),
        ];
        let asc = apply(&rows, &ColumnFilters::default(), Some(&SortSpec::asc("role")), PageSpec::default());
        assert_eq!(ids(&asc.visible_rows), vec![2, 4, 1, 3]);
        let descending = apply(&rows, &ColumnFilters::default(), Some(&desc("role")), PageSpec::default());
        assert_eq!(ids(&descending.visible_rows), vec![1, 3, 2, 4]);
    }

    #[test]
    fn generated_row_sets_hold_window_properties() {
        let mut seed = 42u64;
        for round in 0..60 {
            let n = (lcg(&mut seed) % 140) as usize;
            let rows = random_rows(&mut seed, n);
            let needle = format!("{}", lcg(&mut seed) % 5);
            let filters = if round % 3 == 0 {
                ColumnFilters::default()
            } else {
                only("name", needle.as_str())
            };
            let expected_total = rows.iter().filter(|r| filters.matches(*r)).count();
            let size = SIZES[round % 4];

            let pages = total_pages(expected_total, size);
            for index in 1..=pages {
                let w = apply(&rows, &filters, None, PageSpec { size, index });
                assert!(w.visible_rows.len() <= size.get());
                if index < pages {
                    assert_eq!(w.visible_rows.len(), size.get());
                }
                assert_eq!(w.total_entries, expected_total);
                assert_eq!(w.start_entry == 0 && w.end_entry == 0, expected_total == 0);
            }

            // Filtering twice with the same predicates changes nothing.
            let once: Vec<serde_json::Value> = filter_rows(&rows, &filters).into_iter().cloned().collect();
            let twice: Vec<serde_json::Value> = filter_rows(&once, &filters).into_iter().cloned().collect();
            assert_eq!(once, twice);

            // Without a sort, filtering keeps relative source order.
            let got = ids(&once);
            let mut sorted = got.clone();
            sorted.sort_unstable();
            assert_eq!(got, sorted);

            // Sorting keeps ties in filter order.
            let mut kept = filter_rows(&rows, &filters);
            sort_rows(&mut kept, &SortSpec::asc("name"));
            for pair in kept.windows(2) {
                let key = |r: &serde_json::Value| r["name"].as_str().unwrap_or("").to_lowercase();
                if key(pair[0]) == key(pair[1]) {
                    assert!(pair[0]["id"].as_u64() < pair[1]["id"].as_u64());
                }
            }
        }
    }

    #[test]
    fn filter_and_page_size_changes_reset_to_first_page() {
        let mut state = ViewState::new();
        state.go_to_page(3);
        state.set_filter("role", "student");
        assert_eq!(state.page.index, 1);

        state.go_to_page(4);
        state.set_page_size(PageSize::Fifty);
        assert_eq!(state.page.index, 1);

        state.go_to_page(2);
        state.toggle_sort("name");
        assert_eq!(state.page.index, 2);
        assert_eq!(state.sort.as_ref(), Some(&SortSpec::asc("name")));
        state.toggle_sort("name");
        assert_eq!(state.sort.as_ref(), Some(&desc("name")));
        state.toggle_sort("role");
        assert_eq!(state.sort.as_ref(), Some(&SortSpec::asc("role")));

        state.go_to_page(2);
        state.clear_filters();
        assert_eq!(state.page.index, 1);
    }

    #[test]
    fn parses_view_params() {
        let state = ViewState::from_params(&json!({
            "filters": { "role": "teacher" },
            "sort": { "key": "name", "direction": "DESC" },
            "page": { "size": 25, "index": 2 }
        }))
        .expect("parse view");
        assert_eq!(state.filters, only("role", "teacher"));
        assert_eq!(state.sort.as_ref(), Some(&desc("name")));
        assert_eq!(state.page, PageSpec { size: PageSize::TwentyFive, index: 2 });

        assert_eq!(
            ViewState::from_params(&json!({ "page": { "size": 30 } })),
            Err(ViewParamError::InvalidPageSize(30))
        );
        assert!(matches!(
            ViewState::from_params(&json!({ "sort": { "key": "x", "direction": "up" } })),
            Err(ViewParamError::InvalidDirection(_))
        ));
        assert_eq!(ViewState::from_params(&json!({})), Ok(ViewState::new()));
    }

    #[test]
    fn header_clicks_apply_to_the_carried_state() {
        let carried = json!({
            "filters": { "role": "teacher" },
            "sort": { "key": "name", "direction": "asc" },
            "page": { "size": 25, "index": 3 }
        });

        let mut clicked = carried.clone();
        clicked["toggleSort"] = json!("name");
        let state = ViewState::from_params(&clicked).expect("toggle");
        assert_eq!(state.sort.as_ref(), Some(&desc("name")));
        assert_eq!(state.page.index, 3);

        clicked["toggleSort"] = json!("role");
        let state = ViewState::from_params(&clicked).expect("new key");
        assert_eq!(state.sort.as_ref(), Some(&SortSpec::asc("role")));

        let mut cleared = carried;
        cleared["clearFilters"] = json!(true);
        let state = ViewState::from_params(&cleared).expect("clear");
        assert_eq!(state.filters, ColumnFilters::default());
        assert_eq!(state.page, PageSpec { size: PageSize::TwentyFive, index: 1 });
    }

    #[test]
    fn echoed_state_parses_back_unchanged() {
        let mut state = ViewState::new();
        state.set_filter("pc", "lab");
        state.set_page_size(PageSize::Fifty);
        state.toggle_sort("login_time");
        state.toggle_sort("login_time");
        state.go_to_page(2);

        let echoed = state.to_params();
        assert_eq!(echoed["sort"], json!({ "key": "login_time", "direction": "desc" }));
        assert_eq!(echoed["page"], json!({ "size": 50, "index": 2 }));
        assert_eq!(ViewState::from_params(&echoed), Ok(state));
    }
}
