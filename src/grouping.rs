//! Date-grouped lists (login logs, feedback, archived sheets).
//!
//! Rows are grouped by the calendar date of a timestamp column. The outer
//! view pages over groups; every group keeps its own row cursor.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::view::{clamp_page, paginate, PageSize, PageSpec, Tabular};

/// `"2024-01-02 08:00:00"` and `"2024-01-02T08:00:00"` both give `"2024-01-02"`.
pub fn date_key(timestamp: &str) -> &str {
    let t = timestamp.trim();
    match t.find(|c: char| c == ' ' || c == 'T') {
        Some(i) => &t[..i],
        None => t,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateGroup<T> {
    pub date: String,
    pub rows: Vec<T>,
}

/// Groups ordered newest date first; rows keep source order inside a group.
pub fn group_by_date<T: Tabular + Clone>(rows: &[T], field: &str) -> Vec<DateGroup<T>> {
    let mut by_date: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for row in rows {
        let stamp = row.cell(field).unwrap_or_default();
        by_date
            .entry(date_key(&stamp).to_string())
            .or_default()
            .push(row.clone());
    }
    by_date
        .into_iter()
        .rev()
        .map(|(date, rows)| DateGroup { date, rows })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupWindow<T> {
    pub date: String,
    pub rows: Vec<T>,
    pub total_entries: usize,
    pub start_entry: usize,
    pub end_entry: usize,
    pub total_pages: usize,
    pub page_index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedWindow<T> {
    pub groups: Vec<GroupWindow<T>>,
    pub total_groups: usize,
    pub total_pages: usize,
    pub page_index: usize,
}

/// Two independent cursors: one over groups, one per group over its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupedView {
    group_page: PageSpec,
    row_size: PageSize,
    row_pages: HashMap<String, usize>,
}

impl GroupedView {
    pub fn new(group_size: PageSize, row_size: PageSize) -> Self {
        Self {
            group_page: PageSpec {
                size: group_size,
                index: 1,
            },
            row_size,
            row_pages: HashMap::new(),
        }
    }

    pub fn row_page(&self, date: &str) -> usize {
        self.row_pages.get(date).copied().unwrap_or(1)
    }

    pub fn set_group_page(&mut self, index: usize) {
        self.group_page.index = index.max(1);
    }

    pub fn set_row_page(&mut self, date: impl Into<String>, index: usize) {
        self.row_pages.insert(date.into(), index.max(1));
    }

    pub fn window<T: Clone>(&self, groups: &[DateGroup<T>]) -> GroupedWindow<T> {
        let outer = paginate(groups, self.group_page);
        let groups = outer
            .visible_rows
            .into_iter()
            .map(|g| {
                let page = PageSpec {
                    size: self.row_size,
                    index: clamp_page(self.row_page(&g.date), g.rows.len(), self.row_size),
                };
                let inner = paginate(&g.rows, page);
                GroupWindow {
                    date: g.date,
                    rows: inner.visible_rows,
                    total_entries: inner.total_entries,
                    start_entry: inner.start_entry,
                    end_entry: inner.end_entry,
                    total_pages: inner.total_pages,
                    page_index: inner.page_index,
                }
            })
            .collect();
        GroupedWindow {
            groups,
            total_groups: outer.total_entries,
            total_pages: outer.total_pages,
            page_index: outer.page_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log(id: u64, at: &str) -> serde_json::Value {
        json!({ "id": id, "login_time": at })
    }

    #[test]
    fn date_key_ignores_time_of_day() {
        assert_eq!(date_key("2024-01-02 08:00:00"), "2024-01-02");
        assert_eq!(date_key("2024-01-02T17:30:00"), "2024-01-02");
        assert_eq!(date_key("2024-01-02"), "2024-01-02");
        assert_eq!(date_key(""), "");
    }

    #[test]
    fn same_day_rows_collapse_and_newest_day_comes_first() {
        let rows = vec![
            log(1, "2024-01-02 08:00:00"),
            log(2, "2024-01-02 17:30:00"),
            log(3, "2024-01-03 09:00:00"),
        ];
        let groups = group_by_date(&rows, "login_time");
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].date, "2024-01-03");
        assert_eq!(groups[1].date, "2024-01-02");
        let ids: Vec<u64> = groups[1].rows.iter().map(|r| r["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn group_order_is_strictly_descending() {
        let rows: Vec<_> = (1..=28)
            .map(|d| log(d, &format!("2024-02-{:02} 10:00:00", (d * 7) % 28 + 1)))
            .collect();
        let groups = group_by_date(&rows, "login_time");
        for pair in groups.windows(2) {
            assert!(pair[0].date > pair[1].date);
        }
    }

    #[test]
    fn group_and_row_cursors_are_independent() {
        let mut rows = Vec::new();
        let mut id = 0;
        for day in 1..=12 {
            for hour in 0..15 {
                id += 1;
                rows.push(log(id, &format!("2024-03-{:02} {:02}:00:00", day, hour + 6)));
            }
        }
        let groups = group_by_date(&rows, "login_time");
        let mut view = GroupedView::new(PageSize::Ten, PageSize::Ten);

        view.set_row_page("2024-03-12", 2);
        view.set_group_page(2);
        assert_eq!(view.row_page("2024-03-12"), 2);

        let w = view.window(&groups);
        assert_eq!(w.page_index, 2);
        assert_eq!(w.total_groups, 12);
        assert_eq!(w.groups.len(), 2);
        assert_eq!(w.groups[0].date, "2024-03-02");

        view.set_row_page("2024-03-02", 2);
        assert_eq!(view.group_page.index, 2);

        let w = view.window(&groups);
        assert_eq!(w.groups[0].page_index, 2);
        assert_eq!((w.groups[0].start_entry, w.groups[0].end_entry), (11, 15));
        assert_eq!(w.groups[1].page_index, 1);

        view.set_group_page(1);
        let w = view.window(&groups);
        assert_eq!(w.groups[0].date, "2024-03-12");
        assert_eq!(w.groups[0].page_index, 2);
    }
}
