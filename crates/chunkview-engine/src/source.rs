#![forbid(unsafe_code)]

//! The data source contract and an in-memory implementation.
//!
//! A [`DataSource`] owns storage, sorting, filtering, and selection. The
//! engine only shapes requests to it. All methods are blocking and are called
//! from background tasks, never from the update loop, which is why the trait
//! requires `Send + Sync`.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::item::{DataItem, ItemFlags, ItemId};

/// Sort direction for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// One sort key: a field name and a direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Sort and filter state forwarded verbatim to the source.
///
/// Filters are `field -> needle` pairs; their interpretation belongs to the
/// source. A `BTreeMap` keeps requests reproducible for equal queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueryState {
    pub sort: Vec<SortKey>,
    pub filters: BTreeMap<String, String>,
}

impl QueryState {
    #[must_use]
    pub fn sorted_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    #[must_use]
    pub fn filtered(mut self, field: impl Into<String>, needle: impl Into<String>) -> Self {
        self.filters.insert(field.into(), needle.into());
        self
    }

    pub fn is_identity(&self) -> bool {
        self.sort.is_empty() && self.filters.is_empty()
    }
}

/// A request for one chunk.
///
/// Identical chunk start and query always produce an equal request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DataRequest {
    /// First absolute index requested.
    pub start: usize,
    /// Number of items requested. The last chunk may come back shorter.
    pub count: usize,
    /// Sort and filter state at dispatch time.
    pub query: QueryState,
}

impl DataRequest {
    pub fn new(start: usize, count: usize, query: QueryState) -> Self {
        Self {
            start,
            count,
            query,
        }
    }
}

/// Selection mutations forwarded to the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOp {
    /// Toggle the item at an absolute index in the current view.
    Toggle(usize),
    /// Toggle the item with this id.
    ToggleId(ItemId),
    /// Select every item in the current view.
    SelectAll,
    /// Deselect everything.
    Clear,
    /// Select the half-open index range `[start, end)`.
    Range { start: usize, end: usize },
}

/// An item whose selection state changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedItem {
    pub id: ItemId,
    /// Position in the current view, when the source knows it.
    pub index: Option<usize>,
}

/// What a selection mutation touched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectionOutcome {
    pub affected: Vec<AffectedItem>,
    /// The change may touch any row (select-all, clear).
    pub all: bool,
}

impl SelectionOutcome {
    pub fn everything() -> Self {
        Self {
            affected: Vec::new(),
            all: true,
        }
    }
}

/// Errors reported by a data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The backend cannot be reached right now.
    Unavailable(String),
    /// A request started past the end of the current view.
    OutOfRange { start: usize, total: usize },
    /// Any other backend failure.
    Backend(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(why) => write!(f, "data source unavailable: {why}"),
            Self::OutOfRange { start, total } => {
                write!(f, "request start {start} is out of range (total {total})")
            }
            Self::Backend(why) => write!(f, "data source error: {why}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Contract between the engine and whatever holds the data.
pub trait DataSource: Send + Sync + 'static {
    /// Opaque payload type.
    type Item: Send + 'static;

    /// Load `[start, start + count)` of the view described by `request.query`,
    /// in ascending index order. Only the last chunk may be shorter.
    fn load_chunk(&self, request: &DataRequest) -> Result<Vec<DataItem<Self::Item>>, SourceError>;

    /// Number of items in the view described by `query`.
    fn total(&self, query: &QueryState) -> Result<usize, SourceError>;

    /// Apply a selection mutation and report what it touched.
    fn apply_selection(
        &self,
        op: &SelectionOp,
        query: &QueryState,
    ) -> Result<SelectionOutcome, SourceError>;

    /// Identity of an item. Pure and cheap.
    fn item_id(&self, item: &Self::Item) -> ItemId;
}

impl<S: DataSource> DataSource for Arc<S> {
    type Item = S::Item;

    fn load_chunk(&self, request: &DataRequest) -> Result<Vec<DataItem<Self::Item>>, SourceError> {
        (**self).load_chunk(request)
    }

    fn total(&self, query: &QueryState) -> Result<usize, SourceError> {
        (**self).total(query)
    }

    fn apply_selection(
        &self,
        op: &SelectionOp,
        query: &QueryState,
    ) -> Result<SelectionOutcome, SourceError> {
        (**self).apply_selection(op, query)
    }

    fn item_id(&self, item: &Self::Item) -> ItemId {
        (**self).item_id(item)
    }
}

type IdFn<T> = Box<dyn Fn(&T) -> ItemId + Send + Sync>;
type FieldFn<T> = Box<dyn Fn(&T, &str) -> Option<String> + Send + Sync>;

/// In-memory [`DataSource`] over a `Vec`.
///
/// Sorting compares field values numerically when both parse as numbers and
/// as strings otherwise; missing values sort last. A filter keeps rows whose
/// field contains the needle, case-insensitively. The sorted and filtered
/// view is memoised per query.
pub struct VecDataSource<T> {
    rows: Vec<T>,
    id_of: IdFn<T>,
    field: FieldFn<T>,
    selected: RwLock<HashSet<ItemId>>,
    view: RwLock<Option<(QueryState, Arc<Vec<usize>>)>>,
}

impl<T> fmt::Debug for VecDataSource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VecDataSource")
            .field("rows", &self.rows.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> VecDataSource<T> {
    /// Create a source. `id_of` must return a distinct id per row.
    pub fn new<F>(rows: Vec<T>, id_of: F) -> Self
    where
        F: Fn(&T) -> ItemId + Send + Sync + 'static,
    {
        Self {
            rows,
            id_of: Box::new(id_of),
            field: Box::new(|_, _| None),
            selected: RwLock::new(HashSet::new()),
            view: RwLock::new(None),
        }
    }

    /// Set the field accessor used by sorting and filtering.
    #[must_use]
    pub fn with_fields<F>(mut self, field: F) -> Self
    where
        F: Fn(&T, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.field = Box::new(field);
        self
    }

    /// Number of rows before filtering.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Ids currently selected, in no particular order.
    pub fn selected_ids(&self) -> Vec<ItemId> {
        match self.selected.read() {
            Ok(set) => set.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    fn view_for(&self, query: &QueryState) -> Arc<Vec<usize>> {
        if let Ok(cached) = self.view.read()
            && let Some((q, view)) = cached.as_ref()
            && q == query
        {
            return Arc::clone(view);
        }
        let view = Arc::new(self.build_view(query));
        if let Ok(mut cached) = self.view.write() {
            *cached = Some((query.clone(), Arc::clone(&view)));
        }
        view
    }

    fn build_view(&self, query: &QueryState) -> Vec<usize> {
        let mut view: Vec<usize> = (0..self.rows.len())
            .filter(|&i| {
                query.filters.iter().all(|(field, needle)| {
                    (self.field)(&self.rows[i], field).is_some_and(|value| {
                        value.to_lowercase().contains(&needle.to_lowercase())
                    })
                })
            })
            .collect();
        if !query.sort.is_empty() {
            // Stable sort keeps source order among equal keys.
            view.sort_by(|&a, &b| {
                for key in &query.sort {
                    let va = (self.field)(&self.rows[a], &key.field);
                    let vb = (self.field)(&self.rows[b], &key.field);
                    let ord = compare_values(va.as_deref(), vb.as_deref());
                    let ord = match key.direction {
                        SortDirection::Ascending => ord,
                        SortDirection::Descending => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
        }
        view
    }

    fn is_selected(&self, id: &ItemId) -> bool {
        match self.selected.read() {
            Ok(set) => set.contains(id),
            Err(poisoned) => poisoned.into_inner().contains(id),
        }
    }

    fn with_selection<R>(&self, f: impl FnOnce(&mut HashSet<ItemId>) -> R) -> R {
        match self.selected.write() {
            Ok(mut set) => f(&mut set),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn id_at(&self, view: &[usize], index: usize) -> Result<ItemId, SourceError> {
        view.get(index)
            .map(|&row| (self.id_of)(&self.rows[row]))
            .ok_or(SourceError::OutOfRange {
                start: index,
                total: view.len(),
            })
    }
}

/// Total order over field values: numbers (by value), then text
/// (lexicographic), then missing values.
fn compare_values(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (a.trim().parse::<f64>(), b.trim().parse::<f64>()) {
            (Ok(x), Ok(y)) => x.total_cmp(&y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => a.cmp(b),
        },
    }
}

impl<T: Clone + Send + Sync + 'static> DataSource for VecDataSource<T> {
    type Item = T;

    fn load_chunk(&self, request: &DataRequest) -> Result<Vec<DataItem<T>>, SourceError> {
        let view = self.view_for(&request.query);
        if request.start >= view.len() && !(request.start == 0 && view.is_empty()) {
            return Err(SourceError::OutOfRange {
                start: request.start,
                total: view.len(),
            });
        }
        let end = request.start.saturating_add(request.count).min(view.len());
        Ok(view[request.start..end]
            .iter()
            .map(|&row| {
                let payload = self.rows[row].clone();
                let id = (self.id_of)(&payload);
                let flags = if self.is_selected(&id) {
                    ItemFlags::SELECTED
                } else {
                    ItemFlags::empty()
                };
                DataItem { id, payload, flags }
            })
            .collect())
    }

    fn total(&self, query: &QueryState) -> Result<usize, SourceError> {
        Ok(self.view_for(query).len())
    }

    fn apply_selection(
        &self,
        op: &SelectionOp,
        query: &QueryState,
    ) -> Result<SelectionOutcome, SourceError> {
        let view = self.view_for(query);
        match op {
            SelectionOp::Toggle(index) => {
                let id = self.id_at(&view, *index)?;
                self.with_selection(|set| {
                    if !set.remove(&id) {
                        set.insert(id.clone());
                    }
                });
                Ok(SelectionOutcome {
                    affected: vec![AffectedItem {
                        id,
                        index: Some(*index),
                    }],
                    all: false,
                })
            }
            SelectionOp::ToggleId(id) => {
                let index = view
                    .iter()
                    .position(|&row| (self.id_of)(&self.rows[row]) == *id);
                self.with_selection(|set| {
                    if !set.remove(id) {
                        set.insert(id.clone());
                    }
                });
                Ok(SelectionOutcome {
                    affected: vec![AffectedItem {
                        id: id.clone(),
                        index,
                    }],
                    all: false,
                })
            }
            SelectionOp::SelectAll => {
                let ids: Vec<ItemId> = view
                    .iter()
                    .map(|&row| (self.id_of)(&self.rows[row]))
                    .collect();
                self.with_selection(|set| set.extend(ids));
                Ok(SelectionOutcome::everything())
            }
            SelectionOp::Clear => {
                self.with_selection(HashSet::clear);
                Ok(SelectionOutcome::everything())
            }
            SelectionOp::Range { start, end } => {
                if *start >= view.len() {
                    return Err(SourceError::OutOfRange {
                        start: *start,
                        total: view.len(),
                    });
                }
                let end = (*end).min(view.len());
                let affected: Vec<AffectedItem> = (*start..end)
                    .map(|index| AffectedItem {
                        id: (self.id_of)(&self.rows[view[index]]),
                        index: Some(index),
                    })
                    .collect();
                self.with_selection(|set| {
                    set.extend(affected.iter().map(|a| a.id.clone()));
                });
                Ok(SelectionOutcome {
                    affected,
                    all: false,
                })
            }
        }
    }

    fn item_id(&self, item: &T) -> ItemId {
        (self.id_of)(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: u32,
        name: &'static str,
        size: u32,
    }

    fn source() -> VecDataSource<Row> {
        let rows = vec![
            Row { id: 1, name: "beta", size: 10 },
            Row { id: 2, name: "alpha", size: 9 },
            Row { id: 3, name: "gamma", size: 100 },
            Row { id: 4, name: "Alpine", size: 9 },
        ];
        VecDataSource::new(rows, |r: &Row| ItemId::new(r.id.to_string())).with_fields(
            |r: &Row, field: &str| match field {
                "name" => Some(r.name.to_owned()),
                "size" => Some(r.size.to_string()),
                _ => None,
            },
        )
    }

    fn ids(items: &[DataItem<Row>]) -> Vec<u32> {
        items.iter().map(|i| i.payload.id).collect()
    }

    #[test]
    fn identity_view_and_short_last_chunk() {
        let src = source();
        let q = QueryState::default();
        assert_eq!(src.total(&q).unwrap(), 4);
        let items = src.load_chunk(&DataRequest::new(2, 3, q.clone())).unwrap();
        assert_eq!(ids(&items), vec![3, 4]);
        assert_eq!(
            src.load_chunk(&DataRequest::new(4, 3, q)),
            Err(SourceError::OutOfRange { start: 4, total: 4 })
        );
    }

    #[test]
    fn numeric_sort_is_numeric() {
        let src = source();
        let q = QueryState::default()
            .sorted_by(SortKey::asc("size"))
            .sorted_by(SortKey::desc("name"));
        let items = src.load_chunk(&DataRequest::new(0, 10, q)).unwrap();
        // 9 < 10 < 100 numerically; ties broken by name descending.
        assert_eq!(ids(&items), vec![2, 4, 1, 3]);
    }

    #[test]
    fn mixed_values_order_numbers_before_text() {
        let values = ["1a", "10", "9", "NaN", "abc", "-2"];
        for a in values {
            for b in values {
                for c in values {
                    let ab = compare_values(Some(a), Some(b));
                    let bc = compare_values(Some(b), Some(c));
                    if ab == bc && ab != Ordering::Equal {
                        assert_eq!(compare_values(Some(a), Some(c)), ab, "{a} {b} {c}");
                    }
                }
            }
        }

        let mut sorted: Vec<Option<&str>> =
            vec![Some("1a"), None, Some("10"), Some("9"), Some("abc"), Some("-2")];
        sorted.sort_by(|a, b| compare_values(*a, *b));
        assert_eq!(
            sorted,
            vec![Some("-2"), Some("9"), Some("10"), Some("1a"), Some("abc"), None]
        );
    }

    #[test]
    fn filters_are_case_insensitive_substrings() {
        let src = source();
        let q = QueryState::default().filtered("name", "ALP");
        assert_eq!(src.total(&q).unwrap(), 2);
        let unknown = QueryState::default().filtered("colour", "red");
        assert_eq!(src.total(&unknown).unwrap(), 0);
    }

    #[test]
    fn toggle_reports_index_and_flags_item() {
        let src = source();
        let q = QueryState::default();
        let outcome = src.apply_selection(&SelectionOp::Toggle(1), &q).unwrap();
        assert_eq!(
            outcome.affected,
            vec![AffectedItem {
                id: ItemId::new("2"),
                index: Some(1)
            }]
        );
        let items = src.load_chunk(&DataRequest::new(0, 4, q.clone())).unwrap();
        assert!(items[1].is_selected());
        assert!(!items[0].is_selected());

        src.apply_selection(&SelectionOp::Toggle(1), &q).unwrap();
        assert!(src.selected_ids().is_empty());
    }

    #[test]
    fn toggle_id_outside_view_has_no_index() {
        let src = source();
        let q = QueryState::default().filtered("name", "gamma");
        let outcome = src
            .apply_selection(&SelectionOp::ToggleId(ItemId::new("1")), &q)
            .unwrap();
        assert_eq!(outcome.affected[0].index, None);
        assert_eq!(src.selected_ids(), vec![ItemId::new("1")]);
    }

    #[test]
    fn select_all_and_clear_touch_everything() {
        let src = source();
        let q = QueryState::default();
        assert!(src.apply_selection(&SelectionOp::SelectAll, &q).unwrap().all);
        assert_eq!(src.selected_ids().len(), 4);
        assert!(src.apply_selection(&SelectionOp::Clear, &q).unwrap().all);
        assert!(src.selected_ids().is_empty());
    }

    #[test]
    fn range_selection_clips_to_view() {
        let src = source();
        let q = QueryState::default();
        let outcome = src
            .apply_selection(&SelectionOp::Range { start: 2, end: 99 }, &q)
            .unwrap();
        let indices: Vec<_> = outcome.affected.iter().map(|a| a.index).collect();
        assert_eq!(indices, vec![Some(2), Some(3)]);
        assert!(src.apply_selection(&SelectionOp::Range { start: 9, end: 10 }, &q).is_err());
    }

    #[test]
    fn view_is_memoised_per_query() {
        let src = source();
        let q = QueryState::default().sorted_by(SortKey::asc("name"));
        let a = src.view_for(&q);
        let b = src.view_for(&q);
        assert!(Arc::ptr_eq(&a, &b));
        let c = src.view_for(&QueryState::default());
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
