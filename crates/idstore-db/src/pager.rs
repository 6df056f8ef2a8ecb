//! Keyset pagination.
//!
//! A [`KeysetPager`] runs one probe query when it is created. The probe
//! numbers the filtered, ordered rows and keeps the sort key of the first row
//! of every page. Page `i` is then fetched directly as the rows whose key is
//! at or after `start(i)` and before `start(i + 1)`, so a fetch costs one
//! index range scan regardless of how deep the page is.
//!
//! Bounding each page by the next page's start key means rows inserted after
//! the probe can make a page longer, but can never push a row out of the page
//! set it was probed into.

use idstore_types::api::Page;
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params_from_iter};

use crate::error::{Result, attributes};
use crate::session::DbTransaction;

pub const MAX_PAGE_SIZE: u32 = 1000;

pub(crate) type RowMapper<T> = fn(&Row<'_>) -> rusqlite::Result<T>;

/// One ordering term. The last term of an ordering must be unique so that
/// keys define a total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OrderTerm {
    pub expr: &'static str,
    pub ascending: bool,
}

impl OrderTerm {
    pub fn asc(expr: &'static str) -> Self {
        Self { expr, ascending: true }
    }

    pub fn new(expr: &'static str, ascending: bool) -> Self {
        Self { expr, ascending }
    }
}

/// Conjunction of SQL predicates with their positional parameters.
#[derive(Debug, Clone, Default)]
pub(crate) struct Filter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a clause whose `?` placeholders bind `params` in order.
    pub fn and(mut self, clause: impl Into<String>, params: impl IntoIterator<Item = Value>) -> Self {
        self.clauses.push(clause.into());
        self.params.extend(params);
        self
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    fn sql(&self) -> String {
        if self.clauses.is_empty() {
            "1 = 1".to_string()
        } else {
            self.clauses
                .iter()
                .map(|c| format!("({})", c))
                .collect::<Vec<_>>()
                .join(" AND ")
        }
    }
}

/// A fixed, filtered and ordered row set.
#[derive(Debug, Clone)]
pub(crate) struct KeysetQuery {
    pub columns: &'static str,
    pub from: &'static str,
    pub filter: Filter,
    pub order: Vec<OrderTerm>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bound {
    AtOrAfter,
    After,
    Before,
}

impl KeysetQuery {
    fn order_by(&self) -> String {
        self.order
            .iter()
            .map(|t| format!("{} {}", t.expr, if t.ascending { "ASC" } else { "DESC" }))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Lexicographic comparison of the ordering terms against `key`,
    /// honouring each term's direction.
    fn key_predicate(&self, bound: Bound, key: &[Value], params: &mut Vec<Value>) -> String {
        let mut disjuncts = Vec::with_capacity(self.order.len() + 1);
        for (i, term) in self.order.iter().enumerate() {
            let mut parts = Vec::with_capacity(i + 1);
            for (prefix, value) in self.order[..i].iter().zip(key) {
                parts.push(format!("{} = ?", prefix.expr));
                params.push(value.clone());
            }
            let op = match (bound, term.ascending) {
                (Bound::Before, true) | (Bound::AtOrAfter | Bound::After, false) => "<",
                (Bound::Before, false) | (Bound::AtOrAfter | Bound::After, true) => ">",
            };
            parts.push(format!("{} {} ?", term.expr, op));
            params.push(key[i].clone());
            disjuncts.push(format!("({})", parts.join(" AND ")));
        }
        if bound == Bound::AtOrAfter {
            let mut parts = Vec::with_capacity(self.order.len());
            for (term, value) in self.order.iter().zip(key) {
                parts.push(format!("{} = ?", term.expr));
                params.push(value.clone());
            }
            disjuncts.push(format!("({})", parts.join(" AND ")));
        }
        format!("({})", disjuncts.join(" OR "))
    }

    fn probe_sql(&self) -> String {
        let keys = self
            .order
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{} AS __k{}", t.expr, i))
            .collect::<Vec<_>>()
            .join(", ");
        let outer = (0..self.order.len())
            .map(|i| format!("__k{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT {outer} FROM (SELECT {keys}, row_number() OVER (ORDER BY {order}) AS __rn \
             FROM {from} WHERE {filter}) WHERE (__rn - 1) % ? = 0 ORDER BY __rn",
            order = self.order_by(),
            from = self.from,
            filter = self.filter.sql(),
        )
    }

    fn page_sql(&self, lower: Option<&[Value]>, upper: Option<&[Value]>) -> (String, Vec<Value>) {
        let mut params = self.filter.params.clone();
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {}",
            self.columns,
            self.from,
            self.filter.sql()
        );
        if let Some(key) = lower {
            sql.push_str(" AND ");
            sql.push_str(&self.key_predicate(Bound::AtOrAfter, key, &mut params));
        }
        if let Some(key) = upper {
            sql.push_str(" AND ");
            sql.push_str(&self.key_predicate(Bound::Before, key, &mut params));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&self.order_by());
        (sql, params)
    }

    fn seek_sql(&self, after: Option<&[Value]>, limit: u32) -> (String, Vec<Value>) {
        let mut params = self.filter.params.clone();
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {}",
            self.columns,
            self.from,
            self.filter.sql()
        );
        if let Some(key) = after {
            sql.push_str(" AND ");
            sql.push_str(&self.key_predicate(Bound::After, key, &mut params));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&self.order_by());
        sql.push_str(" LIMIT ?");
        params.push(Value::Integer(i64::from(limit)));
        (sql, params)
    }
}

pub(crate) fn clamp_page_size(size: u32) -> u32 {
    size.clamp(1, MAX_PAGE_SIZE)
}

/// Rows strictly after `after` (or from the start), at most `limit` of them.
pub(crate) fn seek<T>(
    conn: &Connection,
    query: &KeysetQuery,
    after: Option<&[Value]>,
    limit: u32,
    map: RowMapper<T>,
) -> rusqlite::Result<Vec<T>> {
    let (sql, params) = query.seek_sql(after, clamp_page_size(limit));
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), map)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Random-access pager over a keyset query. The pager does not hold the
/// transaction; each fetch runs in whichever transaction is passed in.
pub struct KeysetPager<T> {
    query: KeysetQuery,
    map: RowMapper<T>,
    page_size: u32,
    /// Sort key of the first row of each page.
    starts: Vec<Vec<Value>>,
    index: usize,
}

impl<T> KeysetPager<T> {
    pub(crate) fn new(
        tx: &DbTransaction<'_>,
        query: KeysetQuery,
        page_size: u32,
        map: RowMapper<T>,
    ) -> Result<Self> {
        let page_size = clamp_page_size(page_size);
        let width = query.order.len();
        let attrs = attributes([("page_size", page_size.to_string())]);

        let starts = tx.run(&attrs, |conn| {
            let mut params = query.filter.params.clone();
            params.push(Value::Integer(i64::from(page_size)));

            let mut stmt = conn.prepare(&query.probe_sql())?;
            let starts = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    (0..width)
                        .map(|i| row.get::<_, Value>(i))
                        .collect::<rusqlite::Result<Vec<Value>>>()
                })?
                .collect::<std::result::Result<Vec<Vec<Value>>, _>>()?;
            Ok(starts)
        })?;

        Ok(Self {
            query,
            map,
            page_size,
            starts,
            index: 0,
        })
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Always at least 1; an empty result set has one empty page.
    pub fn page_count(&self) -> u32 {
        self.starts.len().max(1) as u32
    }

    pub fn page_index(&self) -> u32 {
        self.index as u32
    }

    pub fn page_current(&self, tx: &DbTransaction<'_>) -> Result<Page<T>> {
        let lower = self.starts.get(self.index).map(Vec::as_slice);
        let upper = self.starts.get(self.index + 1).map(Vec::as_slice);
        let (sql, params) = self.query.page_sql(lower, upper);
        let attrs = attributes([("page_index", self.index.to_string())]);

        let items = tx.run(&attrs, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let items = stmt
                .query_map(params_from_iter(params.iter()), self.map)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(items)
        })?;

        Ok(Page {
            items,
            page_index: self.page_index(),
            page_count: self.page_count(),
            page_first_offset: self.index as u64 * u64::from(self.page_size),
        })
    }

    /// Move to the next page, staying on the last page once there.
    pub fn page_next(&mut self, tx: &DbTransaction<'_>) -> Result<Page<T>> {
        let last = self.page_count() as usize - 1;
        self.index = (self.index + 1).min(last);
        self.page_current(tx)
    }

    /// Move to the previous page, staying on the first page once there.
    pub fn page_previous(&mut self, tx: &DbTransaction<'_>) -> Result<Page<T>> {
        self.index = self.index.saturating_sub(1);
        self.page_current(tx)
    }

    /// Jump to `index`, clamped to the last page.
    pub fn page_at(&mut self, tx: &DbTransaction<'_>, index: u32) -> Result<Page<T>> {
        let last = self.page_count() as usize - 1;
        self.index = (index as usize).min(last);
        self.page_current(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> KeysetQuery {
        KeysetQuery {
            columns: "id, name",
            from: "things",
            filter: Filter::new().and("name <> ?", [Value::Text("skip".into())]),
            order: vec![OrderTerm::new("name", false), OrderTerm::asc("id")],
        }
    }

    #[test]
    fn at_or_after_respects_directions() {
        let q = query();
        let mut params = Vec::new();
        let sql = q.key_predicate(
            Bound::AtOrAfter,
            &[Value::Text("m".into()), Value::Integer(7)],
            &mut params,
        );
        assert_eq!(sql, "((name < ?) OR (name = ? AND id > ?) OR (name = ? AND id = ?))");
        assert_eq!(params.len(), 5);
    }

    #[test]
    fn before_flips_comparisons_without_equality() {
        let q = query();
        let mut params = Vec::new();
        let sql = q.key_predicate(
            Bound::Before,
            &[Value::Text("m".into()), Value::Integer(7)],
            &mut params,
        );
        assert_eq!(sql, "((name > ?) OR (name = ? AND id < ?))");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn seek_binds_filter_then_key_then_limit() {
        let q = query();
        let (sql, params) = q.seek_sql(Some(&[Value::Text("m".into()), Value::Integer(7)]), 10);
        assert!(sql.starts_with("SELECT id, name FROM things WHERE (name <> ?) AND "));
        assert!(sql.ends_with("ORDER BY name DESC, id ASC LIMIT ?"));
        assert_eq!(params.first(), Some(&Value::Text("skip".into())));
        assert_eq!(params.last(), Some(&Value::Integer(10)));
        assert_eq!(params.len(), 1 + 3 + 1);
    }

    #[test]
    fn page_sizes_are_clamped() {
        assert_eq!(clamp_page_size(0), 1);
        assert_eq!(clamp_page_size(50), 50);
        assert_eq!(clamp_page_size(5000), MAX_PAGE_SIZE);
    }

    #[test]
    fn probe_over_plain_table_finds_page_starts() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE things (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
            .unwrap();
        for i in 0..10 {
            conn.execute("INSERT INTO things (id, name) VALUES (?1, ?2)", (i, format!("n{}", i % 3)))
                .unwrap();
        }

        let q = query();
        let mut params = q.filter.params.clone();
        params.push(Value::Integer(4));
        let mut stmt = conn.prepare(&q.probe_sql()).unwrap();
        let starts: Vec<(String, i64)> = stmt
            .query_map(params_from_iter(params.iter()), |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        // name DESC, id ASC: n2:[2,5,8] n1:[1,4,7] n0:[0,3,6,9]
        assert_eq!(
            starts,
            vec![("n2".to_string(), 2), ("n1".to_string(), 4), ("n0".to_string(), 6)]
        );
    }
}
