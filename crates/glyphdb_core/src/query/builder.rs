//! The immutable query builder and its evaluator.

use crate::error::{CoreError, CoreResult};
use crate::query::predicate::Predicate;
use crate::query::source::RowSource;
use crate::value::{Record, Value};
use std::cmp::Ordering;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Smallest first.
    #[default]
    Asc,
    /// Largest first.
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct OrderBy {
    field: String,
    direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Join {
    table: String,
    left: String,
    right: String,
}

/// A declarative read over one table.
///
/// Every builder method returns a new query and leaves `self` untouched,
/// so a base query can be shared and refined. Evaluation happens only in
/// [`execute`](Self::execute), always in this order: fetch, filter,
/// order, offset, limit, projection, join.
///
/// ```rust,no_run
/// use glyphdb_core::{Direction, Predicate, Query};
///
/// let recent = Query::new()
///     .from("files")
///     .filter(Predicate::new().eq("project_id", 1))
///     .order_by("modified", Direction::Desc)
///     .limit(10);
/// let first_page = recent.offset(0);
/// let second_page = recent.offset(10);
/// # let _ = (first_page, second_page);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    table: Option<String>,
    filters: Vec<Predicate>,
    order: Option<OrderBy>,
    offset: Option<usize>,
    limit: Option<usize>,
    join: Option<Join>,
    projection: Option<Vec<String>>,
}

impl Query {
    /// Creates an empty query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the source table, if set.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// Sets the source table.
    #[must_use]
    pub fn from(&self, table: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.table = Some(table.into());
        next
    }

    /// Adds a where clause. Clauses from several calls are conjunctive.
    #[must_use]
    pub fn filter(&self, predicate: Predicate) -> Self {
        let mut next = self.clone();
        next.filters.push(predicate);
        next
    }

    /// Sorts by `field`. Missing fields sort as `Null`; ties keep scan order.
    #[must_use]
    pub fn order_by(&self, field: impl Into<String>, direction: Direction) -> Self {
        let mut next = self.clone();
        next.order = Some(OrderBy {
            field: field.into(),
            direction,
        });
        next
    }

    /// Keeps at most `n` rows.
    #[must_use]
    pub fn limit(&self, n: usize) -> Self {
        let mut next = self.clone();
        next.limit = Some(n);
        next
    }

    /// Skips the first `n` rows.
    #[must_use]
    pub fn offset(&self, n: usize) -> Self {
        let mut next = self.clone();
        next.offset = Some(n);
        next
    }

    /// Merges into each row the fields of the first `table` row whose
    /// `right` field equals the row's `left` field. Rows without a match
    /// are kept unchanged. Only one join is kept; calling this again
    /// replaces it.
    #[must_use]
    pub fn join(
        &self,
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        let mut next = self.clone();
        next.join = Some(Join {
            table: table.into(),
            left: left.into(),
            right: right.into(),
        });
        next
    }

    /// Keeps only the listed fields. `["*"]` keeps everything.
    #[must_use]
    pub fn select<I, S>(&self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        let mut next = self.clone();
        next.projection = match fields.as_slice() {
            [only] if only == "*" => None,
            _ => Some(fields),
        };
        next
    }

    /// Runs the query.
    ///
    /// # Errors
    ///
    /// Returns a validation error if no table was set, or a not-found error
    /// for an unknown source or join table.
    pub fn execute<S: RowSource + ?Sized>(&self, source: &S) -> CoreResult<Vec<Record>> {
        let table = self
            .table
            .as_deref()
            .ok_or_else(|| CoreError::validation("query has no `from` table"))?;

        let mut rows = match self.index_probe() {
            Some((column, value)) => match source.lookup(table, column, value)? {
                Some(rows) => rows,
                None => source.scan(table)?,
            },
            None => source.scan(table)?,
        };

        rows.retain(|row| self.filters.iter().all(|p| p.matches(row)));

        if let Some(order) = &self.order {
            rows.sort_by(|a, b| compare(a, b, order));
        }

        let window = rows
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX));
        let mut rows: Vec<Record> = match &self.projection {
            Some(fields) => window.map(|row| row.project(fields)).collect(),
            None => window.collect(),
        };

        if let Some(join) = &self.join {
            let others = source.scan(&join.table)?;
            for row in &mut rows {
                let key = row.get_or_null(&join.left).clone();
                if key.is_null() {
                    continue;
                }
                if let Some(other) = others.iter().find(|o| o.get(&join.right) == Some(&key)) {
                    row.merge(other);
                }
            }
        }

        Ok(rows)
    }

    fn index_probe(&self) -> Option<(&str, &Value)> {
        match self.filters.as_slice() {
            [only] => only.single_equality().filter(|(_, value)| !value.is_null()),
            _ => None,
        }
    }
}

fn compare(a: &Record, b: &Record, order: &OrderBy) -> Ordering {
    let (x, y) = (a.get_or_null(&order.field), b.get_or_null(&order.field));
    match order.direction {
        Direction::Asc => x.cmp(y),
        Direction::Desc => y.cmp(x),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{compile_tables, parse_schema};
    use crate::store::Catalog;
    use crate::ErrorKind;

    fn catalog() -> Catalog {
        let schema = parse_schema(
            "TABLE: people\nname: text\nage: integer\nteam_id: integer\n\
             TABLE: teams\ntitle: text",
        )
        .unwrap();
        let mut c = Catalog::new("test", compile_tables(&schema.tables).unwrap());
        let people = c.table_mut("people").unwrap();
        for (id, name, age, team) in [
            (1, "Ada", 36, 1),
            (2, "Bob", 25, 2),
            (3, "Cy", 36, 1),
            (4, "Di", 19, 3),
        ] {
            people
                .put(
                    Record::new()
                        .with("id", id)
                        .with("name", name)
                        .with("age", age)
                        .with("team_id", team),
                )
                .unwrap();
        }
        let teams = c.table_mut("teams").unwrap();
        teams.put(Record::new().with("id", 1).with("title", "red")).unwrap();
        teams.put(Record::new().with("id", 2).with("title", "blue")).unwrap();
        c
    }

    fn names(rows: &[Record]) -> Vec<&str> {
        rows.iter().filter_map(|r| r.text("name")).collect()
    }

    #[test]
    fn builders_do_not_mutate() {
        let base = Query::new().from("people");
        let limited = base.limit(1);
        assert_ne!(base, limited);
        assert_eq!(base.execute(&catalog()).unwrap().len(), 4);
        assert_eq!(limited.execute(&catalog()).unwrap().len(), 1);
    }

    #[test]
    fn missing_from_is_rejected() {
        let err = Query::new().limit(1).execute(&catalog()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn filters_are_conjunctive() {
        let rows = Query::new()
            .from("people")
            .filter(Predicate::new().eq("age", 36))
            .filter(Predicate::new().ne("name", "Ada"))
            .execute(&catalog())
            .unwrap();
        assert_eq!(names(&rows), ["Cy"]);
    }

    #[test]
    fn order_is_stable_both_ways() {
        let c = catalog();
        let asc = Query::new().from("people").order_by("age", Direction::Asc);
        assert_eq!(names(&asc.execute(&c).unwrap()), ["Di", "Bob", "Ada", "Cy"]);
        let desc = asc.order_by("age", Direction::Desc);
        assert_eq!(names(&desc.execute(&c).unwrap()), ["Ada", "Cy", "Bob", "Di"]);
    }

    #[test]
    fn offset_applies_before_limit() {
        let rows = Query::new()
            .from("people")
            .limit(2)
            .offset(1)
            .execute(&catalog())
            .unwrap();
        assert_eq!(names(&rows), ["Bob", "Cy"]);
    }

    #[test]
    fn projection_omits_absent_fields() {
        let rows = Query::new()
            .from("people")
            .select(["name", "nickname"])
            .execute(&catalog())
            .unwrap();
        assert_eq!(rows[0].len(), 1);
        assert!(Query::new().select(["*"]).projection.is_none());
    }

    #[test]
    fn join_merges_first_match_and_keeps_unmatched() {
        let rows = Query::new()
            .from("people")
            .join("nowhere", "a", "b")
            .join("teams", "team_id", "id")
            .execute(&catalog())
            .unwrap();
        assert_eq!(rows[0].text("title"), Some("red"));
        assert_eq!(rows[1].text("title"), Some("blue"));
        assert!(rows[3].get("title").is_none());
        // the team row's id overwrites the person's
        assert_eq!(rows[2].integer("id"), Some(1));
    }

    #[test]
    fn index_path_matches_scan() {
        let c = catalog();
        let indexed = Query::new().from("people").filter(Predicate::new().eq("age", 36));
        let scanned = indexed.filter(Predicate::new());
        assert_eq!(indexed.execute(&c).unwrap(), scanned.execute(&c).unwrap());
    }
}
