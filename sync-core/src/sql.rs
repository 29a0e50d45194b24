//! SQL clause injection for SQL-shaped stores.
//!
//! A `StoreAdapter::get_changeset` implementation backed by a relational
//! store can delegate to a raw per-table query instead of hand-rolling
//! filtering logic; this module rewrites that query to add the node-id and
//! time predicates the engine requires, ahead of any user `WHERE` clause.

use crate::store::{NodeIdFilter, TimeFilter};

fn escape_literal(value: &str) -> String {
	value.replace('\'', "''")
}

fn node_clause(table: &str, filter: NodeIdFilter) -> String {
	match filter {
		NodeIdFilter::Only(id) => format!("{table}.node_id = '{}'", escape_literal(&id.to_string())),
		NodeIdFilter::Except(id) => format!("{table}.node_id != '{}'", escape_literal(&id.to_string())),
	}
}

fn time_clause(table: &str, filter: TimeFilter) -> String {
	match filter {
		TimeFilter::ModifiedOn(hlc) => format!("{table}.modified = '{}'", escape_literal(&hlc.to_string())),
		TimeFilter::ModifiedAfter(hlc) => format!("{table}.modified > '{}'", escape_literal(&hlc.to_string())),
	}
}

/// Rewrites `query` to inject the node-id and time filters as AND-clauses
/// ahead of any existing `WHERE` predicate. Positional parameters (`?1`,
/// `?2`, …) in the caller's query are left untouched: the injected clauses
/// use inline string literals rather than new parameters, so no
/// renumbering is needed.
///
/// `query` is expected in the default-template shape, `SELECT * FROM
/// <table>`, optionally followed by a `WHERE` predicate; this function
/// does not validate that `table` actually matches the query's `FROM`.
#[must_use]
pub fn inject_sync_filters(
	table: &str,
	node_filter: NodeIdFilter,
	time_filter: TimeFilter,
	query: &str,
) -> String {
	let injected = format!(
		"{} AND {}",
		node_clause(table, node_filter),
		time_clause(table, time_filter)
	);

	let upper = query.to_uppercase();
	if let Some(pos) = upper.find(" WHERE ") {
		let (before, after) = query.split_at(pos);
		let rest = &after[" WHERE ".len()..];
		format!("{before} WHERE {injected} AND {rest}")
	} else {
		format!("{} WHERE {injected}", query.trim_end())
	}
}
