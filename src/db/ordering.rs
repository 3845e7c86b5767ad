//! Dense 1..N orderings stored in an integer column
//!
//! Used for level positions (whole table), submission placement orders
//! (per level) and pack placement orders (whole table). Every shift is a
//! single UPDATE, so no statement ever leaves two rows on the same slot
//! once it completes.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::error::Result;

/// An ordered column, optionally partitioned by another column
#[derive(Debug, Clone)]
pub struct DenseOrder<'a> {
    table: &'a str,
    column: &'a str,
    partition: Option<(&'a str, Value)>,
}

impl<'a> DenseOrder<'a> {
    pub fn new(table: &'a str, column: &'a str) -> Self {
        Self {
            table,
            column,
            partition: None,
        }
    }

    /// Restrict every statement to rows where `column = value`
    pub fn within(mut self, column: &'a str, value: impl Into<Value>) -> Self {
        self.partition = Some((column, value.into()));
        self
    }

    fn partition_sql(&self, params: &mut Vec<Value>) -> String {
        match &self.partition {
            Some((column, value)) => {
                params.push(value.clone());
                format!(" AND {} = ?", column)
            }
            None => String::new(),
        }
    }

    /// Highest occupied slot, 0 when empty
    pub fn max(&self, conn: &Connection) -> Result<i64> {
        let mut params = Vec::new();
        let partition = self.partition_sql(&mut params);
        let sql = format!(
            "SELECT COALESCE(MAX({col}), 0) FROM {table} WHERE 1{partition}",
            col = self.column,
            table = self.table,
            partition = partition,
        );
        let max = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
        Ok(max)
    }

    /// Push every slot `>= at` down by one, freeing `at`
    pub fn open_gap(&self, conn: &Connection, at: i64) -> Result<usize> {
        let mut params = vec![Value::Integer(at)];
        let partition = self.partition_sql(&mut params);
        let sql = format!(
            "UPDATE {table} SET {col} = {col} + 1 WHERE {col} >= ?{partition}",
            col = self.column,
            table = self.table,
            partition = partition,
        );
        Ok(conn.execute(&sql, params_from_iter(params.iter()))?)
    }

    /// Pull every slot `> at` up by one, after the row at `at` went away
    pub fn close_gap(&self, conn: &Connection, at: i64) -> Result<usize> {
        let mut params = vec![Value::Integer(at)];
        let partition = self.partition_sql(&mut params);
        let sql = format!(
            "UPDATE {table} SET {col} = {col} - 1 WHERE {col} > ?{partition}",
            col = self.column,
            table = self.table,
            partition = partition,
        );
        Ok(conn.execute(&sql, params_from_iter(params.iter()))?)
    }

    /// Move the row `id` from `old` to `new`, shifting everything strictly
    /// between by one toward the vacated slot. Returns the number of rows
    /// shifted (the moved row excluded).
    pub fn move_item(&self, conn: &Connection, id: &str, old: i64, new: i64) -> Result<usize> {
        if old == new {
            return Ok(0);
        }
        let step: i64 = if new < old { 1 } else { -1 };
        let mut params = vec![
            Value::Text(id.to_string()),
            Value::Integer(new),
            Value::Integer(step),
            Value::Integer(old.min(new)),
            Value::Integer(old.max(new)),
        ];
        let partition = self.partition_sql(&mut params);
        let sql = format!(
            "UPDATE {table} SET {col} = CASE WHEN id = ? THEN ? ELSE {col} + ? END \
             WHERE {col} BETWEEN ? AND ?{partition}",
            col = self.column,
            table = self.table,
            partition = partition,
        );
        let changed = conn.execute(&sql, params_from_iter(params.iter()))?;
        Ok(changed.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE items (id TEXT PRIMARY KEY, grp TEXT NOT NULL, pos INTEGER NOT NULL);
             INSERT INTO items VALUES ('a', 'x', 1), ('b', 'x', 2), ('c', 'x', 3), ('d', 'x', 4), ('z', 'y', 1);",
        )
        .unwrap();
        conn
    }

    fn order(conn: &Connection, grp: &str) -> Vec<(String, i64)> {
        let mut stmt = conn
            .prepare("SELECT id, pos FROM items WHERE grp = ? ORDER BY pos")
            .unwrap();
        stmt.query_map([grp], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_move_up_and_down() {
        let conn = setup();
        let order_x = DenseOrder::new("items", "pos").within("grp", "x".to_string());

        assert_eq!(order_x.move_item(&conn, "d", 4, 2).unwrap(), 2);
        let ids: Vec<_> = order(&conn, "x").into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, ["a", "d", "b", "c"]);

        assert_eq!(order_x.move_item(&conn, "a", 1, 4).unwrap(), 3);
        assert_eq!(
            order(&conn, "x"),
            vec![("d".to_string(), 1), ("b".to_string(), 2), ("c".to_string(), 3), ("a".to_string(), 4)]
        );

        // the other partition never moves
        assert_eq!(order(&conn, "y"), vec![("z".to_string(), 1)]);
    }

    #[test]
    fn test_gaps() {
        let conn = setup();
        let order_x = DenseOrder::new("items", "pos").within("grp", "x".to_string());

        assert_eq!(order_x.open_gap(&conn, 2).unwrap(), 3);
        conn.execute("INSERT INTO items VALUES ('n', 'x', 2)", []).unwrap();
        assert_eq!(order_x.max(&conn).unwrap(), 5);

        conn.execute("DELETE FROM items WHERE id = 'b'", []).unwrap();
        assert_eq!(order_x.close_gap(&conn, 3).unwrap(), 2);
        let positions: Vec<_> = order(&conn, "x").into_iter().map(|(_, p)| p).collect();
        assert_eq!(positions, [1, 2, 3, 4]);
    }

    #[test]
    fn test_unpartitioned_max() {
        let conn = setup();
        assert_eq!(DenseOrder::new("items", "pos").max(&conn).unwrap(), 4);
        assert_eq!(DenseOrder::new("items", "pos").within("grp", "none".to_string()).max(&conn).unwrap(), 0);
    }
}
