use std::io::Write;

use crate::error::Result;
use crate::statement::Statement;
use crate::table::Table;

/// Runs a prepared statement against the table, writing any result rows to
/// `out`. The caller reports success.
pub fn execute<W: Write>(statement: &Statement, table: &mut Table, out: &mut W) -> Result<()> {
    match statement {
        Statement::Insert(row) => table.insert(row),
        Statement::Select => {
            for row in table.select()? {
                writeln!(out, "{row}")?;
            }
            Ok(())
        }
    }
}
