use std::io::{BufRead, Write};

use tracing::{debug, error};

use crate::error::Result;
use crate::executor;
use crate::node::{
    COMMON_NODE_HEADER_SIZE, LEAF_NODE_CELL_SIZE, LEAF_NODE_HEADER_SIZE, LEAF_NODE_MAX_CELLS,
    LEAF_NODE_SPACE_FOR_CELLS,
};
use crate::statement::Statement;
use crate::table::Table;
use crate::ROW_SIZE;

const PROMPT: &str = "db > ";

struct InputBuffer {
    buffer: String,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            buffer: String::new(),
        }
    }

    /// Reads the next line, trimmed. Returns `false` at end of input.
    /// Bytes that are not UTF-8 become U+FFFD and are left for the parser.
    fn read_input<R: BufRead>(&mut self, input: &mut R) -> Result<bool> {
        let mut line = Vec::new();
        if input.read_until(b'\n', &mut line)? == 0 {
            return Ok(false);
        }
        self.buffer = String::from_utf8_lossy(&line).trim().to_string();
        Ok(true)
    }
}

// Non-SQL statements like .exit are called “meta-commands”.
enum MetaCommand {
    Exit,
    BTree,
    Constants,
    Unrecognized,
}

impl MetaCommand {
    fn parse(input: &str) -> Option<MetaCommand> {
        match input {
            ".exit" => Some(MetaCommand::Exit),
            ".btree" => Some(MetaCommand::BTree),
            ".constants" => Some(MetaCommand::Constants),
            _ => {
                if input.starts_with('.') {
                    Some(MetaCommand::Unrecognized)
                } else {
                    None
                }
            }
        }
    }
}

enum InputType<'a> {
    Meta(MetaCommand),
    Statement(&'a str),
}

impl<'a> InputType<'a> {
    fn parse(input: &'a str) -> InputType<'a> {
        match MetaCommand::parse(input) {
            Some(meta) => InputType::Meta(meta),
            None => InputType::Statement(input),
        }
    }
}

fn print_constants<W: Write>(out: &mut W) -> Result<()> {
    writeln!(out, "Constants:")?;
    writeln!(out, "ROW_SIZE: {ROW_SIZE}")?;
    writeln!(out, "COMMON_NODE_HEADER_SIZE: {COMMON_NODE_HEADER_SIZE}")?;
    writeln!(out, "LEAF_NODE_HEADER_SIZE: {LEAF_NODE_HEADER_SIZE}")?;
    writeln!(out, "LEAF_NODE_CELL_SIZE: {LEAF_NODE_CELL_SIZE}")?;
    writeln!(out, "LEAF_NODE_SPACE_FOR_CELLS: {LEAF_NODE_SPACE_FOR_CELLS}")?;
    writeln!(out, "LEAF_NODE_MAX_CELLS: {LEAF_NODE_MAX_CELLS}")?;
    Ok(())
}

/// Keeps what earlier statements wrote before a fatal error ends the session.
fn close_after_failure(table: Table) {
    if let Err(err) = table.close() {
        error!(%err, "could not flush the table");
    }
}

/// Drives one session: prompts, reads a line, runs it, repeats until `.exit`
/// or end of input. The table is closed on both paths.
pub fn run<R: BufRead, W: Write>(mut table: Table, mut input: R, mut output: W) -> Result<()> {
    let mut input_buffer = InputBuffer::new();

    loop {
        write!(output, "{PROMPT}")?;
        output.flush()?;
        let more = match input_buffer.read_input(&mut input) {
            Ok(more) => more,
            Err(err) => {
                close_after_failure(table);
                return Err(err);
            }
        };
        if !more {
            debug!("end of input");
            table.close()?;
            output.flush()?;
            return Ok(());
        }
        let line = input_buffer.buffer.as_str();

        match InputType::parse(line) {
            InputType::Meta(MetaCommand::Exit) => {
                table.close()?;
                writeln!(output, "Bye!")?;
                output.flush()?;
                return Ok(());
            }
            InputType::Meta(MetaCommand::BTree) => {
                writeln!(output, "Tree:")?;
                if let Err(err) = table.render_tree(&mut output) {
                    error!(%err, "could not render the tree");
                    close_after_failure(table);
                    return Err(err);
                }
            }
            InputType::Meta(MetaCommand::Constants) => print_constants(&mut output)?,
            InputType::Meta(MetaCommand::Unrecognized) => {
                writeln!(output, "Unrecognized command: {line}")?;
            }
            InputType::Statement(text) => {
                let statement = match Statement::prepare(text) {
                    Ok(statement) => statement,
                    Err(err) => {
                        writeln!(output, "{err}")?;
                        continue;
                    }
                };
                match executor::execute(&statement, &mut table, &mut output) {
                    Ok(()) => writeln!(output, "Executed.")?,
                    Err(err) if err.is_recoverable() => writeln!(output, "{err}")?,
                    Err(err) => {
                        error!(%err, "statement failed");
                        close_after_failure(table);
                        return Err(err);
                    }
                }
            }
        }
    }
}
