use thiserror::Error;

use crate::row::Row;
use crate::{COLUMN_EMAIL_SIZE, COLUMN_USERNAME_SIZE};

/// Why a line of input could not become a [`Statement`]. The messages are
/// what the REPL prints.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PrepareError {
    #[error("ID must be positive.")]
    NegativeId,
    #[error("String is too long.")]
    StringTooLong,
    #[error("Syntax error. Could not parse statement.")]
    SyntaxError,
    #[error("Unrecognized keyword at start of '{0}'.")]
    Unrecognized(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Insert(Row),
    Select,
}

impl Statement {
    pub fn prepare(input: &str) -> Result<Statement, PrepareError> {
        let mut words = input.split_whitespace();
        match words.next() {
            Some("insert") => prepare_insert(words),
            Some("select") => Ok(Statement::Select),
            _ => Err(PrepareError::Unrecognized(input.to_string())),
        }
    }
}

fn prepare_insert<'a>(mut args: impl Iterator<Item = &'a str>) -> Result<Statement, PrepareError> {
    let (Some(id), Some(username), Some(email)) = (args.next(), args.next(), args.next()) else {
        return Err(PrepareError::SyntaxError);
    };

    let id: i64 = id.parse().map_err(|_| PrepareError::SyntaxError)?;
    if id <= 0 {
        return Err(PrepareError::NegativeId);
    }
    let id = u32::try_from(id).map_err(|_| PrepareError::SyntaxError)?;

    if username.len() > COLUMN_USERNAME_SIZE || email.len() > COLUMN_EMAIL_SIZE {
        return Err(PrepareError::StringTooLong);
    }

    Ok(Statement::Insert(Row::new(id, username, email)))
}
