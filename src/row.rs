use std::fmt;

use crate::{
    COLUMN_EMAIL_SIZE, COLUMN_USERNAME_SIZE, EMAIL_OFFSET, EMAIL_SIZE, ID_OFFSET, ID_SIZE,
    ROW_SIZE, USERNAME_OFFSET, USERNAME_SIZE,
};

/// The single fixed-schema row stored by the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: u32,
    pub username: String,
    pub email: String,
}

impl Row {
    pub fn new(id: u32, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            email: email.into(),
        }
    }

    /// Writes the row into the first `ROW_SIZE` bytes of `dst`.
    ///
    /// Strings longer than their column are cut at the column size; callers
    /// validate lengths before getting here.
    pub fn serialize(&self, dst: &mut [u8]) {
        let dst = &mut dst[..ROW_SIZE];
        dst[ID_OFFSET..ID_OFFSET + ID_SIZE].copy_from_slice(&self.id.to_le_bytes());
        write_str(
            &mut dst[USERNAME_OFFSET..USERNAME_OFFSET + USERNAME_SIZE],
            &self.username,
            COLUMN_USERNAME_SIZE,
        );
        write_str(
            &mut dst[EMAIL_OFFSET..EMAIL_OFFSET + EMAIL_SIZE],
            &self.email,
            COLUMN_EMAIL_SIZE,
        );
    }

    pub fn deserialize(src: &[u8]) -> Self {
        let mut id = [0u8; ID_SIZE];
        id.copy_from_slice(&src[ID_OFFSET..ID_OFFSET + ID_SIZE]);
        Self {
            id: u32::from_le_bytes(id),
            username: read_str(&src[USERNAME_OFFSET..USERNAME_OFFSET + USERNAME_SIZE]),
            email: read_str(&src[EMAIL_OFFSET..EMAIL_OFFSET + EMAIL_SIZE]),
        }
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.id, self.username, self.email)
    }
}

fn write_str(field: &mut [u8], value: &str, max_len: usize) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(max_len);
    field[..len].copy_from_slice(&bytes[..len]);
    field[len..].fill(0);
}

fn read_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
