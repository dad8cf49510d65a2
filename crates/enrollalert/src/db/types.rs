/// Row types and SQL conversions for the enrollment store
use crate::types::{AlertRule, Term};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;

/// An alert joined with its owner's address and the section's current seats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertCandidate {
    pub rule: AlertRule,
    pub email: Option<String>,
    pub course_name: String,
    pub open_seats: i64,
}

impl ToSql for Term {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(i64::from(self.code())))
    }
}

impl FromSql for Term {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let code = i64::column_result(value)?;
        let code = u32::try_from(code).map_err(|_| FromSqlError::OutOfRange(code))?;
        Term::try_from(code).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}
