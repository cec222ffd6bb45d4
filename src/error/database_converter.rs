use diesel::result::{DatabaseErrorKind, Error as DieselError};

use crate::error::AppError;

/// Converts Diesel database errors into structured AppError variants.
///
/// Postgres names constraints `<table>_<column>_key` / `<table>_<column>_fkey`;
/// the parser below leans on that convention to recover entity and field names
/// from constraint violations on the scheduler tables.
pub struct DatabaseErrorConverter;

impl DatabaseErrorConverter {
    pub fn convert_diesel_error(error: DieselError, operation: &str) -> AppError {
        match error {
            DieselError::DatabaseError(kind, info) => {
                Self::convert_database_error(kind, info, operation)
            }
            DieselError::NotFound => AppError::NotFound {
                entity: "resource".to_string(),
                field: "id".to_string(),
                value: "unknown".to_string(),
            },
            other => AppError::Database {
                operation: operation.to_string(),
                source: anyhow::Error::from(other),
            },
        }
    }

    fn convert_database_error(
        kind: DatabaseErrorKind,
        info: Box<dyn diesel::result::DatabaseErrorInformation + Send + Sync>,
        operation: &str,
    ) -> AppError {
        let message = info.message().to_string();
        let constraint = info.constraint_name().map(str::to_string);
        let column = info.column_name().map(str::to_string);
        let table = info.table_name().map(str::to_string);

        match kind {
            DatabaseErrorKind::UniqueViolation => {
                if let Some((entity, field)) = constraint.as_deref().and_then(parse_constraint) {
                    AppError::Duplicate {
                        entity,
                        field,
                        value: extract_detail_value(&message).unwrap_or_else(|| "unknown".into()),
                    }
                } else {
                    AppError::Database {
                        operation: operation.to_string(),
                        source: anyhow::Error::msg(format!(
                            "Unique constraint violation: {}",
                            message
                        )),
                    }
                }
            }
            DatabaseErrorKind::NotNullViolation => AppError::Validation {
                field: column.unwrap_or_else(|| "unknown".into()),
                reason: format!(
                    "Field is required for {}",
                    table.unwrap_or_else(|| "record".into())
                ),
            },
            DatabaseErrorKind::ForeignKeyViolation => {
                if let Some((entity, field)) = constraint.as_deref().and_then(parse_constraint) {
                    AppError::Validation {
                        field,
                        reason: format!("Invalid reference into {}", entity),
                    }
                } else {
                    AppError::Database {
                        operation: operation.to_string(),
                        source: anyhow::Error::msg(format!(
                            "Foreign key constraint violation: {}",
                            message
                        )),
                    }
                }
            }
            DatabaseErrorKind::CheckViolation => AppError::Validation {
                field: constraint
                    .as_deref()
                    .and_then(parse_constraint)
                    .map(|(_, field)| field)
                    .unwrap_or_else(|| "unknown".into()),
                reason: "Value is outside the permitted range".to_string(),
            },
            _ => AppError::Database {
                operation: operation.to_string(),
                source: anyhow::Error::msg(format!("Database error: {}", message)),
            },
        }
    }
}

/// Split `scheduled_report_schedules_name_key` into (entity, field).
///
/// Walks known table names first so multi-word table prefixes do not get
/// mistaken for the column part.
fn parse_constraint(constraint: &str) -> Option<(String, String)> {
    const TABLES: &[&str] = &["scheduled_report_schedules", "scheduled_report_runs"];

    let trimmed = constraint
        .strip_suffix("_key")
        .or_else(|| constraint.strip_suffix("_fkey"))
        .or_else(|| constraint.strip_suffix("_check"))?;

    for table in TABLES {
        if let Some(rest) = trimmed.strip_prefix(*table) {
            let field = rest.strip_prefix('_')?;
            if !field.is_empty() {
                return Some((table.to_string(), field.to_string()));
            }
        }
    }
    None
}

/// Pull the value out of Postgres' `DETAIL: Key (col)=(value) ...` message.
fn extract_detail_value(message: &str) -> Option<String> {
    let start = message.find(")=(")? + 3;
    let end = message[start..].find(')')? + start;
    Some(message[start..end].to_string())
}
