//! Ensure Engine (C11): create-or-evolve tables from their declared schema,
//! preflight-checked constraint addition, and the small set of DDL helpers
//! the migration controller's listeners lean on (§4.10).

use lattice_core::dialect::{Dialect, DialectKind};
use lattice_core::driver::Driver;
use lattice_core::error::{LatticeError, Result};
use lattice_core::schema::{OnDelete, TableInfo};
use lattice_core::value::DbValue;

/// What `ensure_table` actually did, for callers that want to log or
/// report progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyCurrent,
    Altered { added_columns: Vec<String> },
}

fn on_delete_sql(on_delete: OnDelete) -> &'static str {
    match on_delete {
        OnDelete::Cascade => "CASCADE",
        OnDelete::Restrict => "RESTRICT",
        OnDelete::SetNull => "SET NULL",
        OnDelete::NoAction => "NO ACTION",
    }
}

fn quote_list(dialect: &dyn Dialect, names: &[&str]) -> String {
    names
        .iter()
        .map(|n| dialect.quote_identifier(n))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Creates `table` if it doesn't exist yet, else adds any columns declared
/// on the schema but missing live, then re-ensures its active view if it
/// declares a soft-delete field. Never touches constraints — drift there is
/// surfaced as [`LatticeError::SchemaDrift`] pointing at
/// [`ensure_constraints`].
pub async fn ensure_table(driver: &dyn Driver, table: &'static dyn TableInfo) -> Result<EnsureOutcome> {
    table.validate_role_names()?;

    let outcome = if !driver.table_exists(table.name()).await? {
        tracing::info!(table = table.name(), "creating table");
        create_table(driver, table).await?;
        EnsureOutcome::Created
    } else {
        let added = add_missing_columns(driver, table).await?;
        if !added.is_empty() {
            tracing::info!(table = table.name(), ?added, "added missing columns");
        }
        if added.is_empty() {
            EnsureOutcome::AlreadyCurrent
        } else {
            EnsureOutcome::Altered { added_columns: added }
        }
    };

    let drift = check_constraint_drift(driver, table).await;

    if let Some(soft_delete_field) = table.soft_delete_field() {
        ensure_active_view(driver, table, soft_delete_field).await?;
    }

    drift?;
    Ok(outcome)
}

async fn create_table(driver: &dyn Driver, table: &'static dyn TableInfo) -> Result<()> {
    let dialect = driver.dialect();
    let mut columns = Vec::new();

    for field in table.fields() {
        let mut column = format!(
            "{} {}",
            dialect.quote_identifier(field.name()),
            dialect.column_type_sql(field.declared_type())
        );
        if Some(field.name()) == table.primary_key() {
            column.push_str(" PRIMARY KEY");
            if field.auto_increment() && dialect.kind() == DialectKind::Postgres {
                // Postgres has no AUTO_INCREMENT keyword; callers declare the
                // primary key field as a serial/identity type themselves.
            } else if field.auto_increment() {
                column.push_str(match dialect.kind() {
                    DialectKind::Sqlite => " AUTOINCREMENT",
                    DialectKind::Mysql => " AUTO_INCREMENT",
                    DialectKind::Postgres => "",
                });
            }
        } else if !field.nullable() {
            column.push_str(" NOT NULL");
        }
        if field.unique() {
            column.push_str(" UNIQUE");
        }
        columns.push(column);
    }

    for constraint in table.unique_constraints() {
        columns.push(format!("UNIQUE ({})", quote_list(dialect, constraint)));
    }

    for reference in table.references() {
        columns.push(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
            quote_list(dialect, reference.source_fields()),
            dialect.quote_identifier(reference.target_table().name()),
            quote_list(dialect, reference.target_fields()),
            on_delete_sql(reference.on_delete())
        ));
    }

    let if_not_exists = if dialect.supports_if_not_exists() {
        "IF NOT EXISTS "
    } else {
        ""
    };
    let sql = format!(
        "CREATE TABLE {if_not_exists}{} ({})",
        dialect.quote_identifier(table.name()),
        columns.join(", ")
    );

    driver.run(&sql, &[]).await.map_err(|e| LatticeError::Ensure {
        operation: "create_table",
        table: table.name().to_string(),
        step: 1,
        message: e.to_string(),
    })?;

    for index in table.indexed() {
        create_index(driver, table, &[index]).await?;
    }

    Ok(())
}

async fn add_missing_columns(driver: &dyn Driver, table: &'static dyn TableInfo) -> Result<Vec<String>> {
    let live = driver.list_columns(table.name()).await?;
    let dialect = driver.dialect();
    let mut added = Vec::new();

    for field in table.fields() {
        if live.iter().any(|c| c == field.name()) {
            continue;
        }
        let nullability = if field.nullable() { "" } else { " NOT NULL" };
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}{}",
            dialect.quote_identifier(table.name()),
            dialect.quote_identifier(field.name()),
            dialect.column_type_sql(field.declared_type()),
            nullability
        );
        driver.run(&sql, &[]).await.map_err(|e| LatticeError::Ensure {
            operation: "add_column",
            table: table.name().to_string(),
            step: 2,
            message: e.to_string(),
        })?;
        added.push(field.name().to_string());
    }

    Ok(added)
}

async fn create_index(driver: &dyn Driver, table: &'static dyn TableInfo, columns: &[&str]) -> Result<()> {
    let dialect = driver.dialect();
    let if_not_exists = if dialect.supports_if_not_exists() {
        "IF NOT EXISTS "
    } else {
        ""
    };
    let index_name = format!("idx_{}_{}", table.name(), columns.join("_"));
    let sql = format!(
        "CREATE INDEX {if_not_exists}{} ON {} ({})",
        dialect.quote_identifier(&index_name),
        dialect.quote_identifier(table.name()),
        quote_list(dialect, columns)
    );
    driver.run(&sql, &[]).await.map_err(|e| LatticeError::Ensure {
        operation: "create_index",
        table: table.name().to_string(),
        step: 2,
        message: e.to_string(),
    })?;
    Ok(())
}

/// Compares declared unique constraints and foreign keys against what the
/// driver reports live, raising [`LatticeError::SchemaDrift`] if anything
/// declared is missing. Does not attempt to fix anything — that is
/// [`ensure_constraints`]'s job, applied explicitly.
async fn check_constraint_drift(driver: &dyn Driver, table: &'static dyn TableInfo) -> Result<()> {
    let live_unique = driver.list_unique_constraints(table.name()).await?;
    for declared in table.unique_constraints() {
        let declared_sorted = sorted_owned(declared);
        let present = live_unique.iter().any(|live| sorted_owned_ref(live) == declared_sorted);
        if !present {
            return Err(LatticeError::SchemaDrift {
                table: table.name().to_string(),
                description: format!("missing unique constraint on ({})", declared.join(", ")),
            });
        }
    }

    let live_fks = driver.list_foreign_keys(table.name()).await?;
    for reference in table.references() {
        let declared_sorted = sorted_owned(reference.source_fields());
        let present = live_fks.iter().any(|(columns, target)| {
            sorted_owned_ref(columns) == declared_sorted && target == reference.target_table().name()
        });
        if !present {
            return Err(LatticeError::SchemaDrift {
                table: table.name().to_string(),
                description: format!(
                    "missing foreign key on ({}) -> {}",
                    reference.source_fields().join(", "),
                    reference.target_table().name()
                ),
            });
        }
    }

    Ok(())
}

fn sorted_owned(names: &[&str]) -> Vec<String> {
    let mut v: Vec<String> = names.iter().map(|s| s.to_string()).collect();
    v.sort();
    v
}

fn sorted_owned_ref(names: &[String]) -> Vec<String> {
    let mut v = names.to_vec();
    v.sort();
    v
}

/// Applies every declared unique constraint/foreign key missing live,
/// preflighting each against existing data so a would-be violation is
/// reported rather than letting the database reject the DDL (§4.10).
pub async fn ensure_constraints(driver: &dyn Driver, table: &'static dyn TableInfo) -> Result<()> {
    let live_unique = driver.list_unique_constraints(table.name()).await?;
    for declared in table.unique_constraints() {
        let declared_sorted = sorted_owned(declared);
        if live_unique.iter().any(|live| sorted_owned_ref(live) == declared_sorted) {
            continue;
        }
        add_unique_constraint(driver, table, declared).await?;
    }

    let live_fks = driver.list_foreign_keys(table.name()).await?;
    for reference in table.references() {
        let declared_sorted = sorted_owned(reference.source_fields());
        if live_fks
            .iter()
            .any(|(columns, target)| sorted_owned_ref(columns) == declared_sorted && target == reference.target_table().name())
        {
            continue;
        }
        add_foreign_key(driver, table, *reference).await?;
    }

    Ok(())
}

async fn add_unique_constraint(driver: &dyn Driver, table: &'static dyn TableInfo, columns: &[&str]) -> Result<()> {
    let dialect = driver.dialect();
    let constraint_name = format!("uq_{}_{}", table.name(), columns.join("_"));
    let probe = format!(
        "SELECT COUNT(*) FROM (SELECT 1 FROM {} GROUP BY {} HAVING COUNT(*) > 1) lattice_dupes",
        dialect.quote_identifier(table.name()),
        quote_list(dialect, columns)
    );
    let violations = match driver.val(&probe, &[]).await? {
        Some(DbValue::Int(n)) => n as u64,
        _ => 0,
    };
    if violations > 0 {
        return Err(LatticeError::ConstraintPreflight {
            table: table.name().to_string(),
            constraint: constraint_name,
            violation_count: violations,
            query: probe,
        });
    }

    let sql = format!(
        "CREATE UNIQUE INDEX {} ON {} ({})",
        dialect.quote_identifier(&constraint_name),
        dialect.quote_identifier(table.name()),
        quote_list(dialect, columns)
    );
    driver.run(&sql, &[]).await.map_err(|e| LatticeError::Ensure {
        operation: "add_unique_constraint",
        table: table.name().to_string(),
        step: 3,
        message: e.to_string(),
    })?;
    Ok(())
}

async fn add_foreign_key(
    driver: &dyn Driver,
    table: &'static dyn TableInfo,
    reference: &dyn lattice_core::schema::ReferenceInfo,
) -> Result<()> {
    let dialect = driver.dialect();
    if !dialect.supports_online_foreign_key_add() {
        return Err(LatticeError::configuration(
            table.name(),
            format!(
                "dialect `{}` cannot add a foreign key to an existing table; recreate the table in a migration instead",
                dialect.kind()
            ),
        ));
    }

    let constraint_name = format!(
        "fk_{}_{}",
        table.name(),
        reference.source_fields().join("_")
    );
    let probe = format!(
        "SELECT COUNT(*) FROM {} t LEFT JOIN {} r ON {} WHERE {} AND ({})",
        dialect.quote_identifier(table.name()),
        dialect.quote_identifier(reference.target_table().name()),
        join_condition(dialect, reference),
        reference
            .source_fields()
            .iter()
            .map(|f| format!("t.{} IS NOT NULL", dialect.quote_identifier(f)))
            .collect::<Vec<_>>()
            .join(" OR "),
        reference
            .target_fields()
            .iter()
            .map(|f| format!("r.{} IS NULL", dialect.quote_identifier(f)))
            .collect::<Vec<_>>()
            .join(" AND ")
    );
    let violations = match driver.val(&probe, &[]).await? {
        Some(DbValue::Int(n)) => n as u64,
        _ => 0,
    };
    if violations > 0 {
        return Err(LatticeError::ConstraintPreflight {
            table: table.name().to_string(),
            constraint: constraint_name,
            violation_count: violations,
            query: probe,
        });
    }

    let sql = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
        dialect.quote_identifier(table.name()),
        dialect.quote_identifier(&constraint_name),
        quote_list(dialect, reference.source_fields()),
        dialect.quote_identifier(reference.target_table().name()),
        quote_list(dialect, reference.target_fields()),
        on_delete_sql(reference.on_delete())
    );
    driver.run(&sql, &[]).await.map_err(|e| LatticeError::Ensure {
        operation: "add_foreign_key",
        table: table.name().to_string(),
        step: 3,
        message: e.to_string(),
    })?;
    Ok(())
}

fn join_condition(dialect: &dyn Dialect, reference: &dyn lattice_core::schema::ReferenceInfo) -> String {
    reference
        .source_fields()
        .iter()
        .zip(reference.target_fields())
        .map(|(src, tgt)| {
            format!(
                "t.{} = r.{}",
                dialect.quote_identifier(src),
                dialect.quote_identifier(tgt)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Creates or replaces the implicit `{table}_active` view excluding
/// soft-deleted rows, re-run idempotently every time `ensure_table` runs.
async fn ensure_active_view(driver: &dyn Driver, table: &'static dyn TableInfo, soft_delete_field: &str) -> Result<()> {
    let dialect = driver.dialect();
    let view_name = format!("{}_active", table.name());
    let select = format!(
        "SELECT * FROM {} WHERE {} IS NULL",
        dialect.quote_identifier(table.name()),
        dialect.quote_identifier(soft_delete_field)
    );

    if dialect.kind() == DialectKind::Sqlite {
        driver
            .run(&format!("DROP VIEW IF EXISTS {}", dialect.quote_identifier(&view_name)), &[])
            .await
            .map_err(|e| LatticeError::Ensure {
                operation: "ensure_view",
                table: table.name().to_string(),
                step: 4,
                message: e.to_string(),
            })?;
        driver
            .run(
                &format!("CREATE VIEW {} AS {}", dialect.quote_identifier(&view_name), select),
                &[],
            )
            .await
            .map_err(|e| LatticeError::Ensure {
                operation: "ensure_view",
                table: table.name().to_string(),
                step: 4,
                message: e.to_string(),
            })?;
    } else {
        driver
            .run(
                &format!(
                    "CREATE OR REPLACE VIEW {} AS {}",
                    dialect.quote_identifier(&view_name),
                    select
                ),
                &[],
            )
            .await
            .map_err(|e| LatticeError::Ensure {
                operation: "ensure_view",
                table: table.name().to_string(),
                step: 4,
                message: e.to_string(),
            })?;
    }

    Ok(())
}

/// Backfills `to` from `from` wherever `to` is still unset, for moving data
/// onto a newly-added column. Idempotent: re-running only ever touches rows
/// still `NULL` (§4.10 testable property #10).
pub async fn copy_column(driver: &dyn Driver, table: &'static dyn TableInfo, from: &str, to: &str) -> Result<u64> {
    if table.field(to).is_none() {
        return Err(LatticeError::configuration(
            table.name(),
            format!("`{to}` is not a declared field of this table"),
        ));
    }
    let live_columns = driver.list_columns(table.name()).await?;
    if !live_columns.iter().any(|c| c == from) {
        return Err(LatticeError::configuration(
            table.name(),
            format!("`{from}` does not exist on the live table"),
        ));
    }

    let dialect = driver.dialect();
    let sql = format!(
        "UPDATE {} SET {} = {} WHERE {} IS NULL",
        dialect.quote_identifier(table.name()),
        dialect.quote_identifier(to),
        dialect.quote_identifier(from),
        dialect.quote_identifier(to)
    );
    driver.run(&sql, &[]).await
}
