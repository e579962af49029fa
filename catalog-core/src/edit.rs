//! Pending column edits and their flush as DDL.
//!
//! A [`CommandContext`] records edits against the columns of one database.
//! Nothing reaches the server until [`CommandContext::flush`], which
//! synthesizes every pending command first and then executes them in the
//! order they were recorded, one batch per command.

use std::collections::HashSet;
use std::sync::Arc;

use common::errors::{AppError, AppResult};
use common::utils::validate_identifier;
use tokio::sync::Mutex;

use crate::cache::CacheOwner;
use crate::ddl::{self, ColumnChange, PersistAction, TableRef};
use crate::model::{
    ColumnDefinition, DataKind, Database, Table, TableColumn, TypeRegistry, VARCHAR_OID,
};
use crate::progress::ProgressMonitor;

const NEW_COLUMN_NAME: &str = "NewColumn";
const DEFAULT_COLUMN_LENGTH: i64 = 100;

/// Identity of an edited column: the name it had when first edited.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnKey {
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl ColumnKey {
    pub fn new(schema: impl Into<String>, table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            column: column.into(),
        }
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.schema, &self.table)
    }
}

impl std::fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.schema, self.table, self.column)
    }
}

/// Lifecycle of an edited column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditState {
    Unmodified,
    Pending,
    Flushing,
    Committed,
    /// Reported for the failing column of a flush; the column itself is
    /// back to `Pending` with its changes intact.
    Failed,
}

#[derive(Debug, Clone)]
enum Structural {
    Create(ColumnDefinition),
    Modify(ColumnDefinition),
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Structural,
    Rename,
}

/// A command and its place in the recording order. Editing a command
/// again keeps its place.
#[derive(Debug, Clone)]
struct Recorded<T> {
    seq: u64,
    change: T,
}

#[derive(Debug)]
struct EditRecord {
    key: ColumnKey,
    /// Current name on the server; differs from `key.column` once a rename
    /// of this record has been applied.
    server_name: String,
    structural: Option<Recorded<Structural>>,
    rename: Option<Recorded<String>>,
    state: EditState,
}

impl EditRecord {
    fn new(key: ColumnKey) -> Self {
        Self {
            server_name: key.column.clone(),
            key,
            structural: None,
            rename: None,
            state: EditState::Pending,
        }
    }

    fn is_empty(&self) -> bool {
        self.structural.is_none() && self.rename.is_none()
    }

    /// Name the column has once everything recorded here is applied.
    fn final_name(&self) -> &str {
        match (&self.structural, &self.rename) {
            (Some(Recorded { change: Structural::Create(definition), .. }), _) => &definition.name,
            (_, Some(rename)) => &rename.change,
            _ => &self.server_name,
        }
    }

    /// Commands with their sequence numbers. A structural change recorded
    /// after the rename addresses the column by its new name.
    fn commands(&self) -> Vec<(u64, Part, ColumnChange)> {
        let mut commands = Vec::with_capacity(2);
        if let Some(structural) = &self.structural {
            let name = match &self.rename {
                Some(rename) if rename.seq < structural.seq => rename.change.clone(),
                _ => self.server_name.clone(),
            };
            let change = match &structural.change {
                Structural::Create(definition) => ColumnChange::Create(definition.clone()),
                Structural::Modify(definition) => ColumnChange::Modify(ColumnDefinition {
                    name,
                    ..definition.clone()
                }),
                Structural::Drop => ColumnChange::Drop { name },
            };
            commands.push((structural.seq, Part::Structural, change));
        }
        if let Some(rename) = &self.rename {
            commands.push((
                rename.seq,
                Part::Rename,
                ColumnChange::Rename {
                    old_name: self.server_name.clone(),
                    new_name: rename.change.clone(),
                },
            ));
        }
        commands
    }

    fn ensure_editable(&self) -> AppResult<()> {
        if self.state == EditState::Flushing {
            return Err(AppError::Validation(format!("column {} is being flushed", self.key)));
        }
        Ok(())
    }
}

/// Records awaiting a flush plus the keys settled by earlier flushes.
#[derive(Debug, Default)]
struct EditLog {
    records: Vec<EditRecord>,
    committed: HashSet<ColumnKey>,
    next_seq: u64,
}

impl EditLog {
    fn position(&self, key: &ColumnKey) -> Option<usize> {
        self.records.iter().position(|r| &r.key == key)
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Starts a new record; a key reused after a commit starts over.
    fn push(&mut self, record: EditRecord) -> usize {
        self.committed.remove(&record.key);
        self.records.push(record);
        self.records.len() - 1
    }

    fn discard_if_empty(&mut self, index: usize) {
        if self.records[index].is_empty() {
            self.records.remove(index);
        }
    }

    /// Names a new or renamed column of `schema.table` cannot take: the
    /// cached columns plus the names pending edits will leave behind.
    fn taken_names(
        &self,
        columns: &[Arc<TableColumn>],
        schema: &str,
        table: &str,
        except: Option<&ColumnKey>,
    ) -> HashSet<String> {
        let mut taken: HashSet<String> = columns.iter().map(|c| c.name().to_string()).collect();
        taken.extend(
            self.records
                .iter()
                .filter(|r| r.key.schema == schema && r.key.table == table && Some(&r.key) != except)
                .map(|r| r.final_name().to_string()),
        );
        taken
    }
}

/// One synthesized command, executed as a unit.
struct Batch {
    key: ColumnKey,
    part: Part,
    actions: Vec<PersistAction>,
}

/// Outcome of [`CommandContext::flush`].
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Statements that ran successfully, in order, including those of a
    /// failed batch that ran before its failing statement.
    pub executed: Vec<PersistAction>,
    /// Columns whose every pending command was applied.
    pub committed: Vec<ColumnKey>,
    /// Column whose batch failed; it stays pending.
    pub failed: Option<ColumnKey>,
    pub failure: Option<AppError>,
}

impl FlushReport {
    /// Outcome for `key`: `Committed`, `Failed`, or `Pending` if its turn
    /// never came.
    pub fn outcome(&self, key: &ColumnKey) -> EditState {
        if self.failed.as_ref() == Some(key) {
            EditState::Failed
        } else if self.committed.contains(key) {
            EditState::Committed
        } else {
            EditState::Pending
        }
    }

    /// Executed statements, or the failure.
    pub fn into_result(self) -> AppResult<Vec<PersistAction>> {
        match self.failure {
            Some(error) => Err(error),
            None => Ok(self.executed),
        }
    }
}

/// Pending edits against the columns of one database.
pub struct CommandContext {
    database: Arc<Database>,
    log: Mutex<EditLog>,
}

impl CommandContext {
    pub fn new(database: Arc<Database>) -> Self {
        Self {
            database,
            log: Mutex::new(EditLog::default()),
        }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// Adds a column to `schema.table`.
    ///
    /// The column starts as `varchar(100)` named `NewColumn`, `NewColumn2`, ...
    /// and `init` may change any of it.
    pub async fn create_column<F>(
        &self,
        schema: &str,
        table: &str,
        monitor: &dyn ProgressMonitor,
        init: F,
    ) -> AppResult<ColumnKey>
    where
        F: FnOnce(&mut ColumnDefinition) + Send,
    {
        let table_object = self.table(schema, table, monitor).await?;
        let columns = table_object.columns(monitor).await?;
        let registry = self.database.type_registry(monitor).await?;

        let mut log = self.log.lock().await;
        let taken = log.taken_names(&columns, schema, table, None);

        let (type_oid, max_length) = match registry.find_by_name("varchar") {
            Some(varchar) if varchar.kind == DataKind::String => (varchar.oid, DEFAULT_COLUMN_LENGTH),
            Some(other) => (other.oid, 0),
            None => (VARCHAR_OID, DEFAULT_COLUMN_LENGTH),
        };
        let last_position = columns
            .iter()
            .map(|c| c.definition().ordinal_position)
            .max()
            .unwrap_or_default();
        let mut definition = ColumnDefinition {
            name: new_column_name(&taken),
            type_oid,
            max_length,
            ordinal_position: last_position + 1,
            ..Default::default()
        };
        init(&mut definition);
        validate_identifier(&definition.name)?;

        let key = ColumnKey::new(schema, table, definition.name.clone());
        if taken.contains(&definition.name) || log.position(&key).is_some() {
            return Err(AppError::Validation(format!(
                "column {} already exists in {}.{}",
                definition.name, schema, table
            )));
        }

        let seq = log.next_seq();
        let mut record = EditRecord::new(key.clone());
        record.structural = Some(Recorded {
            seq,
            change: Structural::Create(definition),
        });
        log.push(record);
        tracing::debug!(parent: self.span(), column = %key, "Column create recorded");
        Ok(key)
    }

    /// Changes type, nullability or default of a column. The name cannot be
    /// changed here; use [`rename_column`](Self::rename_column).
    pub async fn modify_column<F>(
        &self,
        key: &ColumnKey,
        monitor: &dyn ProgressMonitor,
        edit: F,
    ) -> AppResult<()>
    where
        F: FnOnce(&mut ColumnDefinition) + Send,
    {
        let mut log = self.log.lock().await;
        let existing = log.position(key);

        let mut server_name = key.column.clone();
        let mut recorded = None;
        if let Some(index) = existing {
            let record = &log.records[index];
            record.ensure_editable()?;
            server_name = record.server_name.clone();
            recorded = record.structural.clone();
        }
        let (mut definition, seq, is_create) = match recorded {
            Some(Recorded { seq, change: Structural::Create(definition) }) => (definition, Some(seq), true),
            Some(Recorded { seq, change: Structural::Modify(definition) }) => (definition, Some(seq), false),
            Some(Recorded { change: Structural::Drop, .. }) => {
                return Err(AppError::Validation(format!("column {} is marked for drop", key)));
            }
            None => {
                let definition = self
                    .current_definition(&key.schema, &key.table, &server_name, monitor)
                    .await?;
                (definition, None, false)
            }
        };

        let original_name = definition.name.clone();
        edit(&mut definition);
        if definition.name != original_name {
            return Err(AppError::Validation(format!(
                "column {} cannot be renamed by a modification",
                key
            )));
        }

        let seq = match seq {
            Some(seq) => seq,
            None => log.next_seq(),
        };
        let index = match existing {
            Some(index) => index,
            None => log.push(EditRecord::new(key.clone())),
        };
        let record = &mut log.records[index];
        record.structural = Some(Recorded {
            seq,
            change: if is_create {
                Structural::Create(definition)
            } else {
                Structural::Modify(definition)
            },
        });
        record.state = EditState::Pending;
        tracing::debug!(parent: self.span(), column = %key, "Column modification recorded");
        Ok(())
    }

    /// Renames a column. Renaming back to the current name cancels the
    /// rename.
    pub async fn rename_column(
        &self,
        key: &ColumnKey,
        new_name: &str,
        monitor: &dyn ProgressMonitor,
    ) -> AppResult<()> {
        validate_identifier(new_name)?;
        let table_object = self.table(&key.schema, &key.table, monitor).await?;
        let columns = table_object.columns(monitor).await?;

        let mut log = self.log.lock().await;
        let existing = log.position(key);
        match existing {
            Some(index) => log.records[index].ensure_editable()?,
            None => {
                table_object.column(&key.column, monitor).await?;
                if new_name == key.column {
                    return Ok(());
                }
            }
        }

        let taken = log.taken_names(&columns, &key.schema, &key.table, Some(key));
        let (current_name, is_create) = match existing.map(|index| &log.records[index]) {
            Some(EditRecord {
                structural: Some(Recorded { change: Structural::Drop, .. }),
                ..
            }) => {
                return Err(AppError::Validation(format!("column {} is marked for drop", key)));
            }
            Some(EditRecord {
                structural: Some(Recorded { change: Structural::Create(definition), .. }),
                ..
            }) => (definition.name.clone(), true),
            Some(record) => (record.server_name.clone(), false),
            None => (key.column.clone(), false),
        };
        if new_name != current_name && taken.contains(new_name) {
            return Err(AppError::Validation(format!(
                "column {} already exists in {}.{}",
                new_name, key.schema, key.table
            )));
        }

        let seq = log.next_seq();
        let index = match existing {
            Some(index) => index,
            None => log.push(EditRecord::new(key.clone())),
        };
        let record = &mut log.records[index];
        if is_create {
            if let Some(Recorded { change: Structural::Create(definition), .. }) = &mut record.structural {
                definition.name = new_name.to_string();
            }
        } else if new_name == current_name {
            record.rename = None;
        } else {
            let seq = record.rename.as_ref().map_or(seq, |rename| rename.seq);
            record.rename = Some(Recorded {
                seq,
                change: new_name.to_string(),
            });
        }
        record.state = EditState::Pending;
        log.discard_if_empty(index);
        tracing::debug!(parent: self.span(), column = %key, new_name, "Column rename recorded");
        Ok(())
    }

    /// Drops a column. Dropping a column that was only created in this
    /// context forgets it instead.
    pub async fn drop_column(&self, key: &ColumnKey, monitor: &dyn ProgressMonitor) -> AppResult<()> {
        let mut log = self.log.lock().await;
        if let Some(index) = log.position(key) {
            log.records[index].ensure_editable()?;
            let (is_create, seq) = match &log.records[index].structural {
                Some(structural) => (matches!(structural.change, Structural::Create(_)), Some(structural.seq)),
                None => (false, None),
            };
            if is_create {
                log.records.remove(index);
                return Ok(());
            }
            let seq = match seq {
                Some(seq) => seq,
                None => log.next_seq(),
            };
            let record = &mut log.records[index];
            record.structural = Some(Recorded {
                seq,
                change: Structural::Drop,
            });
            record.rename = None;
            record.state = EditState::Pending;
        } else {
            self.current_definition(&key.schema, &key.table, &key.column, monitor)
                .await?;
            let seq = log.next_seq();
            let mut record = EditRecord::new(key.clone());
            record.structural = Some(Recorded {
                seq,
                change: Structural::Drop,
            });
            log.push(record);
        }
        tracing::debug!(parent: self.span(), column = %key, "Column drop recorded");
        Ok(())
    }

    pub async fn state(&self, key: &ColumnKey) -> EditState {
        let log = self.log.lock().await;
        match log.position(key) {
            Some(index) => log.records[index].state,
            None if log.committed.contains(key) => EditState::Committed,
            None => EditState::Unmodified,
        }
    }

    /// True if anything waits to be flushed.
    pub async fn is_dirty(&self) -> bool {
        self.log.lock().await.records.iter().any(|r| r.state == EditState::Pending)
    }

    /// Statements a flush would execute now, without executing them.
    pub async fn preview(&self, monitor: &dyn ProgressMonitor) -> AppResult<Vec<PersistAction>> {
        let registry = self.database.type_registry(monitor).await?;
        let log = self.log.lock().await;
        let batches = synthesize_pending(&log.records, &registry)?;
        Ok(batches.into_iter().flat_map(|b| b.actions).collect())
    }

    /// Synthesizes and executes every pending command.
    ///
    /// # Errors
    /// Synthesis and type-registry errors are returned before anything is
    /// executed. Execution failures do not error; they are carried in the
    /// report, and batches that ran before the failure stay applied.
    pub async fn flush(&self, monitor: &dyn ProgressMonitor) -> AppResult<FlushReport> {
        let registry = self.database.type_registry(monitor).await?;
        let batches = {
            let mut log = self.log.lock().await;
            let batches = synthesize_pending(&log.records, &registry)?;
            for record in log.records.iter_mut().filter(|r| r.state == EditState::Pending) {
                record.state = EditState::Flushing;
            }
            batches
        };
        let mut report = FlushReport::default();
        if batches.is_empty() {
            return Ok(report);
        }

        let executor = match self.database.ddl_executor().await {
            Ok(executor) => executor,
            Err(e) => {
                self.finish_flush(None).await;
                return Err(e);
            }
        };

        let mut touched: Vec<TableRef> = Vec::new();
        for batch in batches {
            let outcome = if monitor.is_cancelled() {
                Err(AppError::Cancelled)
            } else {
                executor.execute_actions(&batch.actions, monitor).await
            };
            let mut log = self.log.lock().await;
            let Some(index) = log.position(&batch.key) else {
                continue;
            };
            let applied = match &outcome {
                Ok(()) => batch.actions.len(),
                Err(AppError::Execution { index: failed_at, .. }) => (*failed_at).min(batch.actions.len()),
                Err(_) => 0,
            };
            if applied > 0 {
                let table = batch.key.table_ref();
                if !touched.contains(&table) {
                    touched.push(table);
                }
            }
            report.executed.extend(batch.actions.iter().take(applied).cloned());

            match outcome {
                Ok(()) => {
                    let record = &mut log.records[index];
                    match batch.part {
                        Part::Structural => record.structural = None,
                        Part::Rename => {
                            if let Some(rename) = record.rename.take() {
                                record.server_name = rename.change;
                            }
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(parent: self.span(), column = %batch.key, error = %error, "Flush failed");
                    log.records[index].state = EditState::Pending;
                    report.failed = Some(batch.key);
                    report.failure = Some(error);
                    break;
                }
            }
        }

        report.committed = self.finish_flush(report.failed.as_ref()).await;
        for table in touched {
            match self.database.find_table(&table.schema, &table.name, monitor).await {
                Ok(Some(table)) => table.invalidate_columns().await,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(parent: self.span(), table = %table, error = %e, "Column cache not invalidated")
                }
            }
        }
        tracing::info!(
            parent: self.span(),
            executed = report.executed.len(),
            failed = report.failed.is_some(),
            "Flush finished"
        );
        Ok(report)
    }

    /// Settles records left in `Flushing`: emptied ones are committed and
    /// leave the log, the rest go back to `Pending`. Returns the committed
    /// keys.
    async fn finish_flush(&self, failed: Option<&ColumnKey>) -> Vec<ColumnKey> {
        let mut log = self.log.lock().await;
        let EditLog {
            records,
            committed: settled,
            ..
        } = &mut *log;
        let mut committed = Vec::new();
        records.retain_mut(|record| {
            if record.state != EditState::Flushing {
                return true;
            }
            if record.is_empty() && failed != Some(&record.key) {
                settled.insert(record.key.clone());
                committed.push(record.key.clone());
                false
            } else {
                record.state = EditState::Pending;
                true
            }
        });
        committed
    }

    async fn table(&self, schema: &str, table: &str, monitor: &dyn ProgressMonitor) -> AppResult<Arc<Table>> {
        self.database
            .find_table(schema, table, monitor)
            .await?
            .ok_or_else(|| AppError::not_found(format!("database {}", self.database.name()), format!("{}.{}", schema, table)))
    }

    async fn current_definition(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        monitor: &dyn ProgressMonitor,
    ) -> AppResult<ColumnDefinition> {
        let table = self.table(schema, table, monitor).await?;
        Ok(table.column(column, monitor).await?.definition().clone())
    }

    fn span(&self) -> &tracing::Span {
        self.database.span()
    }
}

/// Every pending command, synthesized in recording order.
fn synthesize_pending(records: &[EditRecord], registry: &TypeRegistry) -> AppResult<Vec<Batch>> {
    let mut commands: Vec<(u64, &EditRecord, Part, ColumnChange)> = records
        .iter()
        .filter(|r| r.state == EditState::Pending)
        .flat_map(|record| {
            record
                .commands()
                .into_iter()
                .map(move |(seq, part, change)| (seq, record, part, change))
        })
        .collect();
    commands.sort_by_key(|(seq, ..)| *seq);

    let mut batches = Vec::with_capacity(commands.len());
    for (_, record, part, change) in commands {
        batches.push(Batch {
            key: record.key.clone(),
            part,
            actions: ddl::synthesize(&record.key.table_ref(), &change, registry)?,
        });
    }
    Ok(batches)
}

/// First of `NewColumn`, `NewColumn2`, ... not in `taken`.
fn new_column_name(taken: &HashSet<String>) -> String {
    if !taken.contains(NEW_COLUMN_NAME) {
        return NEW_COLUMN_NAME.to_string();
    }
    (2..)
        .map(|n| format!("{}{}", NEW_COLUMN_NAME, n))
        .find(|name| !taken.contains(name))
        .unwrap_or_else(|| NEW_COLUMN_NAME.to_string())
}
