//! Statements shared by the relational backends.
//!
//! [`SqlStatements`] emits DDL and DML for one model through a
//! [`SqlDialect`]; the drivers only bind parameters and read rows back
//! through [`OutputColumn`] descriptors.
//!
//! DDL follows fixed templates:
//!
//! ```text
//! CREATE TABLE "users" ("id" INTEGER NOT NULL, "name" TEXT NULL, PRIMARY KEY ("id"))
//! ALTER TABLE "users" ADD COLUMN "age" DOUBLE NULL
//! CREATE UNIQUE INDEX "users_age" ON "users" ("age" ASC)
//! ALTER TABLE "posts" ADD FOREIGN KEY ("user_id") REFERENCES "users"("id") ON DELETE CASCADE
//! ```

use serde_json::Value;

use crate::compiler::sql::{SqlCompiler, SqlDialect, SqlFragment, SqlParam, from_param, to_param};
use crate::condition::{Aggregate, Condition, Query, UpdateOp, UpdateSpec};
use crate::core::ValueCodec;
use crate::error::{QueryError, ResourceError, StorageError, StorageResult};
use crate::schema::{IndexDescriptor, IntegrityAction, ModelSchema};
use crate::types::record::{get_path, record_id, set_path};
use crate::types::{Property, Record};

/// How to turn one selected column back into a record field.
#[derive(Debug, Clone)]
pub enum OutputColumn {
    /// A declared column, written to the record under its logical name.
    Property(Property),
    /// `COUNT(*)`.
    Count(String),
    /// `SUM(..)`, always a number.
    Sum(String),
    /// `MIN(..)`/`MAX(..)`, typed like the aggregated column.
    Extreme(String, Property),
}

impl OutputColumn {
    /// Decodes a raw column value into the model value.
    pub fn decode(&self, param: SqlParam) -> StorageResult<Value> {
        match (self, param) {
            (_, SqlParam::Null) => Ok(Value::Null),
            (OutputColumn::Property(property), param)
            | (OutputColumn::Extreme(_, property), param) => from_param(property, param),
            (OutputColumn::Count(_), SqlParam::Integer(n)) => Ok(Value::from(n)),
            (OutputColumn::Count(_), SqlParam::Float(n)) => Ok(Value::from(n as i64)),
            (OutputColumn::Sum(_), SqlParam::Float(n)) => Ok(Value::from(n)),
            (OutputColumn::Sum(_), SqlParam::Integer(n)) => Ok(Value::from(n as f64)),
            (column, param) => Err(StorageError::unexpected(format!(
                "{:?} returned {:?}",
                column, param
            ))),
        }
    }

    /// Places a decoded value in the record.
    pub fn assign(&self, record: &mut Record, value: Value) {
        match self {
            OutputColumn::Property(property) => set_path(record, &property.name, value),
            OutputColumn::Count(name) | OutputColumn::Sum(name) | OutputColumn::Extreme(name, _) => {
                record.insert(name.clone(), value);
            }
        }
    }
}

/// A select statement and the shape of its rows.
#[derive(Debug, Clone)]
pub struct SelectPlan {
    pub statement: SqlFragment,
    pub columns: Vec<OutputColumn>,
}

impl SelectPlan {
    /// Builds a record from one row's raw values, in select-list order.
    pub fn record(&self, values: Vec<SqlParam>) -> StorageResult<Record> {
        if values.len() != self.columns.len() {
            return Err(StorageError::unexpected(format!(
                "row has {} columns, expected {}",
                values.len(),
                self.columns.len()
            )));
        }
        let mut record = Record::new();
        for (column, value) in self.columns.iter().zip(values) {
            let decoded = column.decode(value)?;
            column.assign(&mut record, decoded);
        }
        Ok(record)
    }
}

/// Model values to and from [`SqlParam`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlCodec;

impl ValueCodec for SqlCodec {
    type Wire = SqlParam;

    fn value_to_db(&self, property: &Property, value: &Value) -> StorageResult<SqlParam> {
        to_param(property, value)
    }

    fn value_to_model(&self, property: &Property, wire: SqlParam) -> StorageResult<Value> {
        from_param(property, wire)
    }
}

/// DDL and DML for one model in one dialect.
#[derive(Debug, Clone, Copy)]
pub struct SqlStatements<'a> {
    dialect: &'a dyn SqlDialect,
    schema: &'a ModelSchema,
}

impl<'a> SqlStatements<'a> {
    pub fn new(dialect: &'a dyn SqlDialect, schema: &'a ModelSchema) -> Self {
        Self { dialect, schema }
    }

    fn table(&self) -> String {
        self.dialect.quote(self.schema.table_name())
    }

    fn column_definition(&self, property: &Property) -> String {
        let column_type = if property.primary_key {
            self.dialect.id_column_type().to_string()
        } else {
            self.dialect.column_type(property)
        };
        let nullability = if property.required || property.primary_key {
            "NOT NULL"
        } else {
            "NULL"
        };
        format!(
            "{} {} {}",
            self.dialect.quote(&property.storage_name),
            column_type,
            nullability
        )
    }

    pub fn create_table(&self) -> String {
        let mut definitions: Vec<String> = self
            .schema
            .properties()
            .iter()
            .map(|p| self.column_definition(p))
            .collect();
        definitions.push(format!("PRIMARY KEY ({})", self.dialect.quote("id")));
        format!("CREATE TABLE {} ({})", self.table(), definitions.join(", "))
    }

    pub fn add_column(&self, column: &str) -> StorageResult<String> {
        let property = self
            .schema
            .property(column)
            .ok_or_else(|| QueryError::UnknownColumn(column.to_string()))?;
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table(),
            self.column_definition(property)
        ))
    }

    pub fn create_index(&self, name: &str, index: &IndexDescriptor) -> StorageResult<String> {
        let mut columns = Vec::with_capacity(index.columns.len());
        for (column, direction) in &index.columns {
            let property = self
                .schema
                .property(column)
                .ok_or_else(|| QueryError::UnknownColumn(column.clone()))?;
            columns.push(format!(
                "{} {}",
                self.dialect.quote(&property.storage_name),
                direction.sql()
            ));
        }
        Ok(format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.dialect.quote(name),
            self.table(),
            columns.join(", ")
        ))
    }

    pub fn create_foreign_key(
        &self,
        column: &str,
        parent: &ModelSchema,
        action: IntegrityAction,
    ) -> StorageResult<String> {
        let property = self
            .schema
            .property(column)
            .ok_or_else(|| QueryError::UnknownColumn(column.to_string()))?;
        Ok(format!(
            "ALTER TABLE {} ADD FOREIGN KEY ({}) REFERENCES {}({}) ON DELETE {}",
            self.table(),
            self.dialect.quote(&property.storage_name),
            self.dialect.quote(parent.table_name()),
            self.dialect.quote("id"),
            action.on_delete()
        ))
    }

    pub fn drop_table(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.table())
    }

    /// `INSERT` of the columns present in `record`. A null or missing `id`
    /// is left to the engine.
    pub fn insert(&self, record: &Record) -> StorageResult<SqlFragment> {
        let mut compiler = SqlCompiler::new(self.dialect, self.schema);
        let mut columns = Vec::new();
        let mut placeholders = Vec::new();
        for property in self.schema.properties() {
            let Some(value) = get_path(record, &property.name) else {
                continue;
            };
            if property.primary_key && value.is_null() {
                continue;
            }
            columns.push(self.dialect.quote(&property.storage_name));
            placeholders.push(compiler.push_param(to_param(property, value)?));
        }
        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", self.table())
        } else {
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.table(),
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        Ok(SqlFragment::with_params(sql, compiler.into_params()))
    }

    /// Full replace by id: every declared column absent from `record` is
    /// set to NULL.
    pub fn update(&self, record: &Record) -> StorageResult<SqlFragment> {
        let id = record_id(record).ok_or(ResourceError::NotFound)?;
        let mut compiler = SqlCompiler::new(self.dialect, self.schema);
        let mut assignments = Vec::new();
        for property in self.schema.properties() {
            if property.primary_key {
                continue;
            }
            let value = get_path(record, &property.name).unwrap_or(&Value::Null);
            let placeholder = compiler.push_param(to_param(property, value)?);
            assignments.push(format!(
                "{} = {}",
                self.dialect.quote(&property.storage_name),
                placeholder
            ));
        }
        if assignments.is_empty() {
            // nothing but the id; still report whether the row exists
            let (_, id_column) = compiler.column("id")?;
            assignments.push(format!("{} = {}", id_column, id_column));
        }
        let where_clause = compiler.where_clause(&Condition::id(id.clone()))?;
        let sql = format!(
            "UPDATE {} SET {}{}",
            self.table(),
            assignments.join(", "),
            where_clause
        );
        Ok(SqlFragment::with_params(sql, compiler.into_params()))
    }

    /// `UPDATE ... SET` for a resolved [`UpdateSpec`]. `$inc` treats NULL as 0.
    pub fn update_partial(
        &self,
        update: &UpdateSpec,
        condition: &Condition,
    ) -> StorageResult<SqlFragment> {
        let mut compiler = SqlCompiler::new(self.dialect, self.schema);
        let mut assignments = Vec::with_capacity(update.ops().len());
        for op in update.ops() {
            let (property, column) = compiler.column(op.column())?;
            let assignment = match op {
                UpdateOp::Set { value, .. } => {
                    let placeholder = compiler.push_param(to_param(property, value)?);
                    format!("{} = {}", column, placeholder)
                }
                UpdateOp::Inc { amount, .. } => {
                    let placeholder = compiler.push_param(to_param(property, amount)?);
                    format!("{} = COALESCE({}, 0) + {}", column, column, placeholder)
                }
            };
            assignments.push(assignment);
        }
        if assignments.is_empty() {
            return Err(QueryError::InvalidCondition("empty update".to_string()).into());
        }
        let where_clause = compiler.where_clause(condition)?;
        let sql = format!(
            "UPDATE {} SET {}{}",
            self.table(),
            assignments.join(", "),
            where_clause
        );
        Ok(SqlFragment::with_params(sql, compiler.into_params()))
    }

    /// `SELECT` for a find, grouped or not.
    pub fn select(&self, query: &Query) -> StorageResult<SelectPlan> {
        let mut compiler = SqlCompiler::new(self.dialect, self.schema);
        let mut columns = Vec::new();

        let (select_list, group_by) = match &query.group {
            Some(group) => {
                let clause = compiler.build_group(group)?;
                for name in &group.by {
                    let (property, _) = compiler.column(name)?;
                    columns.push(OutputColumn::Property(property.clone()));
                }
                for field in &group.fields {
                    columns.push(match &field.aggregate {
                        Aggregate::Count => OutputColumn::Count(field.name.clone()),
                        Aggregate::Sum(_) => OutputColumn::Sum(field.name.clone()),
                        Aggregate::Min(column) | Aggregate::Max(column) => {
                            OutputColumn::Extreme(field.name.clone(), compiler.column(column)?.0.clone())
                        }
                    });
                }
                (clause.select, clause.group_by)
            }
            None => {
                let mut selected = Vec::new();
                for property in self.schema.properties() {
                    let wanted = match &query.select {
                        Some(names) => {
                            property.primary_key || names.iter().any(|n| n == &property.name)
                        }
                        None => true,
                    };
                    if wanted {
                        selected.push(self.dialect.quote(&property.storage_name));
                        columns.push(OutputColumn::Property(property.clone()));
                    }
                }
                if let Some(names) = &query.select {
                    for name in names {
                        compiler.column(name)?;
                    }
                }
                (selected.join(", "), String::new())
            }
        };

        let where_clause = compiler.where_clause(&query.condition)?;
        let order = compiler.order_clause(&query.order, query.group.as_ref())?;
        let sql = format!(
            "SELECT {} FROM {}{}{}{}{}",
            select_list,
            self.table(),
            where_clause,
            group_by,
            order,
            self.limit_clause(query.limit, query.skip)
        );
        Ok(SelectPlan {
            statement: SqlFragment::with_params(sql, compiler.into_params()),
            columns,
        })
    }

    fn limit_clause(&self, limit: Option<u64>, skip: Option<u64>) -> String {
        match (limit, skip) {
            (None, None) => String::new(),
            (Some(limit), None) => format!(" LIMIT {}", limit),
            (Some(limit), Some(skip)) => format!(" LIMIT {} OFFSET {}", limit, skip),
            (None, Some(skip)) => format!(" LIMIT {} OFFSET {}", self.dialect.limit_all(), skip),
        }
    }

    /// `SELECT` of one record by id.
    pub fn select_by_id(&self, id: &Value) -> StorageResult<SelectPlan> {
        self.select(&Query::filter(Condition::id(id.clone())).limit(1))
    }

    pub fn count(&self, condition: &Condition) -> StorageResult<SqlFragment> {
        let mut compiler = SqlCompiler::new(self.dialect, self.schema);
        let where_clause = compiler.where_clause(condition)?;
        let sql = format!("SELECT COUNT(*) FROM {}{}", self.table(), where_clause);
        Ok(SqlFragment::with_params(sql, compiler.into_params()))
    }

    pub fn delete(&self, condition: &Condition) -> StorageResult<SqlFragment> {
        let mut compiler = SqlCompiler::new(self.dialect, self.schema);
        let where_clause = compiler.where_clause(condition)?;
        let sql = format!("DELETE FROM {}{}", self.table(), where_clause);
        Ok(SqlFragment::with_params(sql, compiler.into_params()))
    }
}
