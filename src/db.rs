use std::str::FromStr;

use sqlx::{
    sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Arguments, FromRow, SqlitePool,
};
use time::OffsetDateTime;
use tracing::{debug, error, info};

/// Any failure raised by the storage engine. Callers at this layer do not
/// distinguish constraint violations from connectivity problems.
#[derive(Debug, thiserror::Error)]
#[error("storage error: {0}")]
pub struct StorageError(#[from] pub sqlx::Error);

/// A positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Int(i64),
    Text(String),
    Timestamp(OffsetDateTime),
    Null,
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_owned())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<Option<String>> for Param {
    fn from(v: Option<String>) -> Self {
        v.map(Param::Text).unwrap_or(Param::Null)
    }
}

impl From<OffsetDateTime> for Param {
    fn from(v: OffsetDateTime) -> Self {
        Param::Timestamp(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    pub last_insert_id: i64,
    pub rows_affected: u64,
}

const CREATE_CONTACTS: &str = r#"
    CREATE TABLE IF NOT EXISTS contacts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        firstname TEXT NOT NULL,
        lastname TEXT NOT NULL,
        email TEXT NOT NULL,
        homephone TEXT,
        mobile TEXT,
        address TEXT,
        birthday TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    )
"#;

/// Handle to the relational store. Cheap to clone; all clones share one pool.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `:memory:` opens its own database, so keep exactly one alive.
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        debug!(in_memory, "store connected");
        Ok(Self { pool })
    }

    /// Creates the `contacts` table if it does not exist yet.
    pub async fn initialize(&self) -> Result<(), StorageError> {
        self.execute(CREATE_CONTACTS, &[]).await.map_err(|e| {
            error!(error = %e, "creating contacts table failed");
            e
        })?;
        info!("database initialized");
        Ok(())
    }

    pub async fn execute(&self, statement: &str, params: &[Param]) -> Result<ExecOutcome, StorageError> {
        let result = sqlx::query_with(statement, arguments(params))
            .execute(&self.pool)
            .await?;
        Ok(ExecOutcome {
            last_insert_id: result.last_insert_rowid(),
            rows_affected: result.rows_affected(),
        })
    }

    pub async fn query_all<T>(&self, statement: &str, params: &[Param]) -> Result<Vec<T>, StorageError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let rows = sqlx::query_as_with::<_, T, _>(statement, arguments(params))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn query_one<T>(&self, statement: &str, params: &[Param]) -> Result<Option<T>, StorageError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let row = sqlx::query_as_with::<_, T, _>(statement, arguments(params))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Inserts the sample contacts, but only into an empty table.
    pub async fn seed_sample_contacts(&self) -> Result<u64, StorageError> {
        let (count,): (i64,) = self
            .query_one("SELECT COUNT(*) FROM contacts", &[])
            .await?
            .unwrap_or((0,));
        if count > 0 {
            debug!(count, "contacts table not empty; skipping seed");
            return Ok(0);
        }

        let now = OffsetDateTime::now_utc();
        let mut inserted = 0;
        for [firstname, lastname, email, homephone, mobile, address, birthday] in SAMPLE_CONTACTS {
            self.execute(
                r#"
                INSERT INTO contacts
                    (firstname, lastname, email, homephone, mobile, address, birthday, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                &[
                    firstname.into(),
                    lastname.into(),
                    email.into(),
                    homephone.into(),
                    mobile.into(),
                    address.into(),
                    birthday.into(),
                    now.into(),
                    now.into(),
                ],
            )
            .await?;
            inserted += 1;
        }
        info!(inserted, "sample contacts inserted");
        Ok(inserted)
    }
}

fn arguments<'q>(params: &[Param]) -> SqliteArguments<'q> {
    let mut args = SqliteArguments::default();
    for param in params {
        match param {
            Param::Int(v) => args.add(*v),
            Param::Text(v) => args.add(v.clone()),
            Param::Timestamp(v) => args.add(*v),
            Param::Null => args.add(Option::<String>::None),
        }
    }
    args
}

const SAMPLE_CONTACTS: [[&str; 7]; 5] = [
    ["John", "Doe", "john.doe@example.com", "01-234-5678", "087-1234567", "123 Main St, Dublin, Ireland", "1985-03-15"],
    ["Jane", "Smith", "jane.smith@example.com", "01-876-5432", "086-7654321", "456 High Street, Cork, Ireland", "1990-07-22"],
    ["Michael", "Johnson", "michael.johnson@example.com", "01-555-1234", "085-5551234", "789 Park Lane, Galway, Ireland", "1982-11-05"],
    ["Emma", "Williams", "emma.williams@example.com", "01-444-9876", "083-4449876", "101 River Road, Limerick, Ireland", "1988-04-30"],
    ["David", "Brown", "david.brown@example.com", "01-333-6789", "089-3336789", "202 Mountain View, Waterford, Ireland", "1995-09-12"],
];

#[cfg(test)]
pub(crate) async fn memory_store() -> Store {
    let store = Store::connect("sqlite::memory:").await.expect("in-memory store");
    store.initialize().await.expect("initialize");
    store
}
