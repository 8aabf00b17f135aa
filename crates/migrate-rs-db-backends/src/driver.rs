//! Supported database products and their capabilities.
//!
//! [`DriverKind`] is the closed set of dialects the migrator knows about. Each
//! kind maps 1:1 to a canonical driver-class identifier string, which is what
//! host configuration usually carries. Lookup is total over that fixed table
//! and never falls back to a default dialect.

use std::fmt;
use std::str::FromStr;

use migrate_rs_core::{MigrateError, MigrateResult};
use serde::{Deserialize, Serialize};

/// A supported database product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Apache Derby (embedded).
    Derby,
    /// MariaDB.
    MariaDb,
    /// MySQL 8+.
    MySql,
    /// PostgreSQL.
    #[serde(alias = "postgresql")]
    Postgres,
    /// Oracle Database.
    Oracle,
    /// Microsoft SQL Server.
    MsSql,
    /// H2 (embedded).
    H2,
    /// SQLite (embedded).
    Sqlite,
}

impl DriverKind {
    /// Every supported kind, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Derby,
        Self::MariaDb,
        Self::MySql,
        Self::Postgres,
        Self::Oracle,
        Self::MsSql,
        Self::H2,
        Self::Sqlite,
    ];

    /// Looks up the kind for a canonical driver-class identifier.
    ///
    /// Returns `None` for anything outside the fixed table; the comparison is
    /// exact apart from surrounding whitespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use migrate_rs_db_backends::driver::DriverKind;
    ///
    /// assert_eq!(
    ///     DriverKind::from_driver_class_name("org.postgresql.Driver"),
    ///     Some(DriverKind::Postgres)
    /// );
    /// assert_eq!(DriverKind::from_driver_class_name("com.example.NoSuchDriver"), None);
    /// ```
    pub fn from_driver_class_name(identifier: &str) -> Option<Self> {
        let identifier = identifier.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.driver_class_name() == identifier)
    }

    /// Fail-fast variant of [`from_driver_class_name`](Self::from_driver_class_name).
    pub fn resolve(identifier: &str) -> MigrateResult<Self> {
        Self::from_driver_class_name(identifier)
            .ok_or_else(|| MigrateError::UnknownDriver(identifier.to_string()))
    }

    /// Detects the kind from a connection URL scheme.
    ///
    /// A leading `jdbc:` is optional, so both `jdbc:postgresql://db/app` and
    /// `postgres://db/app` resolve to [`DriverKind::Postgres`].
    pub fn from_url(url: &str) -> Option<Self> {
        let rest = strip_jdbc_prefix(url.trim());
        let scheme = rest.split(':').next()?.to_ascii_lowercase();
        match scheme.as_str() {
            "postgresql" | "postgres" => Some(Self::Postgres),
            "mysql" => Some(Self::MySql),
            "mariadb" => Some(Self::MariaDb),
            "oracle" => Some(Self::Oracle),
            "sqlserver" | "mssql" => Some(Self::MsSql),
            "h2" => Some(Self::H2),
            "derby" => Some(Self::Derby),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// The canonical driver-class identifier for this kind.
    pub const fn driver_class_name(self) -> &'static str {
        match self {
            Self::Derby => "org.apache.derby.jdbc.EmbeddedDriver",
            Self::MariaDb => "org.mariadb.jdbc.Driver",
            Self::MySql => "com.mysql.cj.jdbc.Driver",
            Self::Postgres => "org.postgresql.Driver",
            Self::Oracle => "oracle.jdbc.OracleDriver",
            Self::MsSql => "com.microsoft.sqlserver.jdbc.SQLServerDriver",
            Self::H2 => "org.h2.Driver",
            Self::Sqlite => "org.sqlite.JDBC",
        }
    }

    /// Short vendor name, used in logs and as the `FromStr` spelling.
    pub const fn vendor(self) -> &'static str {
        match self {
            Self::Derby => "derby",
            Self::MariaDb => "mariadb",
            Self::MySql => "mysql",
            Self::Postgres => "postgresql",
            Self::Oracle => "oracle",
            Self::MsSql => "mssql",
            Self::H2 => "h2",
            Self::Sqlite => "sqlite",
        }
    }

    /// Whether the database runs inside the host process.
    pub const fn is_embedded(self) -> bool {
        matches!(self, Self::Derby | Self::H2 | Self::Sqlite)
    }

    /// Whether DDL statements participate in transactions on this dialect.
    ///
    /// MySQL, MariaDB and Oracle commit implicitly around DDL, so a task's
    /// statements and its history record cannot be written atomically there.
    pub const fn supports_transactional_ddl(self) -> bool {
        matches!(
            self,
            Self::Postgres | Self::MsSql | Self::H2 | Self::Derby | Self::Sqlite
        )
    }

    /// Whether this crate ships a live connector for the kind.
    pub const fn has_native_connector(self) -> bool {
        matches!(
            self,
            Self::Postgres | Self::MySql | Self::MariaDb | Self::Sqlite
        )
    }

    /// Whether this dialect's MySQL-family syntax applies.
    pub const fn is_mysql_family(self) -> bool {
        matches!(self, Self::MySql | Self::MariaDb)
    }

    /// Quotes an identifier for this dialect.
    ///
    /// ```
    /// use migrate_rs_db_backends::driver::DriverKind;
    ///
    /// assert_eq!(DriverKind::MySql.quote_identifier("order"), "`order`");
    /// assert_eq!(DriverKind::MsSql.quote_identifier("order"), "[order]");
    /// assert_eq!(DriverKind::Postgres.quote_identifier("order"), "\"order\"");
    /// ```
    pub fn quote_identifier(self, name: &str) -> String {
        match self {
            Self::MySql | Self::MariaDb => format!("`{}`", name.replace('`', "``")),
            Self::MsSql => format!("[{}]", name.replace(']', "]]")),
            _ => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    /// Bind-parameter placeholder for the given 1-based index.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${index}"),
            _ => "?".to_string(),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.vendor())
    }
}

impl FromStr for DriverKind {
    type Err = MigrateError;

    /// Parses either a short vendor name or a canonical identifier.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(kind) = Self::from_driver_class_name(trimmed) {
            return Ok(kind);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "derby" => Ok(Self::Derby),
            "mariadb" => Ok(Self::MariaDb),
            "mysql" => Ok(Self::MySql),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "oracle" => Ok(Self::Oracle),
            "mssql" | "sqlserver" => Ok(Self::MsSql),
            "h2" => Ok(Self::H2),
            "sqlite" => Ok(Self::Sqlite),
            _ => Err(MigrateError::UnknownDriver(trimmed.to_string())),
        }
    }
}

/// Removes an optional, case-insensitive `jdbc:` prefix.
pub fn strip_jdbc_prefix(url: &str) -> &str {
    match url.get(..5) {
        Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &url[5..],
        _ => url,
    }
}
