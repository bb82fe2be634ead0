/// Global constants for serialsql
///
/// Static configuration shared by the connection facade, the engine worker and
/// the transaction controller.

/// Location value that selects an in-memory database instead of a file.
pub const MEMORY_LOCATION: &str = ":memory:";

/// URI scheme some callers prepend to locations; stripped before the engine sees it.
pub const FILE_SCHEME: &str = "file://";

/// Directory used when `OpenOptions::location` is not set.
pub const DEFAULT_LOCATION: &str = ".";

/// Prefix for the name of each connection's engine worker thread.
pub const WORKER_THREAD_PREFIX: &str = "serialsql-engine";

/// Declared type reported in column metadata when the engine has none.
pub const UNKNOWN_COLUMN_TYPE: &str = "UNKNOWN";

pub const BEGIN_SQL: &str = "BEGIN TRANSACTION";
pub const COMMIT_SQL: &str = "COMMIT";
pub const ROLLBACK_SQL: &str = "ROLLBACK";

/// Used by `load_file`, which takes the write lock up front.
pub const BEGIN_EXCLUSIVE_SQL: &str = "BEGIN EXCLUSIVE";
