use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("discovery error: {0}")]
    Discovery(String),

    /// Two source units declared the same migration name.
    #[error("duplicate migration name `{name}` declared by {first} and {second}")]
    DuplicateMigration {
        name: String,
        first: String,
        second: String,
    },

    #[error("ledger store error: {0}")]
    Store(String),

    #[error("migration `{name}` failed to apply: {message}")]
    Apply { name: String, message: String },

    #[error("migration `{name}` failed to revert: {message}")]
    Revert { name: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn error_display_includes_context() {
        let e = Error::Config("bad yaml".into());
        assert_eq!(e.to_string(), "configuration error: bad yaml");

        let e = Error::Store("no such table".into());
        assert_eq!(e.to_string(), "ledger store error: no such table");
    }

    #[test]
    fn migration_errors_name_the_migration() {
        let e = Error::Apply {
            name: "0003_add_index".into(),
            message: "syntax error".into(),
        };
        assert_eq!(
            e.to_string(),
            "migration `0003_add_index` failed to apply: syntax error"
        );

        let e = Error::DuplicateMigration {
            name: "0001_init".into(),
            first: "db/a/0001_init.sql".into(),
            second: "db/b/0001_init.sql".into(),
        };
        assert!(e.to_string().contains("`0001_init`"));
        assert!(e.to_string().contains("db/b/0001_init.sql"));
    }
}
