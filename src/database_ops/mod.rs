pub mod db;
pub mod harvest_jobs;
pub mod staging;

pub use db::Db;
pub use harvest_jobs::PgJobStore;
pub use staging::PgStagingStore;

/// Quote a validated (optionally schema-qualified) identifier for splicing into SQL.
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::quote_ident;

    #[test]
    fn quotes_each_part() {
        assert_eq!(quote_ident("harvest_jobs"), "\"harvest_jobs\"");
        assert_eq!(quote_ident("staging.F0"), "\"staging\".\"F0\"");
    }
}
