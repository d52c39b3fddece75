pub mod database;
pub mod error;
pub mod ledger;
pub mod objects;
pub mod schema;

pub use database::{OrganisationQuota, ProjectQuota, QuotaDatabase, QuotaKey};
pub use error::StorageError;
pub use objects::{ObjectStatus, StoredObject};

pub const QUOTA_DB_FILENAME: &str = "quota_ledger.db";
