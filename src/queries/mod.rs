pub mod ddl;
pub mod metadata;
pub mod monitored;
pub mod recordings;
pub mod users;
