pub mod generators;
pub mod test_db;
