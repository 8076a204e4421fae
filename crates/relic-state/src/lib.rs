pub mod artifacts;
pub mod db;
pub mod dependents;
pub mod derived;
pub mod items;
pub mod raw;
pub mod schema;
