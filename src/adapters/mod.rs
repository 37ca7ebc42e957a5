pub mod anthropic;
pub mod mock;
pub mod sqlite;
