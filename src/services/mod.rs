pub mod coordinator;
pub mod credentials;
pub mod identity;
pub mod metadata_store;
pub mod object_store;
pub mod signing;
pub mod sweeper;

#[cfg(test)]
pub mod testing;
