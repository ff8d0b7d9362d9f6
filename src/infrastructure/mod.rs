pub mod in_memory;
pub mod kafka;
pub mod models;
pub mod outbox_repo;
pub mod pg_listener;
pub mod search_index;
