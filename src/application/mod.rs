pub mod registry;
pub mod search_handlers;
pub mod tailer;
pub mod worker;
