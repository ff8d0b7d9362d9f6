pub mod dead_letter;
pub mod document;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod outbox;
pub mod ports;
