pub mod audit;
pub mod chat;
pub mod history;
