pub mod catalog;
pub mod error;
pub mod matching;
pub mod partner;
pub mod unread;
