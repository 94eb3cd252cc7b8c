// gitbroker-common: record types and repository layout shared by the broker and its tooling

pub mod catalog;
pub mod path;
pub mod types;
