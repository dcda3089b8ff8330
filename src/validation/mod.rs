pub mod sql_inspector;

pub use sql_inspector::*;
