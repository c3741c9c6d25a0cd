pub mod prelude;

pub mod kv_entry;
