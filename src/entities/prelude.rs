#![allow(unused_imports)]

pub use super::kv_entry::Entity as KvEntry;
