//! Expiring key/value row shared by the claim ledger and nonce sequencer.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "kv_entries")]
pub struct Model {
    /// Namespaced key such as `claim:<identity>` or `nonce:<network>`
    #[sea_orm(primary_key, auto_increment = false, column_type = "String(StringLen::N(256))")]
    pub key: String,
    #[sea_orm(column_type = "Text")]
    pub value: String,
    /// Rows at or past this instant are treated as absent
    pub expires_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
