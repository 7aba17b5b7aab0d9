//! Department and sub-department catalog entities.
//!
//! The catalog is managed elsewhere; the engine only resolves ids to names
//! when an expense references them. A missing id is a `NotFound` at
//! expense creation time.

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "departments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sub_departments::Entity")]
    SubDepartments,
}

impl Related<super::sub_departments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SubDepartments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
