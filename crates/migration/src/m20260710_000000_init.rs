//! Initial schema migration - creates all tables from scratch.
//!
//! It creates the complete schema for the expense administration service:
//!
//! - `users`: authentication, roles and the denormalized per-user aggregate
//! - `departments` / `sub_departments`: spend catalog (lookup only)
//! - `budgets`: allocation buckets with running remaining balances
//! - `reimbursements`: the liability ledger (at most one open entry per user)
//! - `expenses`: spend records with their funding split and audit snapshot

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// ─────────────────────────────────────────────────────────────────────────────
// Table identifiers
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Iden)]
enum Users {
    Table,
    Username,
    Password,
    Role,
    Company,
    TwoFactorPending,
    TwoFactorVerified,
    AllocatedMinor,
    SpentMinor,
    BudgetLeftMinor,
    ReimbursedMinor,
}

#[derive(Iden)]
enum Departments {
    Table,
    Id,
    Name,
}

#[derive(Iden)]
enum SubDepartments {
    Table,
    Id,
    Name,
    DepartmentId,
}

#[derive(Iden)]
enum Budgets {
    Table,
    Id,
    UserId,
    AllocatedMinor,
    SpentMinor,
    RemainingMinor,
    Month,
    Year,
    Company,
    CreatedAt,
}

#[derive(Iden)]
enum Reimbursements {
    Table,
    Id,
    UserId,
    AmountMinor,
    IsReimbursed,
    ReimbursedAt,
    LastExpenseId,
    CreatedAt,
}

#[derive(Iden)]
enum Expenses {
    Table,
    Id,
    UserId,
    AmountMinor,
    FromAllocationMinor,
    FromReimbursementMinor,
    DepartmentId,
    SubDepartmentId,
    BudgetIds,
    ReimbursementId,
    PaymentMethod,
    Note,
    ProofUrl,
    CreatedAt,
}

// ─────────────────────────────────────────────────────────────────────────────
// Migration implementation
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ───────────────────────────────────────────────────────────────────
        // 1. Users
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Username)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Users::Password).string().not_null())
                    .col(
                        ColumnDef::new(Users::Role)
                            .string()
                            .not_null()
                            .default("employee"),
                    )
                    .col(ColumnDef::new(Users::Company).string().not_null())
                    .col(
                        ColumnDef::new(Users::TwoFactorPending)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Users::TwoFactorVerified)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Users::AllocatedMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Users::SpentMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Users::BudgetLeftMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Users::ReimbursedMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 2. Departments catalog
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Departments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Departments::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Departments::Name).string().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SubDepartments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SubDepartments::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SubDepartments::Name).string().not_null())
                    .col(
                        ColumnDef::new(SubDepartments::DepartmentId)
                            .string()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-sub_departments-department_id")
                            .from(SubDepartments::Table, SubDepartments::DepartmentId)
                            .to(Departments::Table, Departments::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 3. Budgets
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Budgets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Budgets::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Budgets::UserId).string().not_null())
                    .col(
                        ColumnDef::new(Budgets::AllocatedMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Budgets::SpentMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Budgets::RemainingMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Budgets::Month).integer().not_null())
                    .col(ColumnDef::new(Budgets::Year).integer().not_null())
                    .col(ColumnDef::new(Budgets::Company).string().not_null())
                    .col(ColumnDef::new(Budgets::CreatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-budgets-user_id")
                            .from(Budgets::Table, Budgets::UserId)
                            .to(Users::Table, Users::Username),
                    )
                    .to_owned(),
            )
            .await?;

        // The FIFO consumption query: buckets by user, oldest first.
        manager
            .create_index(
                Index::create()
                    .name("idx-budgets-user_id-created_at")
                    .table(Budgets::Table)
                    .col(Budgets::UserId)
                    .col(Budgets::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 4. Reimbursements
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Reimbursements::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Reimbursements::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Reimbursements::UserId).string().not_null())
                    .col(
                        ColumnDef::new(Reimbursements::AmountMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Reimbursements::IsReimbursed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Reimbursements::ReimbursedAt).timestamp())
                    .col(ColumnDef::new(Reimbursements::LastExpenseId).string())
                    .col(
                        ColumnDef::new(Reimbursements::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-reimbursements-user_id")
                            .from(Reimbursements::Table, Reimbursements::UserId)
                            .to(Users::Table, Users::Username),
                    )
                    .to_owned(),
            )
            .await?;

        // The open-entry lookup: at most one row per user has
        // is_reimbursed = false.
        manager
            .create_index(
                Index::create()
                    .name("idx-reimbursements-user_id-is_reimbursed")
                    .table(Reimbursements::Table)
                    .col(Reimbursements::UserId)
                    .col(Reimbursements::IsReimbursed)
                    .to_owned(),
            )
            .await?;

        // ───────────────────────────────────────────────────────────────────
        // 5. Expenses
        // ───────────────────────────────────────────────────────────────────
        manager
            .create_table(
                Table::create()
                    .table(Expenses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Expenses::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Expenses::UserId).string().not_null())
                    .col(
                        ColumnDef::new(Expenses::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Expenses::FromAllocationMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Expenses::FromReimbursementMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Expenses::DepartmentId).string().not_null())
                    .col(ColumnDef::new(Expenses::SubDepartmentId).string())
                    .col(ColumnDef::new(Expenses::BudgetIds).string().not_null())
                    .col(ColumnDef::new(Expenses::ReimbursementId).string())
                    .col(
                        ColumnDef::new(Expenses::PaymentMethod)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Expenses::Note).string())
                    .col(ColumnDef::new(Expenses::ProofUrl).string())
                    .col(ColumnDef::new(Expenses::CreatedAt).timestamp().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-expenses-user_id")
                            .from(Expenses::Table, Expenses::UserId)
                            .to(Users::Table, Users::Username),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-expenses-department_id")
                            .from(Expenses::Table, Expenses::DepartmentId)
                            .to(Departments::Table, Departments::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-expenses-user_id-created_at")
                    .table(Expenses::Table)
                    .col(Expenses::UserId)
                    .col(Expenses::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Expenses::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Reimbursements::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Budgets::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SubDepartments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Departments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        Ok(())
    }
}
