//! Funding-split computation and FIFO bucket consumption.
//!
//! An expense is funded from the submitter's open budget buckets first,
//! oldest bucket first; whatever the buckets cannot cover becomes a
//! shortfall carried on the reimbursement ledger. The arithmetic here is
//! pure so it can be tested exhaustively without a database.

use uuid::Uuid;

use crate::{EngineError, ResultEngine, budgets::Budget};

/// The division of an expense amount between bucket money and liability.
///
/// Always satisfies
/// `from_allocation_minor + from_reimbursement_minor == amount`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FundingSplit {
    pub from_allocation_minor: i64,
    pub from_reimbursement_minor: i64,
}

impl FundingSplit {
    pub fn total_minor(&self) -> i64 {
        self.from_allocation_minor + self.from_reimbursement_minor
    }
}

/// One bucket's contribution to an expense.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BucketDraw {
    pub budget_id: Uuid,
    pub take_minor: i64,
}

/// Computes the funding split for `amount_minor` given the total remaining
/// balance across the submitter's buckets.
///
/// - no budget at all (`available == 0`) → everything on the ledger;
/// - `available >= amount` → fully funded;
/// - otherwise the buckets are drained and the rest is shortfall.
pub fn compute_split(amount_minor: i64, available_minor: i64) -> ResultEngine<FundingSplit> {
    if amount_minor <= 0 {
        return Err(EngineError::InvalidArgument(
            "amount_minor must be > 0".to_string(),
        ));
    }

    let from_allocation = amount_minor.min(available_minor.max(0));
    Ok(FundingSplit {
        from_allocation_minor: from_allocation,
        from_reimbursement_minor: amount_minor - from_allocation,
    })
}

/// Plans the FIFO consumption of `need_minor` across `buckets`.
///
/// `buckets` must already be ordered oldest-created-first; each bucket is
/// mutated in place (`consume`) and the draws that actually contributed are
/// returned in consumption order. The caller persists one update per draw.
pub fn plan_consumption(buckets: &mut [Budget], need_minor: i64) -> Vec<BucketDraw> {
    let mut draws = Vec::new();
    let mut need = need_minor;

    for bucket in buckets.iter_mut() {
        if need == 0 {
            break;
        }
        let take = bucket.consume(need);
        if take > 0 {
            draws.push(BucketDraw {
                budget_id: bucket.id,
                take_minor: take,
            });
            need -= take;
        }
    }

    draws
}
