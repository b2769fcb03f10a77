//! Budget Module
//!
//! Budget lines ("despesas") of partnership terms and the use cases that
//! write them through the dual writer.

mod locks;
mod model;
pub mod money;
mod service;
pub mod statements;

pub use locks::TermLocks;
pub use model::{
    group_lines, parse_months, AmountUpdate, BudgetLine, BudgetRow, ExpenseInput, NewBudgetLine, ReplaceRequest,
    Term, TermInfo, DEFAULT_MONTHS,
};
pub use service::{
    BudgetService, ReplaceOutcome, ReplaceStatus, ReplaceSummary, ReplicaCounts, TotalMismatch,
};
