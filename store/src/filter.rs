use crate::record::IndexValue;

/// Comparison applied by a [`Filter`] against an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl FilterOp {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
        }
    }
}

/// A single `field OP value` constraint used by `Store::list`. Filters
/// passed together are ANDed.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: IndexValue) -> Self {
        Self { field: field.into(), op: FilterOp::Eq, value }
    }
}
