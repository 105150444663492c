pub(crate) mod control;
pub(crate) mod operators;
pub(crate) mod postfix;
pub(crate) mod primary;
