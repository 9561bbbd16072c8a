pub mod exception;
pub(crate) mod retry;
