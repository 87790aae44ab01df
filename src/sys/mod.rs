#[cfg(unix)]
pub(crate) mod unix;
