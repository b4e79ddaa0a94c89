pub mod address;
pub mod atomic_write;
pub mod cache;
pub mod env;
pub mod retry;
pub mod telegram;

#[cfg(test)]
pub mod test_utils;
