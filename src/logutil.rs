//! Utilities for logging.

#[cfg(test)]
pub fn init() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}

#[cfg(not(test))]
pub fn init() {
    let _ = env_logger::builder().try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_init_is_idempotent() {
        super::init();
        super::init();
        log::debug!("logging initialised twice without panicking");
    }
}
