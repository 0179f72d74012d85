#[cfg(test)]
pub(crate) fn with_env_lock<F, R>(func: F) -> R
where
    F: FnOnce() -> R,
{
    static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
    let _guard = ENV_MUTEX.lock().expect("env lock");
    func()
}
