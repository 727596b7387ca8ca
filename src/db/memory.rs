//! In-memory cookie storage for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::CookieStorage;
use crate::errors::CmpError;

/// In-memory cookie jar that counts writes.
#[derive(Debug, Default)]
pub struct MemoryCookieStorage {
    cookies: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryCookieStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a cookie without counting it as a write.
    pub fn with_cookie(self, name: &str, value: &str) -> Self {
        if let Ok(mut cookies) = self.cookies.lock() {
            cookies.insert(
                name.to_string(),
                (value.to_string(), DateTime::<Utc>::MAX_UTC),
            );
        }
        self
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent writes fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, DateTime<Utc>)>>, CmpError>
    {
        self.cookies
            .lock()
            .map_err(|_| CmpError::Internal("Cookie jar lock poisoned".to_string()))
    }
}

#[async_trait]
impl CookieStorage for MemoryCookieStorage {
    async fn read(&self, name: &str) -> Result<Option<String>, CmpError> {
        let cookies = self.lock()?;
        Ok(cookies
            .get(name)
            .filter(|(_, expires_at)| *expires_at > Utc::now())
            .map(|(value, _)| value.clone()))
    }

    async fn write(&self, name: &str, value: &str, max_age: Duration) -> Result<(), CmpError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CmpError::Storage(format!("Cookie {} not writable", name)));
        }
        let expires_at = Utc::now()
            .checked_add_signed(max_age)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.lock()?
            .insert(name.to_string(), (value.to_string(), expires_at));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), CmpError> {
        self.lock()?.remove(name);
        Ok(())
    }
}
