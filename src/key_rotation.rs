//! Rotación de claves de API con cuota por minuto.
//!
//! Cada clave lleva su propia ventana de 60 segundos que empieza con el
//! primer uso tras un reinicio. La selección recorre las claves desde el
//! último índice usado y entrega la primera que sigue bajo el límite.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ApiKeyState {
    pub key: String,
    pub request_count: u32,
    pub window_start: Option<Instant>,
    pub available: bool,
}

impl ApiKeyState {
    fn new(key: String) -> Self {
        Self { key, request_count: 0, window_start: None, available: true }
    }

    /// Reinicia el contador si la ventana de esta clave ya expiró.
    fn roll_window(&mut self, now: Instant) {
        if let Some(start) = self.window_start {
            if now.saturating_duration_since(start) >= WINDOW {
                self.request_count = 0;
                self.window_start = None;
                self.available = true;
            }
        }
    }

    /// Peticiones que cuentan en `now`, sin modificar el estado.
    fn count_at(&self, now: Instant) -> u32 {
        match self.window_start {
            Some(start) if now.saturating_duration_since(start) < WINDOW => self.request_count,
            _ => 0,
        }
    }

    fn remaining(&self, now: Instant) -> Duration {
        match self.window_start {
            Some(start) => WINDOW.saturating_sub(now.saturating_duration_since(start)),
            None => Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Unused,
    Active,
    Throttled,
}

/// Vista de diagnóstico de una clave; la clave va enmascarada.
#[derive(Debug, Clone, Serialize)]
pub struct KeyUsage {
    pub key: String,
    pub status: KeyStatus,
    pub requests_in_window: u32,
    pub seconds_until_reset: u64,
}

#[derive(Debug)]
struct Pool {
    keys: Vec<ApiKeyState>,
    current: usize,
}

#[derive(Debug)]
pub struct ApiKeyManager {
    limit: u32,
    pool: Mutex<Pool>,
}

impl ApiKeyManager {
    pub fn new(keys: Vec<String>, requests_per_minute: u32) -> Self {
        let limit = requests_per_minute.max(1);
        if keys.is_empty() {
            warn!("No hay claves de API configuradas; se usarán sólo respuestas locales.");
        }
        Self {
            limit,
            pool: Mutex::new(Pool {
                keys: keys.into_iter().map(ApiKeyState::new).collect(),
                current: 0,
            }),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Un pánico con el candado tomado no deja el contador inconsistente:
    // como mucho cuenta una petición de más.
    fn lock(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn next_available_key(&self) -> Option<String> {
        self.next_available_key_at(Instant::now())
    }

    pub fn next_available_key_at(&self, now: Instant) -> Option<String> {
        let mut pool = self.lock();
        self.select(&mut pool, now).map(|idx| pool.keys[idx].key.clone())
    }

    /// Clave que entregaría la próxima selección, sin mover el índice ni
    /// reiniciar ventanas. Para diagnóstico.
    pub fn peek_available_key(&self) -> Option<String> {
        self.peek_available_key_at(Instant::now())
    }

    pub fn peek_available_key_at(&self, now: Instant) -> Option<String> {
        let pool = self.lock();
        let total = pool.keys.len();
        (0..total)
            .map(|offset| &pool.keys[(pool.current + offset) % total])
            .find(|state| state.count_at(now) < self.limit)
            .map(|state| state.key.clone())
    }

    pub fn track_usage(&self, key: &str) {
        self.track_usage_at(key, Instant::now());
    }

    pub fn track_usage_at(&self, key: &str, now: Instant) {
        let mut pool = self.lock();
        let limit = self.limit;
        if let Some(state) = pool.keys.iter_mut().find(|s| s.key == key) {
            record_use(state, limit, now);
        }
    }

    /// Selecciona y contabiliza en una sola sección crítica.
    pub fn acquire(&self) -> Option<String> {
        self.acquire_at(Instant::now())
    }

    pub fn acquire_at(&self, now: Instant) -> Option<String> {
        let mut pool = self.lock();
        let idx = self.select(&mut pool, now)?;
        let state = &mut pool.keys[idx];
        record_use(state, self.limit, now);
        Some(state.key.clone())
    }

    /// El proveedor respondió 429: la clave queda agotada hasta que expire
    /// su ventana actual.
    pub fn mark_throttled(&self, key: &str) {
        self.mark_throttled_at(key, Instant::now());
    }

    pub fn mark_throttled_at(&self, key: &str, now: Instant) {
        let mut pool = self.lock();
        let limit = self.limit;
        if let Some(state) = pool.keys.iter_mut().find(|s| s.key == key) {
            state.roll_window(now);
            state.window_start.get_or_insert(now);
            state.request_count = limit;
            state.available = false;
            warn!("Clave {} marcada como agotada por el proveedor", mask_key(key));
        }
    }

    pub fn time_until_available(&self) -> Duration {
        self.time_until_available_at(Instant::now())
    }

    pub fn time_until_available_at(&self, now: Instant) -> Duration {
        let mut pool = self.lock();
        let limit = self.limit;
        let mut shortest: Option<Duration> = None;
        for state in pool.keys.iter_mut() {
            state.roll_window(now);
            if state.request_count < limit {
                return Duration::ZERO;
            }
            let remaining = state.remaining(now);
            shortest = Some(shortest.map_or(remaining, |s| s.min(remaining)));
        }
        shortest.unwrap_or(Duration::ZERO)
    }

    pub fn snapshot(&self) -> Vec<KeyUsage> {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> Vec<KeyUsage> {
        let mut pool = self.lock();
        let limit = self.limit;
        pool.keys
            .iter_mut()
            .map(|state| {
                state.roll_window(now);
                let status = if state.window_start.is_none() {
                    KeyStatus::Unused
                } else if !state.available || state.request_count >= limit {
                    KeyStatus::Throttled
                } else {
                    KeyStatus::Active
                };
                KeyUsage {
                    key: mask_key(&state.key),
                    status,
                    requests_in_window: state.request_count,
                    seconds_until_reset: state.remaining(now).as_secs(),
                }
            })
            .collect()
    }

    fn select(&self, pool: &mut Pool, now: Instant) -> Option<usize> {
        let total = pool.keys.len();
        for offset in 0..total {
            let idx = (pool.current + offset) % total;
            let state = &mut pool.keys[idx];
            state.roll_window(now);
            if state.request_count < self.limit {
                if idx != pool.current {
                    debug!("Rotando a la clave #{idx}");
                }
                pool.current = idx;
                return Some(idx);
            }
            state.available = false;
        }
        None
    }
}

fn record_use(state: &mut ApiKeyState, limit: u32, now: Instant) {
    state.roll_window(now);
    state.window_start.get_or_insert(now);
    state.request_count = state.request_count.saturating_add(1);
    state.available = state.request_count < limit;
}

/// Deja visibles sólo los últimos cuatro caracteres.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(keys: &[&str], limit: u32) -> ApiKeyManager {
        ApiKeyManager::new(keys.iter().map(|k| k.to_string()).collect(), limit)
    }

    #[test]
    fn never_hands_out_a_key_at_the_limit() {
        let m = manager(&["a", "b"], 3);
        let t0 = Instant::now();
        let mut handed = Vec::new();
        while let Some(key) = m.acquire_at(t0) {
            handed.push(key);
            assert!(handed.len() <= 6);
        }
        assert_eq!(handed, vec!["a", "a", "a", "b", "b", "b"]);
        assert_eq!(m.next_available_key_at(t0), None);
    }

    #[test]
    fn key_is_excluded_after_limit_until_its_window_expires() {
        let m = manager(&["a"], 2);
        let t0 = Instant::now();
        m.track_usage_at("a", t0);
        m.track_usage_at("a", t0 + Duration::from_secs(30));
        assert_eq!(m.next_available_key_at(t0 + Duration::from_secs(30)), None);

        // La ventana cuenta desde el primer uso, no desde el último.
        let almost = t0 + WINDOW - Duration::from_millis(1);
        assert_eq!(m.next_available_key_at(almost), None);
        assert_eq!(m.next_available_key_at(t0 + WINDOW), Some("a".to_string()));
    }

    #[test]
    fn selection_starts_from_last_used_key() {
        let m = manager(&["a", "b", "c"], 1);
        let t0 = Instant::now();
        assert_eq!(m.acquire_at(t0).as_deref(), Some("a"));
        assert_eq!(m.acquire_at(t0).as_deref(), Some("b"));

        // "a" se libera, pero el recorrido sigue desde "b".
        let later = t0 + WINDOW;
        assert_eq!(m.next_available_key_at(later).as_deref(), Some("b"));
    }

    #[test]
    fn exhaustion_reports_shortest_wait() {
        let m = manager(&["a", "b"], 1);
        let t0 = Instant::now();
        m.track_usage_at("a", t0);
        m.track_usage_at("b", t0 + Duration::from_secs(20));

        let now = t0 + Duration::from_secs(30);
        assert_eq!(m.next_available_key_at(now), None);
        assert_eq!(m.time_until_available_at(now), Duration::from_secs(30));
        assert!(m.time_until_available_at(now) > Duration::ZERO);
    }

    #[test]
    fn wait_is_zero_when_any_key_is_free() {
        let m = manager(&["a", "b"], 1);
        let t0 = Instant::now();
        m.track_usage_at("a", t0);
        assert_eq!(m.time_until_available_at(t0), Duration::ZERO);
        assert_eq!(manager(&[], 5).time_until_available_at(t0), Duration::ZERO);
    }

    #[test]
    fn provider_throttle_exhausts_the_key() {
        let m = manager(&["a", "b"], 10);
        let t0 = Instant::now();
        assert_eq!(m.acquire_at(t0).as_deref(), Some("a"));
        m.mark_throttled_at("a", t0);
        assert_eq!(m.acquire_at(t0).as_deref(), Some("b"));
        assert_eq!(m.next_available_key_at(t0 + WINDOW).as_deref(), Some("b"));
    }

    #[test]
    fn snapshot_reports_states_with_masked_keys() {
        let m = manager(&["secret-key-1234", "other-key-9999"], 1);
        let t0 = Instant::now();
        m.track_usage_at("secret-key-1234", t0);
        let snapshot = m.snapshot_at(t0);
        assert_eq!(snapshot[0].key, "****1234");
        assert_eq!(snapshot[0].status, KeyStatus::Throttled);
        assert_eq!(snapshot[0].seconds_until_reset, 60);
        assert_eq!(snapshot[1].status, KeyStatus::Unused);
    }

    #[test]
    fn peek_leaves_rotation_untouched() {
        let m = manager(&["a", "b"], 1);
        let t0 = Instant::now();
        assert_eq!(m.acquire_at(t0).as_deref(), Some("a"));

        assert_eq!(m.peek_available_key_at(t0).as_deref(), Some("b"));
        assert_eq!(m.peek_available_key_at(t0).as_deref(), Some("b"));
        assert_eq!(m.snapshot_at(t0)[1].status, KeyStatus::Unused);

        // El índice sigue en "a": al expirar su ventana vuelve a ser la elegida.
        assert_eq!(m.acquire_at(t0 + WINDOW).as_deref(), Some("a"));
    }

    #[test]
    fn peek_ignores_expired_windows_without_resetting_them() {
        let m = manager(&["a"], 1);
        let t0 = Instant::now();
        m.track_usage_at("a", t0);
        assert_eq!(m.peek_available_key_at(t0), None);
        assert_eq!(m.peek_available_key_at(t0 + WINDOW).as_deref(), Some("a"));
        assert_eq!(m.snapshot_at(t0)[0].requests_in_window, 1);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let m = manager(&["a"], 1);
        m.track_usage("zzz");
        assert_eq!(m.next_available_key().as_deref(), Some("a"));
    }

    #[test]
    fn mask_hides_short_keys() {
        assert_eq!(mask_key("abc"), "****");
    }
}
