use common::{PlayerError, Result};
use std::time::Duration;

/// 恢复尝试间隔（固定，不做指数退避）
pub const DEFAULT_RECOVERY_DELAY: Duration = Duration::from_secs(5);
/// 恢复尝试上限
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 30;
/// 状态广播通道容量
pub const DEFAULT_STATUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub recovery_delay: Duration,
    pub max_recovery_attempts: u32,
    pub status_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            recovery_delay: DEFAULT_RECOVERY_DELAY,
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
            status_capacity: DEFAULT_STATUS_CAPACITY,
        }
    }
}

impl ControllerSettings {
    /// 从环境变量加载，未设置的项使用默认值
    ///
    /// - `PLAYER_RECOVERY_DELAY_MS`
    /// - `PLAYER_MAX_RECOVERY_ATTEMPTS`
    /// - `PLAYER_STATUS_CAPACITY`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "PLAYER_RECOVERY_DELAY_MS")? {
            settings.recovery_delay = Duration::from_millis(ms);
        }
        if let Some(max) = parse_var::<u32, _>(&lookup, "PLAYER_MAX_RECOVERY_ATTEMPTS")? {
            settings.max_recovery_attempts = max;
        }
        if let Some(capacity) = parse_var::<usize, _>(&lookup, "PLAYER_STATUS_CAPACITY")? {
            if capacity == 0 {
                return Err(PlayerError::InvalidParameter(
                    "PLAYER_STATUS_CAPACITY must be greater than 0".to_string(),
                ));
            }
            settings.status_capacity = capacity;
        }

        Ok(settings)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| PlayerError::InvalidParameter(format!("{}={}", key, raw))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_fixed_policy() {
        let settings = ControllerSettings::default();
        assert_eq!(settings.recovery_delay, Duration::from_secs(5));
        assert_eq!(settings.max_recovery_attempts, 30);
    }

    #[test]
    fn test_overrides_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("PLAYER_RECOVERY_DELAY_MS", "250"),
            ("PLAYER_MAX_RECOVERY_ATTEMPTS", "3"),
        ]
        .into_iter()
        .collect();

        let settings =
            ControllerSettings::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(settings.recovery_delay, Duration::from_millis(250));
        assert_eq!(settings.max_recovery_attempts, 3);
        assert_eq!(settings.status_capacity, DEFAULT_STATUS_CAPACITY);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = ControllerSettings::from_lookup(|k| {
            (k == "PLAYER_MAX_RECOVERY_ATTEMPTS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(PlayerError::InvalidParameter(_))));

        let result =
            ControllerSettings::from_lookup(|k| (k == "PLAYER_STATUS_CAPACITY").then(|| "0".to_string()));
        assert!(result.is_err());
    }
}
