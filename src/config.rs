use std::env;

use chrono::{FixedOffset, NaiveDate, Utc};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub db_max_connections: u32,
    pub clinic_utc_offset_minutes: i32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = env::var("SESSION_TTL_HOURS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(24);
        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(10);
        let clinic_utc_offset_minutes = env::var("CLINIC_UTC_OFFSET_MINUTES")
            .ok()
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(0);

        // fail at startup rather than on the first "today" lookup
        clinic_offset(clinic_utc_offset_minutes)?;

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            db_max_connections,
            clinic_utc_offset_minutes,
        })
    }
}

pub fn clinic_offset(minutes: i32) -> anyhow::Result<FixedOffset> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| anyhow::anyhow!("CLINIC_UTC_OFFSET_MINUTES out of range: {minutes}"))
}

/// Calendar date at the clinic for the given offset.
pub fn clinic_today(offset: FixedOffset) -> NaiveDate {
    Utc::now().with_timezone(&offset).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_bounds() {
        assert!(clinic_offset(420).is_ok());
        assert!(clinic_offset(-300).is_ok());
        assert!(clinic_offset(24 * 60).is_err());
    }

    #[test]
    fn huge_offset_is_an_error_not_a_panic() {
        assert!(clinic_offset(i32::MAX).is_err());
        assert!(clinic_offset(i32::MIN).is_err());
        assert!(clinic_offset(35_791_395).is_err());
    }

    #[test]
    fn today_is_within_a_day_of_utc() {
        let utc = Utc::now().date_naive();
        let east = clinic_today(clinic_offset(14 * 60).unwrap());
        let west = clinic_today(clinic_offset(-12 * 60).unwrap());
        assert!((east - utc).num_days().abs() <= 1);
        assert!((west - utc).num_days().abs() <= 1);
    }
}
