use crate::core::timezone::TimezoneLookup;
use crate::types::{FailurePolicy, FeatureRow, LocalizedTime, OpcaError, OpcaResult};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use chrono_tz::Tz;

/// Convert epoch milliseconds (UTC) into `tz`
pub fn to_local_time(utc_timestamp_ms: i64, tz: Tz) -> OpcaResult<DateTime<Tz>> {
    let utc = Utc
        .timestamp_millis_opt(utc_timestamp_ms)
        .single()
        .ok_or_else(|| {
            OpcaError::InvalidRange(format!("timestamp {} ms is out of range", utc_timestamp_ms))
        })?;
    Ok(utc.with_timezone(&tz))
}

/// Fills timezone, local timestamp, year and day-of-year on feature rows.
///
/// Year and day-of-year come from the local calendar, never from UTC.
pub struct TemporalLocalizer<'a, L: TimezoneLookup + ?Sized> {
    lookup: &'a L,
    policy: FailurePolicy,
}

impl<'a, L: TimezoneLookup + ?Sized> TemporalLocalizer<'a, L> {
    pub fn new(lookup: &'a L) -> Self {
        Self {
            lookup,
            policy: FailurePolicy::FailFast,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn localize_row(&self, row: &FeatureRow) -> OpcaResult<LocalizedTime> {
        let centroid = row.geometry.centroid().ok_or_else(|| {
            OpcaError::InvalidGeometry(format!("{} has an empty footprint", row.provenance_id))
        })?;

        let tz = self
            .lookup
            .timezone_at(centroid)
            .ok_or_else(|| OpcaError::TimezoneResolution {
                id: row.provenance_id.clone(),
                lon: centroid.lon,
                lat: centroid.lat,
            })?;

        let local = to_local_time(row.utc_timestamp_ms, tz)?;

        Ok(LocalizedTime {
            timezone: tz.name().to_string(),
            centroid,
            local_timestamp: local.fixed_offset(),
            year: local.year(),
            julian_day: local.ordinal(),
        })
    }

    /// Localize every row. Under `SkipAndContinue` failing rows are logged and
    /// dropped; otherwise the first failure is returned.
    pub fn localize(&self, rows: Vec<FeatureRow>) -> OpcaResult<Vec<FeatureRow>> {
        let total = rows.len();
        let mut out = Vec::with_capacity(total);

        for (index, mut row) in rows.into_iter().enumerate() {
            match self.localize_row(&row) {
                Ok(local) => {
                    log::debug!(
                        "{}: {} day {} of {}",
                        row.provenance_id,
                        local.timezone,
                        local.julian_day,
                        local.year
                    );
                    row.local = Some(local);
                    out.push(row);
                }
                Err(e) => match self.policy {
                    FailurePolicy::FailFast => return Err(e),
                    FailurePolicy::SkipAndContinue => {
                        log::warn!("Row {} skipped: {}", index, e);
                    }
                },
            }
        }

        log::info!("Localized {} of {} row(s)", out.len(), total);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timezone::ZoneBoundaries;
    use crate::types::Geometry;
    use chrono::NaiveDate;

    fn zones() -> ZoneBoundaries {
        ZoneBoundaries::new()
            .with_zone("America/Toronto", Geometry::rectangle(-90.0, 41.0, -74.0, 57.0))
            .unwrap()
            .with_zone("Asia/Tokyo", Geometry::rectangle(129.0, 30.0, 146.0, 46.0))
            .unwrap()
    }

    fn utc_ms(y: i32, m: u32, d: u32, h: u32, min: u32) -> i64 {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis()
    }

    fn row(id: &str, geometry: Geometry, ms: i64) -> FeatureRow {
        FeatureRow {
            geometry,
            provenance_id: id.to_string(),
            path: id.to_string(),
            utc_timestamp_ms: ms,
            local: None,
        }
    }

    #[test]
    fn test_local_day_differs_from_utc_day() {
        // 03:30 UTC on June 15 is still June 14 in Toronto (EDT, UTC-4)
        let r = row("a", Geometry::rectangle(-80.0, 43.0, -79.0, 44.0), utc_ms(2021, 6, 15, 3, 30));
        let local = TemporalLocalizer::new(&zones()).localize_row(&r).unwrap();
        assert_eq!(local.timezone, "America/Toronto");
        assert_eq!(local.year, 2021);
        assert_eq!(local.julian_day, 165);
        assert_eq!(local.local_timestamp.offset().local_minus_utc(), -4 * 3600);
        assert_eq!(local.local_timestamp.timestamp_millis(), r.utc_timestamp_ms);
    }

    #[test]
    fn test_new_year_rollover_uses_local_year() {
        // 16:00 UTC Dec 31 is already Jan 1 in Tokyo
        let r = row("b", Geometry::Point([139.7, 35.7]), utc_ms(2020, 12, 31, 16, 0));
        let local = TemporalLocalizer::new(&zones()).localize_row(&r).unwrap();
        assert_eq!(local.year, 2021);
        assert_eq!(local.julian_day, 1);
    }

    #[test]
    fn test_leap_year_day_366() {
        let r = row("c", Geometry::Point([139.7, 35.7]), utc_ms(2020, 12, 31, 3, 0));
        let local = TemporalLocalizer::new(&zones()).localize_row(&r).unwrap();
        assert_eq!(local.julian_day, 366);
    }

    #[test]
    fn test_unresolvable_point_fails() {
        let rows = vec![
            row("land", Geometry::Point([-79.4, 43.7]), utc_ms(2021, 6, 1, 12, 0)),
            row("ocean", Geometry::Point([-30.0, 0.0]), utc_ms(2021, 6, 1, 12, 0)),
        ];
        let err = TemporalLocalizer::new(&zones()).localize(rows).unwrap_err();
        match err {
            OpcaError::TimezoneResolution { id, .. } => assert_eq!(id, "ocean"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_skip_policy_drops_failed_rows() {
        let rows = vec![
            row("ocean", Geometry::Point([-30.0, 0.0]), utc_ms(2021, 6, 1, 12, 0)),
            row("land", Geometry::Point([-79.4, 43.7]), utc_ms(2021, 6, 1, 12, 0)),
        ];
        let out = TemporalLocalizer::new(&zones())
            .with_policy(FailurePolicy::SkipAndContinue)
            .localize(rows)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].provenance_id, "land");
        assert!(out[0].local.is_some());
    }
}
