//! GPX export of recorded trails

use gpx::{Gpx, GpxVersion, Track, TrackSegment, Waypoint};

use crate::storage::PersistedLocationRecord;
use crate::SubjectRole;

pub struct TrailExporter {
    pub subject_id: String,
    pub role: SubjectRole,
    /// Longest gap, in minutes, inside one segment
    pub max_gap_minutes: u8,
}

impl TrailExporter {
    pub fn new(subject_id: &str, role: SubjectRole) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            role,
            max_gap_minutes: 5,
        }
    }

    pub fn max_gap(&mut self, minutes: u8) -> &mut Self {
        self.max_gap_minutes = if minutes < 1 { 1 } else { minutes };

        self
    }

    /// One track, split wherever the feed paused longer than the max gap
    pub fn build(&self, records: &[PersistedLocationRecord]) -> Result<Track, String> {
        let mut track = Track::new();
        track.name = Some(self.subject_id.clone());
        track.description = Some(format!("Tracked {} `{}`", self.role, self.subject_id));
        track.source = Some("ridetrack".to_string());

        let mut points: Vec<&PersistedLocationRecord> = records
            .iter()
            .filter(|r| r.online && r.subject_id == self.subject_id && r.role == self.role)
            .collect();
        points.sort_by_key(|r| r.captured_at);

        let max_gap = time::Duration::minutes(self.max_gap_minutes.into());
        let mut segment = TrackSegment::new();
        let mut previous = None;

        for rec in points {
            if let Some(p) = previous {
                if rec.captured_at - p > max_gap && !segment.points.is_empty() {
                    track.segments.push(segment);
                    segment = TrackSegment::new();
                }
            }
            previous = Some(rec.captured_at);

            let mut wp = Waypoint::new(rec.point());
            wp.time = Some(rec.captured_at.into());
            wp.speed = rec.speed;

            segment.points.push(wp);
        }

        if !segment.points.is_empty() {
            track.segments.push(segment);
        }

        Ok(track)
    }
}

/// Wrap tracks in a GPX 1.1 document
pub fn generate(tracks: Vec<Track>) -> Gpx {
    let mut gpx: Gpx = Default::default();
    gpx.version = GpxVersion::Gpx11;
    gpx.creator = Some("ridetrack".to_string());
    gpx.tracks = tracks;

    gpx
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;
    use time::OffsetDateTime;

    use super::*;

    fn record(lat: f64, at: OffsetDateTime) -> PersistedLocationRecord {
        let mut r = PersistedLocationRecord::manual("AA251", SubjectRole::Driver, lat, 3.05);
        r.captured_at = at;
        r
    }

    #[test]
    fn simple_trail() -> Result<(), String> {
        let r1 = record(36.75, datetime!(2024-03-01 8:00 UTC));
        let r2 = record(36.751, datetime!(2024-03-01 8:01 UTC));
        let r3 = record(36.752, datetime!(2024-03-01 8:02 UTC));

        let track = TrailExporter::new("AA251", SubjectRole::Driver).build(&[r3.clone(), r1.clone(), r2.clone()])?;
        assert_eq!(Some("AA251".to_string()), track.name);
        assert_eq!(Some("Tracked driver `AA251`".to_string()), track.description);
        assert_eq!(1, track.segments.len());

        let segment = &track.segments[0];
        assert_eq!(3, segment.points.len());
        assert_eq!(r1.point(), segment.points[0].point());
        assert_eq!(Some(r1.captured_at.into()), segment.points[0].time);
        assert_eq!(r3.point(), segment.points[2].point());

        Ok(())
    }

    #[test]
    fn split_on_gaps() -> Result<(), String> {
        let records = vec![
            record(36.75, datetime!(2024-03-01 8:00 UTC)),
            record(36.751, datetime!(2024-03-01 8:04 UTC)),
            record(36.752, datetime!(2024-03-01 8:20 UTC)),
        ];

        let track = TrailExporter::new("AA251", SubjectRole::Driver).build(&records)?;
        assert_eq!(2, track.segments.len());
        assert_eq!(2, track.segments[0].points.len());
        assert_eq!(1, track.segments[1].points.len());

        let track = TrailExporter::new("AA251", SubjectRole::Driver)
            .max_gap(30)
            .build(&records)?;
        assert_eq!(1, track.segments.len());

        Ok(())
    }

    #[test]
    fn skips_offline_markers_and_strangers() -> Result<(), String> {
        let mut offline = record(36.751, datetime!(2024-03-01 8:01 UTC));
        offline.online = false;
        let mut passenger = record(36.752, datetime!(2024-03-01 8:02 UTC));
        passenger.role = SubjectRole::Passenger;

        let records = vec![record(36.75, datetime!(2024-03-01 8:00 UTC)), offline, passenger];

        let track = TrailExporter::new("AA251", SubjectRole::Driver).build(&records)?;
        assert_eq!(1, track.segments.len());
        assert_eq!(1, track.segments[0].points.len());

        Ok(())
    }

    #[test]
    fn document() {
        let gpx = generate(vec![Track::new()]);
        assert!(matches!(gpx.version, GpxVersion::Gpx11));
        assert_eq!(Some("ridetrack".to_string()), gpx.creator);
        assert_eq!(1, gpx.tracks.len());
    }
}
