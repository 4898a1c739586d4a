//! CSV recording replay source

use std::io::Read;
use std::time::Duration;

use async_trait::async_trait;
use csv::{Reader, StringRecord};
use time::format_description::well_known;
use time::OffsetDateTime;
use tracing::debug;

use super::{FieldsConfiguration, PositionOptions, PositionSource, SampleSender, WatchHandle};
use crate::error::AcquisitionError;
use crate::RawSample;

/// Replays recorded readings with their original spacing
pub struct CsvSource {
    samples: Vec<RawSample>,
    speedup: f64,
}

impl CsvSource {
    /// Read every row of the recording up front
    pub fn load<T>(mut rdr: Reader<T>, fields: Option<FieldsConfiguration>) -> Result<Self, String>
    where
        T: Read,
    {
        let fields = fields.unwrap_or_default();
        let mut samples = vec![];

        let mut header = rdr
            .headers()
            .map_err(|e| format!("Failed on read the header: {}", e))?
            .clone();
        let header_idx = parse_header(&fields, &mut header)?;

        for row in rdr.records() {
            let mut rec = row.map_err(|e| format!("Failed on read some row: {}", e))?;

            if rec.len() < 2 {
                continue;
            }

            let sample = match parse_row(&header_idx, &fields, &mut rec) {
                Ok(s) => Ok(s),
                Err(e) => Err(format!("Error with row {:?}: {}", rec, e)),
            }?;

            if let Some(s) = sample {
                samples.push(s);
            }
        }

        samples.sort_by_key(|s| s.captured_at);

        Ok(Self {
            samples,
            speedup: 1.0,
        })
    }

    /// Replay `factor` times faster than recorded
    pub fn speedup(mut self, factor: f64) -> Self {
        self.speedup = if factor.is_finite() && factor > 0.0 {
            factor
        } else {
            1.0
        };

        self
    }

    pub fn samples(&self) -> &[RawSample] {
        &self.samples
    }

    /// Wait before each sample, the first one goes out right away
    fn delays(&self) -> Vec<Duration> {
        let mut previous: Option<OffsetDateTime> = None;

        self.samples
            .iter()
            .map(|s| {
                let gap = match previous {
                    Some(p) => Duration::try_from(s.captured_at - p).unwrap_or_default(),
                    None => Duration::ZERO,
                };
                previous = Some(s.captured_at);

                gap.div_f64(self.speedup)
            })
            .collect()
    }

    /// Wall time the whole replay takes
    pub fn replay_duration(&self) -> Duration {
        self.delays().into_iter().sum()
    }
}

#[async_trait]
impl PositionSource for CsvSource {
    fn watch(
        &self,
        _options: &PositionOptions,
        sink: SampleSender,
    ) -> Result<WatchHandle, AcquisitionError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| AcquisitionError::PositionUnavailable)?;

        let plan: Vec<(Duration, RawSample)> =
            self.delays().into_iter().zip(self.samples.clone()).collect();

        let task = runtime.spawn(async move {
            for (delay, sample) in plan {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if sink.send(Ok(sample)).is_err() {
                    break;
                }
            }
            debug!("csv replay finished");
        });

        Ok(WatchHandle::new(move || task.abort()))
    }

    async fn get_once(&self, _options: &PositionOptions) -> Result<RawSample, AcquisitionError> {
        self.samples
            .first()
            .cloned()
            .ok_or(AcquisitionError::PositionUnavailable)
    }
}

/// Field to index map
#[derive(Debug)]
struct FieldsIndex {
    coordinates: usize,
    time: usize,
    accuracy: Option<usize>,
    speed: Option<usize>,
    heading: Option<usize>,
}

fn parse_header(
    fields: &FieldsConfiguration,
    header: &mut StringRecord,
) -> Result<FieldsIndex, String> {
    header.trim();

    let find = |name: &str| header.iter().position(|h| h.to_lowercase() == name);

    let coordinates = match find(&fields.coordinates) {
        Some(p) => Ok(p),
        None => Err("Coordinates header not found"),
    }?;

    let time = match find(&fields.time) {
        Some(p) => Ok(p),
        None => Err("Time header not found"),
    }?;

    Ok(FieldsIndex {
        coordinates,
        time,
        accuracy: find(&fields.accuracy),
        speed: find(&fields.speed),
        heading: find(&fields.heading),
    })
}

fn optional_number(row: &StringRecord, idx: Option<usize>) -> Option<f64> {
    idx.and_then(|i| row.get(i)).and_then(|d| d.parse::<f64>().ok())
}

fn parse_row(
    header: &FieldsIndex,
    fields: &FieldsConfiguration,
    row: &mut StringRecord,
) -> Result<Option<RawSample>, String> {
    row.trim();

    let raw_coordinates = match row.get(header.coordinates) {
        Some(d) => Ok(d.to_string()),
        None => Err("Coordinates field not found"),
    }?;
    let separator = match raw_coordinates.as_str() {
        s if s.contains(',') => ",",
        s if s.contains(';') => ";",
        _ => " ",
    };
    let scoordinates: Vec<&str> = raw_coordinates.split(separator).map(|s| s.trim()).collect();
    if scoordinates.len() != 2 {
        return Ok(None);
    }

    let (ilat, ilng) = if fields.flip_coordinates { (0, 1) } else { (1, 0) };

    // NaN and friends still reach the sample filter, text is skipped here
    let (lat, lng) = match (
        scoordinates[ilat].parse::<f64>(),
        scoordinates[ilng].parse::<f64>(),
    ) {
        (Ok(lat), Ok(lng)) => (lat, lng),
        _ => {
            debug!(coordinates = %raw_coordinates, "unreadable coordinates, row skipped");
            return Ok(None);
        }
    };

    let captured_at = match row.get(header.time) {
        Some(d) => OffsetDateTime::parse(d, &well_known::Rfc3339)
            .map_err(|e| format!("Failed on parse the time: {}", e)),
        None => Err("Time field not found".to_string()),
    }?;

    let mut sample = RawSample::basic(lat, lng, captured_at);
    sample.accuracy = optional_number(row, header.accuracy);
    sample.speed = optional_number(row, header.speed);
    sample.heading = optional_number(row, header.heading);

    Ok(Some(sample))
}

#[cfg(test)]
pub mod tests {
    use std::time::Duration;

    use csv::ReaderBuilder;
    use time::macros::datetime;
    use tokio::sync::mpsc;

    use super::*;

    fn source(data: &str, fields: Option<FieldsConfiguration>) -> Result<CsvSource, String> {
        let rdr = ReaderBuilder::new()
            .flexible(true)
            .from_reader(data.as_bytes());

        CsvSource::load(rdr, fields)
    }

    #[test]
    fn load() -> Result<(), String> {
        let data = "\n
            time,coordinates\n
            2024-03-01T08:00:02.000+00:00,\"3.0588, 36.7538\"\n
            2024-03-01T08:00:00.000+00:00,\"3.0589 36.7539\"\n
            2024-03-01T08:00:04.000+00:00,\"3.0590;36.7540\"\n
        ";

        let source = source(data, None)?;
        let samples = source.samples();
        assert_eq!(3, samples.len());

        // sorted by capture time
        assert_eq!(36.7539, samples[0].latitude);
        assert_eq!(3.0589, samples[0].longitude);
        assert_eq!(datetime!(2024-03-01 8:00 UTC), samples[0].captured_at);
        assert_eq!(36.7538, samples[1].latitude);
        assert_eq!(36.754, samples[2].latitude);
        assert_eq!(None, samples[0].accuracy);

        assert_eq!(Duration::from_secs(4), source.replay_duration());

        Ok(())
    }

    #[test]
    fn extra_fields() -> Result<(), String> {
        let data = "\n
            time,coords,accuracy,speed,heading\n
            2024-03-01T08:00:00.000+00:00,\"36.7538,3.0588\",12.5,8.1,270\n
            2024-03-01T08:00:01.000+00:00,\"36.7539,3.0589\",,,\n
        ";

        let fields = FieldsConfiguration::default()
            .coordinates("Coords")
            .flip_coordinates();
        let source = source(data, Some(fields))?;
        let samples = source.samples();
        assert_eq!(2, samples.len());
        assert_eq!(36.7538, samples[0].latitude);
        assert_eq!(3.0588, samples[0].longitude);
        assert_eq!(Some(12.5), samples[0].accuracy);
        assert_eq!(Some(8.1), samples[0].speed);
        assert_eq!(Some(270.0), samples[0].heading);
        assert_eq!(None, samples[1].accuracy);

        Ok(())
    }

    #[test]
    fn skip_rows_without_coordinates() -> Result<(), String> {
        let data = "\n
            time,coordinates\n
            2024-03-01T08:00:00.000+00:00,\"3.0588,36.7538\"\n
            2024-03-01T08:00:01.000+00:00,\n
        ";

        assert_eq!(1, source(data, None)?.samples().len());

        Ok(())
    }

    #[test]
    fn skip_unreadable_coordinates() -> Result<(), String> {
        let data = "\n
            time,coordinates\n
            2024-03-01T08:00:00.000+00:00,\"3.0588,36.7538\"\n
            2024-03-01T08:00:01.000+00:00,\"east,north\"\n
            2024-03-01T08:00:02.000+00:00,\"3.0590,NaN\"\n
        ";

        let source = source(data, None)?;
        let samples = source.samples();
        assert_eq!(2, samples.len());
        assert_eq!(36.7538, samples[0].latitude);
        // left for the sample filter
        assert!(samples[1].latitude.is_nan());

        Ok(())
    }

    #[test]
    fn missing_header() {
        let data = "\nposition,time\n2024-03-01T08:00:00Z,\"3.0588,36.7538\"\n";

        assert!(source(data, None).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn replay_paced() -> Result<(), String> {
        let data = "\n
            time,coordinates\n
            2024-03-01T08:00:00.000+00:00,\"3.0588,36.7538\"\n
            2024-03-01T08:00:10.000+00:00,\"3.0589,36.7539\"\n
        ";
        let source = source(data, None)?.speedup(10.0);
        assert_eq!(Duration::from_secs(1), source.replay_duration());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = source
            .watch(&PositionOptions::default(), tx)
            .map_err(|e| e.to_string())?;

        let start = tokio::time::Instant::now();
        assert!(matches!(rx.recv().await, Some(Ok(_))));
        assert!(matches!(rx.recv().await, Some(Ok(_))));
        assert!(start.elapsed() >= Duration::from_secs(1));

        // replay done, sender dropped
        assert!(rx.recv().await.is_none());

        Ok(())
    }
}
