//! MongoDB remote store integration

use async_trait::async_trait;
use bson::{doc, Bson, DateTime, Document};
use mongodb::options::UpdateOptions;
use mongodb::Collection;
use time::format_description::well_known;
use time::OffsetDateTime;

use super::{LocationStore, PersistedLocationRecord};
use crate::error::StoreError;
use crate::SubjectRole;

/// Remote store, one live document per subject
///
/// Documents keep the coordinates as `[lng, lat]`.
pub struct MongoStore {
    collection: Collection<Document>,
}

impl MongoStore {
    pub fn new(collection: Collection<Document>) -> Self {
        Self { collection }
    }
}

fn subject_filter(role: SubjectRole, subject_id: &str) -> Document {
    doc! {
        "role": role.as_str(),
        "subject_id": subject_id,
    }
}

fn to_doc(record: &PersistedLocationRecord) -> Document {
    doc! {
        "subject_id": record.subject_id.clone(),
        "role": record.role.as_str(),
        "coordinates": [record.longitude, record.latitude],
        "accuracy": record.accuracy,
        "speed": record.speed,
        "heading": record.heading,
        "captured_at": DateTime::from_time_0_3(record.captured_at),
        "online": record.online,
    }
}

fn optional_f64(doc: &Document, field: &str) -> Option<f64> {
    match doc.get(field) {
        Some(Bson::Double(v)) => Some(*v),
        Some(Bson::Int32(v)) => Some(*v as f64),
        Some(Bson::Int64(v)) => Some(*v as f64),
        _ => None,
    }
}

fn parse_doc(doc: &Document) -> Result<PersistedLocationRecord, String> {
    let subject_id = match doc.get("subject_id") {
        Some(Bson::String(s)) => Ok(s.clone()),
        Some(Bson::Int32(s)) => Ok(s.to_string()),
        Some(Bson::Int64(s)) => Ok(s.to_string()),
        Some(_) => Err("Subject field type not supported".to_string()),
        None => Err("Subject field not found".to_string()),
    }?;

    let role = doc
        .get_str("role")
        .map_err(|e| format!("Failed on access the `role`: {}", e))?
        .parse::<SubjectRole>()?;

    let coordinates = doc
        .get_array("coordinates")
        .map_err(|e| format!("Failed on access the `coordinates`: {}", e))?;
    if coordinates.len() != 2 {
        return Err("Coordinates size invalid".to_string());
    }
    let longitude = match coordinates[0] {
        Bson::Double(l) => Ok(l),
        _ => Err("Invalid type of longitude".to_string()),
    }?;
    let latitude = match coordinates[1] {
        Bson::Double(l) => Ok(l),
        _ => Err("Invalid type of latitude".to_string()),
    }?;

    let captured_at = match doc.get("captured_at") {
        Some(Bson::DateTime(tm)) => Ok(tm.to_time_0_3()),
        Some(Bson::String(tm)) => OffsetDateTime::parse(tm, &well_known::Rfc3339)
            .map_err(|e| format!("Failed on parse the time: {}", e)),
        Some(Bson::Timestamp(tm)) => OffsetDateTime::from_unix_timestamp(tm.time.into())
            .map_err(|e| format!("Failed on parse the time timestamp: {}", e)),
        Some(_) => Err("Time field type not supported".to_string()),
        None => Err("Time field not found".to_string()),
    }?;

    let online = doc.get_bool("online").unwrap_or(true);

    Ok(PersistedLocationRecord {
        subject_id,
        role,
        latitude,
        longitude,
        accuracy: optional_f64(doc, "accuracy"),
        speed: optional_f64(doc, "speed"),
        heading: optional_f64(doc, "heading"),
        captured_at,
        online,
    })
}

#[async_trait]
impl LocationStore for MongoStore {
    async fn upsert_latest(&self, record: &PersistedLocationRecord) -> Result<(), StoreError> {
        let options = UpdateOptions::builder().upsert(true).build();

        self.collection
            .update_one(
                subject_filter(record.role, &record.subject_id),
                doc! { "$set": to_doc(record) },
                options,
            )
            .await?;

        Ok(())
    }

    async fn last_known(
        &self,
        role: SubjectRole,
        subject_id: &str,
    ) -> Result<Option<PersistedLocationRecord>, StoreError> {
        let found = self
            .collection
            .find_one(subject_filter(role, subject_id), None)
            .await?;

        match found {
            Some(doc) => parse_doc(&doc).map(Some).map_err(StoreError::Malformed),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
pub mod tests {
    use bson::{doc, Document};
    use mongodb::Client;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn doc_round_trip() -> Result<(), String> {
        let mut record = PersistedLocationRecord::manual("AA251", SubjectRole::Driver, 36.75, 3.05);
        record.accuracy = Some(12.5);
        record.captured_at = datetime!(2024-03-01 8:00 UTC);

        let parsed = parse_doc(&to_doc(&record))?;
        assert_eq!(record, parsed);

        Ok(())
    }

    #[test]
    fn parse_others_fields_types() -> Result<(), String> {
        let doc = doc! {
            "subject_id": 251,
            "role": "passenger",
            "coordinates": [3.05, 36.75],
            "accuracy": 20,
            "captured_at": "2024-03-01T08:00:00Z",
        };

        let parsed = parse_doc(&doc)?;
        assert_eq!("251", parsed.subject_id);
        assert_eq!(SubjectRole::Passenger, parsed.role);
        assert_eq!(36.75, parsed.latitude);
        assert_eq!(3.05, parsed.longitude);
        assert_eq!(Some(20.0), parsed.accuracy);
        assert_eq!(None, parsed.speed);
        assert!(parsed.online);

        let doc = doc! { "subject_id": "x", "role": "driver", "coordinates": [3.05], "captured_at": "2024-03-01T08:00:00Z" };
        assert!(parse_doc(&doc).is_err());

        Ok(())
    }

    #[tokio::test]
    #[ignore = "needs a mongodb server on localhost:27017"]
    async fn mongo_upsert() -> Result<(), String> {
        let client = Client::with_uri_str("mongodb://localhost:27017")
            .await
            .map_err(|e| e.to_string())?;
        let db = client.database("ridetrack_tests");
        let collection = db.collection::<Document>("locations");
        collection.drop(None).await.map_err(|e| e.to_string())?;

        let store = MongoStore::new(collection.clone());

        store
            .upsert_latest(&PersistedLocationRecord::manual("AA251", SubjectRole::Driver, 36.1, 3.05))
            .await
            .map_err(|e| e.to_string())?;
        store
            .upsert_latest(&PersistedLocationRecord::manual("AA251", SubjectRole::Driver, 36.2, 3.05))
            .await
            .map_err(|e| e.to_string())?;

        let count = collection
            .count_documents(None, None)
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(1, count);

        let last = store
            .last_known(SubjectRole::Driver, "AA251")
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(Some(36.2), last.map(|r| r.latitude));

        let none = store
            .last_known(SubjectRole::Passenger, "AA251")
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(None, none);

        Ok(())
    }
}
