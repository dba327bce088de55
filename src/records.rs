//! Hospital domain records and their JSON wire encoding.

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The four fixed streams records are published to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    Patients,
    Appointments,
    Medicines,
    Prescriptions,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::Patients,
        Topic::Appointments,
        Topic::Medicines,
        Topic::Prescriptions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Patients => "patients",
            Topic::Appointments => "appointments",
            Topic::Medicines => "medicines",
            Topic::Prescriptions => "prescriptions",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown topic: {s}"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub const ALL: [Gender; 3] = [Gender::Male, Gender::Female, Gender::Other];
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Specialty {
    Cardiology,
    Dermatology,
    Pediatrics,
    General,
}

impl Specialty {
    pub const ALL: [Specialty; 4] = [
        Specialty::Cardiology,
        Specialty::Dermatology,
        Specialty::Pediatrics,
        Specialty::General,
    ];
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: Uuid,
    pub name: String,
    pub age: u8,
    pub gender: Gender,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    pub doctor_id: Uuid,
    pub name: String,
    pub specialty: Specialty,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Medicine {
    pub medicine_id: Uuid,
    pub name: String,
    /// Free-text frequency, e.g. "2 times/day"
    pub dosage: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    pub prescription_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub medicine_id: Uuid,
    pub notes: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    #[serde(with = "plain_datetime")]
    pub datetime: NaiveDateTime,
}

/// One generation cycle: a patient, doctor and medicine plus the two records
/// linking them.
#[derive(Clone, Debug)]
pub struct RecordBatch {
    pub patient: Patient,
    pub doctor: Doctor,
    pub medicine: Medicine,
    pub appointment: Appointment,
    pub prescription: Prescription,
}

impl RecordBatch {
    /// Encode the published records in publish order: patient, appointment,
    /// medicine, prescription. The doctor is never published on its own.
    pub fn publications(&self) -> Result<[(Topic, Bytes); 4]> {
        Ok([
            (Topic::Patients, encode(&self.patient)?),
            (Topic::Appointments, encode(&self.appointment)?),
            (Topic::Medicines, encode(&self.medicine)?),
            (Topic::Prescriptions, encode(&self.prescription)?),
        ])
    }
}

/// Serialize a record to UTF-8 JSON bytes
pub fn encode<T: Serialize>(record: &T) -> Result<Bytes> {
    let json = serde_json::to_vec(record).context("encode record as json")?;
    Ok(Bytes::from(json))
}

/// Deserialize a record from UTF-8 JSON bytes
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).context("decode json payload")
}

// "YYYY-MM-DD HH:MM:SS", no timezone
mod plain_datetime {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(dt: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&dt.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}
