//! Randomized record generation.
//!
//! Each worker owns its own [`RecordGenerator`]; nothing here is global. Free
//! text (names, words, sentences) comes from `fake`, numeric and enumerated
//! fields are drawn directly from the generator's rng.

use crate::records::{
    Appointment, Doctor, Gender, Medicine, Patient, Prescription, RecordBatch, Specialty,
};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeDelta};
use fake::Fake;
use fake::faker::lorem::en::{Sentence, Word};
use fake::faker::name::en::Name;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

pub struct RecordGenerator {
    rng: StdRng,
}

impl RecordGenerator {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Reproducible generator; same seed, same sequence of records
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Mutable access to the underlying rng, shared with pacing
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn generate_patient(&mut self) -> Patient {
        Patient {
            patient_id: self.uuid(),
            name: Name().fake_with_rng(&mut self.rng),
            age: self.rng.random_range(1..=100),
            gender: Gender::ALL[self.rng.random_range(0..Gender::ALL.len())],
        }
    }

    pub fn generate_doctor(&mut self) -> Doctor {
        Doctor {
            doctor_id: self.uuid(),
            name: Name().fake_with_rng(&mut self.rng),
            specialty: Specialty::ALL[self.rng.random_range(0..Specialty::ALL.len())],
        }
    }

    pub fn generate_medicine(&mut self) -> Medicine {
        let word: String = Word().fake_with_rng(&mut self.rng);
        Medicine {
            medicine_id: self.uuid(),
            name: capitalize(&word),
            dosage: format!("{} times/day", self.rng.random_range(1..=3)),
        }
    }

    pub fn generate_prescription(
        &mut self,
        patient: &Patient,
        doctor: &Doctor,
        medicine: &Medicine,
    ) -> Prescription {
        Prescription {
            prescription_id: self.uuid(),
            patient_id: patient.patient_id,
            doctor_id: doctor.doctor_id,
            medicine_id: medicine.medicine_id,
            notes: Sentence(4..10).fake_with_rng(&mut self.rng),
        }
    }

    pub fn generate_appointment(&mut self, patient: &Patient, doctor: &Doctor) -> Appointment {
        Appointment {
            appointment_id: self.uuid(),
            patient_id: patient.patient_id,
            doctor_id: doctor.doctor_id,
            datetime: self.datetime_this_year(),
        }
    }

    /// One linked cycle of records; no foreign key points outside the batch
    pub fn generate_batch(&mut self) -> RecordBatch {
        let patient = self.generate_patient();
        let doctor = self.generate_doctor();
        let medicine = self.generate_medicine();
        let appointment = self.generate_appointment(&patient, &doctor);
        let prescription = self.generate_prescription(&patient, &doctor, &medicine);
        RecordBatch {
            patient,
            doctor,
            medicine,
            appointment,
            prescription,
        }
    }

    fn uuid(&mut self) -> Uuid {
        uuid::Builder::from_random_bytes(self.rng.random()).into_uuid()
    }

    // Uniform between Jan 1 00:00:00 of the current year and now
    fn datetime_this_year(&mut self) -> NaiveDateTime {
        let now = Local::now().naive_local();
        let start = NaiveDate::from_ymd_opt(now.year(), 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or(now);
        let span = (now - start).num_seconds().max(0);
        let offset = self.rng.random_range(0..=span);
        start + TimeDelta::seconds(offset)
    }
}

impl Default for RecordGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
