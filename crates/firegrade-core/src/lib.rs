use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bench;
pub mod config_file;
pub mod dimension;
pub mod doc_type;
pub mod matching;
pub mod pool;
pub mod schema;
pub mod scorer;

// Re-export for convenience
pub use bench::{BenchOptions, BenchOutcome, ParserSummary, ReplayParser, run_benchmark};
pub use doc_type::{DocumentType, EffectiveConfig, OverrideError, Overrides};
pub use pool::{BenchEvent, BenchPool, ParserBackend, ParserError, UnitReport};
pub use schema::{Violation, load_ground_truth, load_parser_output};
pub use scorer::{FailureReason, Grade, ScoreReport};

/// Kind of physical fire-piping component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Pipe,
    Fitting,
    Valve,
    Sprinkler,
    Hose,
    Connection,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EntityType::Pipe => "pipe",
            EntityType::Fitting => "fitting",
            EntityType::Valve => "valve",
            EntityType::Sprinkler => "sprinkler",
            EntityType::Hose => "hose",
            EntityType::Connection => "connection",
        };
        f.write_str(s)
    }
}

/// Pipe schedule designation. Serialized as a string (`"40"`, `"STD"`) but
/// accepted as either a JSON string or number, since hand-authored ground
/// truth files use both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Schedule {
    Sch10,
    Sch20,
    Sch30,
    Sch40,
    Sch80,
    Sch120,
    Sch160,
    Std,
    Xs,
    Xxs,
}

impl Schedule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Schedule::Sch10 => "10",
            Schedule::Sch20 => "20",
            Schedule::Sch30 => "30",
            Schedule::Sch40 => "40",
            Schedule::Sch80 => "80",
            Schedule::Sch120 => "120",
            Schedule::Sch160 => "160",
            Schedule::Std => "STD",
            Schedule::Xs => "XS",
            Schedule::Xxs => "XXS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "10" => Some(Schedule::Sch10),
            "20" => Some(Schedule::Sch20),
            "30" => Some(Schedule::Sch30),
            "40" => Some(Schedule::Sch40),
            "80" => Some(Schedule::Sch80),
            "120" => Some(Schedule::Sch120),
            "160" => Some(Schedule::Sch160),
            "STD" => Some(Schedule::Std),
            "XS" => Some(Schedule::Xs),
            "XXS" => Some(Schedule::Xxs),
            _ => None,
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Schedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Schedule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ScheduleVisitor;

        impl Visitor<'_> for ScheduleVisitor {
            type Value = Schedule;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a pipe schedule (10, 20, 30, 40, 80, 120, 160, STD, XS, XXS)")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Schedule, E> {
                Schedule::parse(v)
                    .ok_or_else(|| E::custom(format!("unknown pipe schedule: {v:?}")))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Schedule, E> {
                Schedule::parse(&v.to_string())
                    .ok_or_else(|| E::custom(format!("unknown pipe schedule: {v}")))
            }
        }

        deserializer.deserialize_any(ScheduleVisitor)
    }
}

/// Nominal diameter: either plain inches or a dimension string like
/// `"4-1/2\""`. Canonicalization to inches lives in [`dimension`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Diameter {
    Inches(f64),
    Text(String),
}

/// One physical fire-piping component extracted from a document.
///
/// Entities are immutable facts: read from ground truth or produced by a
/// parser run, never mutated. Comparison always operates on two independent
/// snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub material: String,
    pub diameter: Diameter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    pub location_page: u32,
}

/// A contiguous document section identified by a page range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Chunk {
    pub title: String,
    pub start_page: u32,
    pub end_page: u32,
}

impl Chunk {
    /// Inclusive page count of this section.
    pub fn page_count(&self) -> u32 {
        self.end_page.saturating_sub(self.start_page) + 1
    }
}

/// Provenance metadata carried in a `.fire.json` ground truth file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthMetadata {
    pub pdf_name: String,
    pub pdf_size_mb: f64,
    pub total_pages: u32,
    pub generation_date: String,
    pub parser_version: String,
    #[serde(default)]
    pub manual_validation: bool,
    #[serde(default)]
    pub notes: String,
}

/// Reference performance numbers recorded when the ground truth was
/// generated. Authoritative for baseline comparison; never re-derived at
/// scoring time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthStats {
    pub total_chunks: usize,
    pub total_entities: usize,
    pub parse_time_seconds: f64,
    pub throughput_mb_per_sec: f64,
}

/// Complete ground truth record for one PDF (`<stem>.fire.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruth {
    pub metadata: GroundTruthMetadata,
    pub chunks: Vec<Chunk>,
    pub entities: Vec<Entity>,
    pub stats: GroundTruthStats,
}

/// What an external parser returns for one PDF.
///
/// `entities` is absent for parsers that only chunk; the matcher treats that
/// the same as an empty list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParserOutput {
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<Entity>>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub metadata: serde_json::Value,
}

impl ParserOutput {
    /// Entities as a slice, treating "parser doesn't do entities" as empty.
    pub fn entities(&self) -> &[Entity] {
        self.entities.as_deref().unwrap_or(&[])
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("schema violation: {0}")]
    Schema(String),
    #[error("invalid override: {0}")]
    Override(#[from] OverrideError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_accepts_number_and_string() {
        let from_num: Schedule = serde_json::from_str("40").unwrap();
        let from_str: Schedule = serde_json::from_str("\"40\"").unwrap();
        assert_eq!(from_num, Schedule::Sch40);
        assert_eq!(from_str, Schedule::Sch40);

        let std: Schedule = serde_json::from_str("\"STD\"").unwrap();
        assert_eq!(std, Schedule::Std);
    }

    #[test]
    fn schedule_rejects_unknown() {
        assert!(serde_json::from_str::<Schedule>("\"55\"").is_err());
        assert!(serde_json::from_str::<Schedule>("15").is_err());
    }

    #[test]
    fn schedule_serializes_as_string() {
        assert_eq!(serde_json::to_string(&Schedule::Sch80).unwrap(), "\"80\"");
        assert_eq!(serde_json::to_string(&Schedule::Xxs).unwrap(), "\"XXS\"");
    }

    #[test]
    fn entity_rejects_undeclared_fields() {
        let json = r#"{
            "id": "e1",
            "type": "pipe",
            "material": "galvanized steel",
            "diameter": 2.0,
            "location_page": 3,
            "color": "red"
        }"#;
        assert!(serde_json::from_str::<Entity>(json).is_err());
    }

    #[test]
    fn entity_schedule_optional() {
        let json = r#"{
            "id": "e1",
            "type": "valve",
            "material": "brass",
            "diameter": "1-1/2\"",
            "location_page": 7
        }"#;
        let e: Entity = serde_json::from_str(json).unwrap();
        assert_eq!(e.entity_type, EntityType::Valve);
        assert!(e.schedule.is_none());
        assert_eq!(e.diameter, Diameter::Text("1-1/2\"".to_string()));
    }

    #[test]
    fn diameter_untagged_forms() {
        let n: Diameter = serde_json::from_str("2.5").unwrap();
        assert_eq!(n, Diameter::Inches(2.5));
        let t: Diameter = serde_json::from_str("\"2\\\"\"").unwrap();
        assert_eq!(t, Diameter::Text("2\"".to_string()));
    }

    #[test]
    fn chunk_page_count_inclusive() {
        let c = Chunk {
            title: "A".into(),
            start_page: 1,
            end_page: 5,
        };
        assert_eq!(c.page_count(), 5);
    }

    #[test]
    fn parser_output_entities_default_empty() {
        let out: ParserOutput = serde_json::from_str(r#"{"chunks": []}"#).unwrap();
        assert!(out.entities.is_none());
        assert!(out.entities().is_empty());
    }
}
