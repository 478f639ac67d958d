use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{error::DomainError, lesson::LessonDescriptor};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LessonFormat {
    Json,
    Yaml,
}

impl LessonFormat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        match path.as_ref().extension()?.to_str()? {
            "json" => Some(LessonFormat::Json),
            "yaml" | "yml" => Some(LessonFormat::Yaml),
            _ => None,
        }
    }
}

pub trait LessonCodec {
    fn decode(&self, bytes: &[u8], format: LessonFormat) -> Result<LessonDescriptor, DomainError>;
    fn encode(
        &self,
        lesson: &LessonDescriptor,
        format: LessonFormat,
    ) -> Result<Vec<u8>, DomainError>;
}

pub struct SerdeLessonCodec;

impl LessonCodec for SerdeLessonCodec {
    fn decode(&self, bytes: &[u8], format: LessonFormat) -> Result<LessonDescriptor, DomainError> {
        match format {
            LessonFormat::Json => serde_json::from_slice(bytes)
                .map_err(|err| DomainError::Serialization(err.to_string())),
            LessonFormat::Yaml => serde_yaml::from_slice(bytes)
                .map_err(|err| DomainError::Serialization(err.to_string())),
        }
    }

    fn encode(
        &self,
        lesson: &LessonDescriptor,
        format: LessonFormat,
    ) -> Result<Vec<u8>, DomainError> {
        match format {
            LessonFormat::Json => serde_json::to_vec_pretty(lesson)
                .map_err(|err| DomainError::Serialization(err.to_string())),
            LessonFormat::Yaml => serde_yaml::to_string(lesson)
                .map(String::into_bytes)
                .map_err(|err| DomainError::Serialization(err.to_string())),
        }
    }
}
