use serde::{Deserialize, Serialize};

/// Stream value that marks a subject as shared by every student.
pub const COMMON_STREAM: &str = "Common";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub stream: String,
}

impl Subject {
    pub fn is_common(&self) -> bool {
        self.stream == COMMON_STREAM
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedSubject {
    #[serde(flatten)]
    pub subject: Subject,
    pub is_common: bool,
}

pub fn classify_subjects(subjects: &[Subject]) -> Vec<ClassifiedSubject> {
    subjects
        .iter()
        .map(|s| ClassifiedSubject {
            subject: s.clone(),
            is_common: s.is_common(),
        })
        .collect()
}
