use crate::error::GatewayError;
use crate::gateway::SessionPropertyStore;
use serde::Serialize;

pub const STATUS: &str = "visit.status";
pub const VISIT_ID: &str = "visit.id";
pub const INSTITUTION_ID: &str = "visit.institutionId";
pub const INSTITUTION_NAME: &str = "visit.institutionName";
pub const SEQUENCE_NUMBER: &str = "visit.sequenceNumber";
pub const PARTICIPANT_COUNT: &str = "visit.participantCount";
pub const DIRTY: &str = "visit.dirty";
pub const STAGED_NOTES: &str = "staging.notes";
pub const STAGED_EVIDENCE: &str = "staging.evidence";

const VISIT_KEYS: [&str; 7] = [
    STATUS,
    VISIT_ID,
    INSTITUTION_ID,
    INSTITUTION_NAME,
    SEQUENCE_NUMBER,
    PARTICIPANT_COUNT,
    DIRTY,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    NotStarted,
    InProgress,
    Finalized,
}

impl VisitStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Finalized => "finalized",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "not_started" => Some(Self::NotStarted),
            "in_progress" => Some(Self::InProgress),
            "finalized" => Some(Self::Finalized),
            _ => None,
        }
    }
}

/// Values recorded in the session when a visit starts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedVisit {
    pub visit_id: i64,
    pub institution_id: i64,
    pub institution_name: String,
    pub sequence_number: i64,
    pub participant_count: i64,
}

/// Session state of one visit document.
pub struct SessionContext<'a> {
    document_id: String,
    store: &'a dyn SessionPropertyStore,
}

impl<'a> SessionContext<'a> {
    pub fn new(document_id: &str, store: &'a dyn SessionPropertyStore) -> Self {
        Self {
            document_id: document_id.to_string(),
            store,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, GatewayError> {
        self.store.get(&self.document_id, key)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), GatewayError> {
        self.store.set(&self.document_id, key, value)
    }

    pub fn delete(&self, key: &str) -> Result<(), GatewayError> {
        self.store.delete(&self.document_id, key)
    }

    fn get_i64(&self, key: &str) -> Result<Option<i64>, GatewayError> {
        Ok(self.get(key)?.and_then(|v| v.trim().parse().ok()))
    }

    /// Missing or unreadable status means the visit never started here.
    pub fn status(&self) -> Result<VisitStatus, GatewayError> {
        Ok(self
            .get(STATUS)?
            .and_then(|s| VisitStatus::parse(&s))
            .unwrap_or(VisitStatus::NotStarted))
    }

    pub fn set_status(&self, status: VisitStatus) -> Result<(), GatewayError> {
        self.set(STATUS, status.as_str())
    }

    pub fn record_start(&self, started: &StartedVisit) -> Result<(), GatewayError> {
        self.set(VISIT_ID, &started.visit_id.to_string())?;
        self.set(INSTITUTION_ID, &started.institution_id.to_string())?;
        self.set(INSTITUTION_NAME, &started.institution_name)?;
        self.set(SEQUENCE_NUMBER, &started.sequence_number.to_string())?;
        self.set(PARTICIPANT_COUNT, &started.participant_count.to_string())?;
        self.set(DIRTY, "false")?;
        self.set_status(VisitStatus::InProgress)
    }

    pub fn visit_id(&self) -> Result<Option<i64>, GatewayError> {
        self.get_i64(VISIT_ID)
    }

    pub fn institution_id(&self) -> Result<Option<i64>, GatewayError> {
        self.get_i64(INSTITUTION_ID)
    }

    pub fn institution_name(&self) -> Result<Option<String>, GatewayError> {
        self.get(INSTITUTION_NAME)
    }

    pub fn sequence_number(&self) -> Result<Option<i64>, GatewayError> {
        self.get_i64(SEQUENCE_NUMBER)
    }

    pub fn participant_count(&self) -> Result<Option<i64>, GatewayError> {
        self.get_i64(PARTICIPANT_COUNT)
    }

    pub fn is_dirty(&self) -> Result<bool, GatewayError> {
        Ok(self.get(DIRTY)?.as_deref() == Some("true"))
    }

    pub fn mark_dirty(&self) -> Result<(), GatewayError> {
        self.set(DIRTY, "true")
    }

    /// Drops staged notes and evidence.
    pub fn clear_staging(&self) -> Result<(), GatewayError> {
        self.delete(STAGED_NOTES)?;
        self.delete(STAGED_EVIDENCE)
    }

    /// Drops everything the session knows about the visit except its status.
    pub fn clear_visit(&self) -> Result<(), GatewayError> {
        self.clear_staging()?;
        for key in VISIT_KEYS.iter().filter(|k| **k != STATUS) {
            self.delete(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySessionStore;

    #[test]
    fn start_then_clear_keeps_status() {
        let store = MemorySessionStore::default();
        let ctx = SessionContext::new("doc-1", &store);
        assert_eq!(ctx.status().expect("status"), VisitStatus::NotStarted);

        ctx.record_start(&StartedVisit {
            visit_id: 7,
            institution_id: 2,
            institution_name: "IE Norte".into(),
            sequence_number: 3,
            participant_count: 4,
        })
        .expect("start");
        assert_eq!(ctx.status().expect("status"), VisitStatus::InProgress);
        assert_eq!(ctx.visit_id().expect("id"), Some(7));
        assert!(!ctx.is_dirty().expect("dirty"));
        ctx.mark_dirty().expect("mark");
        assert!(ctx.is_dirty().expect("dirty"));

        ctx.set(STAGED_NOTES, "{}").expect("stage");
        ctx.set_status(VisitStatus::Finalized).expect("status");
        ctx.clear_visit().expect("clear");
        assert_eq!(ctx.status().expect("status"), VisitStatus::Finalized);
        assert!(ctx.visit_id().expect("id").is_none());
        assert!(ctx.get(STAGED_NOTES).expect("notes").is_none());
    }

    #[test]
    fn garbage_status_reads_as_not_started() {
        let store = MemorySessionStore::default();
        let ctx = SessionContext::new("doc-1", &store);
        ctx.set(STATUS, "???").expect("set");
        assert_eq!(ctx.status().expect("status"), VisitStatus::NotStarted);
    }
}
