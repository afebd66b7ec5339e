use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    pub id: String,
    pub kind: String,
    pub subject_id: String,
    pub status: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub started_at: String,
    pub finished_at: Option<String>,
}
