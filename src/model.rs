//! Stored documents exposed through connections
//!
//! Each document declares its closed sort-key allowlist. Field names match
//! the serialized (camelCase) document so filters and sort keys agree.

use async_graphql::Object;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cursor::SortValue;
use crate::scoring::{apply_update, compute_score, GradeField, GradeOutcome, GradeUpdate, Response, ResponseTree};
use crate::sort::{Document, SortField};
use crate::types;
use crate::TutorError;

/// A learner's recorded run through one lesson
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub lesson_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub responses: ResponseTree,
    /// Persisted grader aggregate, rewritten after every grade edit
    #[serde(default)]
    pub grader_grade: Option<f64>,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, lesson_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            lesson_id: lesson_id.into(),
            username: String::new(),
            responses: ResponseTree::new(),
            grader_grade: None,
            deleted: false,
            created_at: at,
            updated_at: at,
        }
    }

    /// Recompute and store the grader aggregate
    pub fn refresh_grader_grade(&mut self) {
        self.grader_grade = compute_score(&self.responses, GradeField::Grader);
    }

    /// Add or replace a response and refresh the aggregate
    ///
    /// A session stays bound to the lesson it was opened for.
    pub fn record_response(&mut self, lesson_id: &str, response: Response, at: DateTime<Utc>) -> crate::Result<()> {
        if self.lesson_id != lesson_id {
            return Err(TutorError::LessonMismatch {
                session_id: self.session_id.clone(),
                stored: self.lesson_id.clone(),
                requested: lesson_id.to_string(),
            });
        }
        self.responses.record(response);
        self.refresh_grader_grade();
        self.updated_at = at;
        Ok(())
    }

    /// Edit one leaf and store the recomputed grader aggregate
    pub fn grade_leaf(
        &mut self,
        response_id: &str,
        expectation_id: &str,
        update: GradeUpdate,
        at: DateTime<Utc>,
    ) -> crate::Result<GradeOutcome> {
        let outcome = apply_update(&mut self.responses, response_id, expectation_id, update)?;
        self.grader_grade = outcome.grader_score;
        self.updated_at = at;
        Ok(outcome)
    }
}

impl Document for Session {
    const ENTITY: &'static str = "session";
    type Sort = SessionSortField;

    fn id(&self) -> &str {
        &self.session_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSortField {
    Id,
    LessonId,
    Username,
    CreatedAt,
    UpdatedAt,
}

impl SortField<Session> for SessionSortField {
    fn primary() -> Self {
        SessionSortField::Id
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "id" | "_id" | "sessionId" | "session_id" => Some(SessionSortField::Id),
            "lessonId" | "lesson_id" => Some(SessionSortField::LessonId),
            "username" => Some(SessionSortField::Username),
            "createdAt" | "created_at" => Some(SessionSortField::CreatedAt),
            "updatedAt" | "updated_at" => Some(SessionSortField::UpdatedAt),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SessionSortField::Id => "sessionId",
            SessionSortField::LessonId => "lessonId",
            SessionSortField::Username => "username",
            SessionSortField::CreatedAt => "createdAt",
            SessionSortField::UpdatedAt => "updatedAt",
        }
    }

    fn is_primary(&self) -> bool {
        matches!(self, SessionSortField::Id)
    }

    fn value_of(&self, node: &Session) -> SortValue {
        match self {
            SessionSortField::Id => SortValue::Text(node.session_id.clone()),
            SessionSortField::LessonId => SortValue::Text(node.lesson_id.clone()),
            SessionSortField::Username => SortValue::Text(node.username.clone()),
            SessionSortField::CreatedAt => SortValue::Timestamp(node.created_at),
            SessionSortField::UpdatedAt => SortValue::Timestamp(node.updated_at),
        }
    }

    fn accepts(&self, value: &SortValue) -> bool {
        match (self, value) {
            (_, SortValue::Null) => true,
            (SessionSortField::CreatedAt | SessionSortField::UpdatedAt, SortValue::Timestamp(_)) => true,
            (
                SessionSortField::Id | SessionSortField::LessonId | SessionSortField::Username,
                SortValue::Text(_),
            ) => true,
            _ => false,
        }
    }
}

#[Object]
impl Session {
    async fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    async fn username(&self) -> &str {
        &self.username
    }

    /// Stored grader aggregate
    async fn grader_grade(&self) -> Option<f64> {
        self.grader_grade
    }

    /// Aggregate computed on read for the requested grade field
    async fn score(&self, grade_field: Option<GradeField>) -> Option<f64> {
        compute_score(&self.responses, grade_field.unwrap_or_default())
    }

    async fn responses(&self) -> Vec<Response> {
        self.responses.responses().cloned().collect()
    }

    async fn created_at(&self) -> types::DateTime {
        self.created_at.into()
    }

    async fn updated_at(&self) -> types::DateTime {
        self.updated_at.into()
    }
}

/// Lesson metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub lesson_id: String,
    pub name: String,
    #[serde(default)]
    pub intro: String,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Lesson {
    const ENTITY: &'static str = "lesson";
    type Sort = LessonSortField;

    fn id(&self) -> &str {
        &self.lesson_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonSortField {
    Id,
    Name,
    CreatedAt,
    UpdatedAt,
}

impl SortField<Lesson> for LessonSortField {
    fn primary() -> Self {
        LessonSortField::Id
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "id" | "_id" | "lessonId" | "lesson_id" => Some(LessonSortField::Id),
            "name" => Some(LessonSortField::Name),
            "createdAt" | "created_at" => Some(LessonSortField::CreatedAt),
            "updatedAt" | "updated_at" => Some(LessonSortField::UpdatedAt),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            LessonSortField::Id => "lessonId",
            LessonSortField::Name => "name",
            LessonSortField::CreatedAt => "createdAt",
            LessonSortField::UpdatedAt => "updatedAt",
        }
    }

    fn is_primary(&self) -> bool {
        matches!(self, LessonSortField::Id)
    }

    fn value_of(&self, node: &Lesson) -> SortValue {
        match self {
            LessonSortField::Id => SortValue::Text(node.lesson_id.clone()),
            LessonSortField::Name => SortValue::Text(node.name.clone()),
            LessonSortField::CreatedAt => SortValue::Timestamp(node.created_at),
            LessonSortField::UpdatedAt => SortValue::Timestamp(node.updated_at),
        }
    }

    fn accepts(&self, value: &SortValue) -> bool {
        match (self, value) {
            (_, SortValue::Null) => true,
            (LessonSortField::CreatedAt | LessonSortField::UpdatedAt, SortValue::Timestamp(_)) => true,
            (LessonSortField::Id | LessonSortField::Name, SortValue::Text(_)) => true,
            _ => false,
        }
    }
}

#[Object]
impl Lesson {
    async fn lesson_id(&self) -> &str {
        &self.lesson_id
    }

    async fn name(&self) -> &str {
        &self.name
    }

    async fn intro(&self) -> &str {
        &self.intro
    }

    async fn created_at(&self) -> types::DateTime {
        self.created_at.into()
    }

    async fn updated_at(&self) -> types::DateTime {
        self.updated_at.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{ExpectationScore, Grade};
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_session_sort_allowlist() {
        assert_eq!(SessionSortField::resolve(None).unwrap(), SessionSortField::Id);
        assert_eq!(
            SessionSortField::resolve(Some("created_at")).unwrap(),
            SessionSortField::CreatedAt
        );
        let err = SessionSortField::resolve(Some("graderGrade")).unwrap_err();
        assert_eq!(err.to_string(), "Invalid sort field 'graderGrade' for session");
    }

    #[test]
    fn test_sort_value_kinds() {
        let session = Session::new("s1", "l1", at(3));
        let value = SessionSortField::CreatedAt.value_of(&session);
        assert_eq!(value, SortValue::Timestamp(at(3)));
        assert!(SessionSortField::CreatedAt.accepts(&value));
        assert!(!SessionSortField::Username.accepts(&value));
        assert!(SessionSortField::Username.accepts(&SortValue::Null));
    }

    #[test]
    fn test_lesson_sort_allowlist() {
        assert_eq!(LessonSortField::resolve(Some("name")).unwrap(), LessonSortField::Name);
        assert!(LessonSortField::resolve(Some("intro")).is_err());
        assert_eq!(LessonSortField::UpdatedAt.name(), "updatedAt");
    }

    #[test]
    fn test_refresh_grader_grade() {
        let mut session = Session::new("s1", "l1", at(1));
        session.responses.record(
            Response::new("r1", "answer").with_score(ExpectationScore {
                grader_grade: Some(Grade::Good),
                ..ExpectationScore::new("e1")
            }),
        );
        session.refresh_grader_grade();
        assert_eq!(session.grader_grade, Some(1.0));
    }

    #[test]
    fn test_record_response_keeps_lesson_binding() {
        let mut session = Session::new("s1", "l1", at(1));
        session
            .record_response("l1", Response::new("r1", "a").with_score(ExpectationScore::new("e1")), at(2))
            .unwrap();
        assert_eq!(session.updated_at, at(2));

        let err = session
            .record_response("l2", Response::new("r2", "b"), at(3))
            .unwrap_err();
        assert_eq!(err.code(), "LESSON_MISMATCH");
        assert_eq!(err.to_string(), "session 's1' belongs to lesson 'l1', not 'l2'");
        assert_eq!(session.responses.responses().count(), 1);
        assert_eq!(session.updated_at, at(2));
    }

    #[test]
    fn test_grade_leaf_stores_aggregate() {
        let mut session = Session::new("s1", "l1", at(1));
        session
            .record_response("l1", Response::new("r1", "a").with_score(ExpectationScore::new("e1")), at(1))
            .unwrap();
        let update = GradeUpdate::Grade {
            field: GradeField::Grader,
            grade: Some(Grade::Neutral),
        };
        let outcome = session.grade_leaf("r1", "e1", update, at(4)).unwrap();
        assert_eq!(outcome.grader_score, Some(0.5));
        assert_eq!(session.grader_grade, Some(0.5));
        assert_eq!(session.updated_at, at(4));
    }

    #[test]
    fn test_session_document_shape() {
        let session = Session::new("s1", "l1", at(1));
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["lessonId"], "l1");
        assert_eq!(json["deleted"], false);
    }
}
