//! Session score aggregation
//!
//! A session owns an ordered tree of user responses, each holding one
//! expectation score per lesson expectation. The aggregate score is the mean
//! grade value over every non-invalidated leaf, or `None` while any counted
//! leaf is still ungraded.

use std::str::FromStr;

use async_graphql::{Enum, Object, SimpleObject};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::TutorError;

/// Grade assigned to one expectation of one response
#[derive(Enum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    Good,
    Neutral,
    Bad,
}

impl Grade {
    /// Numeric value used by the aggregate
    pub fn value(self) -> f64 {
        match self {
            Grade::Good => 1.0,
            Grade::Neutral => 0.5,
            Grade::Bad => 0.0,
        }
    }

    /// Parse a grade name; empty input means ungraded
    pub fn parse_optional(raw: &str) -> crate::Result<Option<Grade>> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        match raw.to_ascii_lowercase().as_str() {
            "good" => Ok(Some(Grade::Good)),
            "neutral" => Ok(Some(Grade::Neutral)),
            "bad" => Ok(Some(Grade::Bad)),
            _ => Err(TutorError::InvalidGrade(raw.to_string())),
        }
    }
}

/// Which grade on each leaf feeds the aggregate
#[derive(Enum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GradeField {
    /// Entered by a human grader
    #[default]
    Grader,
    /// Produced by the answer classifier
    Classifier,
}

impl GradeField {
    pub fn name(self) -> &'static str {
        match self {
            GradeField::Grader => "graderGrade",
            GradeField::Classifier => "classifierGrade",
        }
    }
}

impl FromStr for GradeField {
    type Err = TutorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "graderGrade" | "grader_grade" => Ok(GradeField::Grader),
            "classifierGrade" | "classifier_grade" => Ok(GradeField::Classifier),
            other => Err(TutorError::InvalidGrade(format!(
                "unknown grade field '{other}'"
            ))),
        }
    }
}

/// Per-expectation grading entry
#[derive(SimpleObject, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectationScore {
    pub expectation_id: String,
    #[serde(default)]
    pub grader_grade: Option<Grade>,
    #[serde(default)]
    pub classifier_grade: Option<Grade>,
    #[serde(default)]
    pub invalidated: bool,
}

impl ExpectationScore {
    /// Ungraded entry for `expectation_id`
    pub fn new(expectation_id: impl Into<String>) -> Self {
        Self {
            expectation_id: expectation_id.into(),
            grader_grade: None,
            classifier_grade: None,
            invalidated: false,
        }
    }

    pub fn grade(&self, field: GradeField) -> Option<Grade> {
        match field {
            GradeField::Grader => self.grader_grade,
            GradeField::Classifier => self.classifier_grade,
        }
    }

    fn grade_mut(&mut self, field: GradeField) -> &mut Option<Grade> {
        match field {
            GradeField::Grader => &mut self.grader_grade,
            GradeField::Classifier => &mut self.classifier_grade,
        }
    }
}

/// One user answer and its expectation scores, in lesson order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub response_id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub expectation_scores: IndexMap<String, ExpectationScore>,
}

impl Response {
    pub fn new(response_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            response_id: response_id.into(),
            text: text.into(),
            expectation_scores: IndexMap::new(),
        }
    }

    /// Append (or replace in place) the score for its expectation
    pub fn with_score(mut self, score: ExpectationScore) -> Self {
        self.expectation_scores
            .insert(score.expectation_id.clone(), score);
        self
    }
}

#[Object]
impl Response {
    async fn response_id(&self) -> &str {
        &self.response_id
    }

    async fn text(&self) -> &str {
        &self.text
    }

    async fn expectation_scores(&self) -> Vec<ExpectationScore> {
        self.expectation_scores.values().cloned().collect()
    }
}

/// Ordered arena of responses keyed by stable response id
///
/// Leaves are addressed by `(response_id, expectation_id)`, never by
/// position, so edits survive reordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseTree {
    responses: IndexMap<String, Response>,
}

impl ResponseTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a response, replacing one with the same id in its original slot
    pub fn record(&mut self, response: Response) {
        self.responses
            .insert(response.response_id.clone(), response);
    }

    pub fn responses(&self) -> impl Iterator<Item = &Response> {
        self.responses.values()
    }

    pub fn response(&self, response_id: &str) -> Option<&Response> {
        self.responses.get(response_id)
    }

    /// All expectation scores in response order, then expectation order
    pub fn leaves(&self) -> impl Iterator<Item = &ExpectationScore> {
        self.responses
            .values()
            .flat_map(|r| r.expectation_scores.values())
    }

    pub fn leaf(&self, response_id: &str, expectation_id: &str) -> Option<&ExpectationScore> {
        self.responses
            .get(response_id)?
            .expectation_scores
            .get(expectation_id)
    }

    fn leaf_mut(
        &mut self,
        response_id: &str,
        expectation_id: &str,
    ) -> crate::Result<&mut ExpectationScore> {
        let response = self
            .responses
            .get_mut(response_id)
            .ok_or_else(|| TutorError::NotFound {
                kind: "response",
                id: response_id.to_string(),
            })?;
        response
            .expectation_scores
            .get_mut(expectation_id)
            .ok_or_else(|| TutorError::NotFound {
                kind: "expectation",
                id: expectation_id.to_string(),
            })
    }

    /// Set or clear one leaf's grade and return the edited leaf
    pub fn set_grade(
        &mut self,
        response_id: &str,
        expectation_id: &str,
        field: GradeField,
        grade: Option<Grade>,
    ) -> crate::Result<&ExpectationScore> {
        let leaf = self.leaf_mut(response_id, expectation_id)?;
        *leaf.grade_mut(field) = grade;
        Ok(leaf)
    }

    /// Flag or unflag one leaf as excluded from scoring
    pub fn set_invalidated(
        &mut self,
        response_id: &str,
        expectation_id: &str,
        invalidated: bool,
    ) -> crate::Result<&ExpectationScore> {
        let leaf = self.leaf_mut(response_id, expectation_id)?;
        leaf.invalidated = invalidated;
        Ok(leaf)
    }
}

/// Reduce a response tree to a score in `[0, 1]`
///
/// Invalidated leaves are skipped entirely. Any remaining leaf without a
/// grade in `field` makes the whole result `None`, as does a tree with no
/// counted leaves.
pub fn compute_score(tree: &ResponseTree, field: GradeField) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0u32;
    for leaf in tree.leaves().filter(|leaf| !leaf.invalidated) {
        sum += leaf.grade(field)?.value();
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / f64::from(count))
    }
}

/// Edit applied to a single leaf
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradeUpdate {
    Grade {
        field: GradeField,
        grade: Option<Grade>,
    },
    Invalidated(bool),
}

/// Result of a leaf edit: the leaf itself plus the fresh aggregate
#[derive(Debug, Clone, PartialEq)]
pub struct GradeOutcome {
    pub leaf: ExpectationScore,
    pub grader_score: Option<f64>,
}

/// Apply `update` to one leaf and recompute the grader aggregate over the whole tree
pub fn apply_update(
    tree: &mut ResponseTree,
    response_id: &str,
    expectation_id: &str,
    update: GradeUpdate,
) -> crate::Result<GradeOutcome> {
    let leaf = match update {
        GradeUpdate::Grade { field, grade } => {
            tree.set_grade(response_id, expectation_id, field, grade)?
        }
        GradeUpdate::Invalidated(flag) => tree.set_invalidated(response_id, expectation_id, flag)?,
    }
    .clone();
    Ok(GradeOutcome {
        leaf,
        grader_score: compute_score(tree, GradeField::Grader),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn score(expectation_id: &str, grade: Option<Grade>, invalidated: bool) -> ExpectationScore {
        ExpectationScore {
            expectation_id: expectation_id.to_string(),
            grader_grade: grade,
            classifier_grade: None,
            invalidated,
        }
    }

    fn tree_of(leaves: Vec<ExpectationScore>) -> ResponseTree {
        let mut response = Response::new("r1", "answer");
        for leaf in leaves {
            response = response.with_score(leaf);
        }
        let mut tree = ResponseTree::new();
        tree.record(response);
        tree
    }

    #[test]
    fn test_single_good() {
        let tree = tree_of(vec![score("e1", Some(Grade::Good), false)]);
        assert_eq!(compute_score(&tree, GradeField::Grader), Some(1.0));
    }

    #[test]
    fn test_bad_and_good_average() {
        let tree = tree_of(vec![
            score("e1", Some(Grade::Bad), false),
            score("e2", Some(Grade::Good), false),
        ]);
        assert_eq!(compute_score(&tree, GradeField::Grader), Some(0.5));
    }

    #[test]
    fn test_single_neutral() {
        let tree = tree_of(vec![score("e1", Some(Grade::Neutral), false)]);
        assert_eq!(compute_score(&tree, GradeField::Grader), Some(0.5));
    }

    #[test]
    fn test_empty_tree_is_none() {
        assert_eq!(compute_score(&ResponseTree::new(), GradeField::Grader), None);
        let tree = tree_of(vec![]);
        assert_eq!(compute_score(&tree, GradeField::Grader), None);
    }

    #[test]
    fn test_one_ungraded_leaf_blocks_aggregate() {
        let tree = tree_of(vec![
            score("e1", Some(Grade::Good), false),
            score("e2", None, false),
        ]);
        assert_eq!(compute_score(&tree, GradeField::Grader), None);
    }

    #[test]
    fn test_invalidated_leaf_is_excluded() {
        let tree = tree_of(vec![
            score("e1", Some(Grade::Good), true),
            score("e2", Some(Grade::Bad), false),
        ]);
        assert_eq!(compute_score(&tree, GradeField::Grader), Some(0.0));

        // An ungraded leaf does not block once invalidated.
        let tree = tree_of(vec![
            score("e1", None, true),
            score("e2", Some(Grade::Good), false),
        ]);
        assert_eq!(compute_score(&tree, GradeField::Grader), Some(1.0));
    }

    #[test]
    fn test_all_invalidated_is_none() {
        let tree = tree_of(vec![score("e1", Some(Grade::Good), true)]);
        assert_eq!(compute_score(&tree, GradeField::Grader), None);
    }

    #[test]
    fn test_grade_field_selects_classifier() {
        let mut leaf = score("e1", None, false);
        leaf.classifier_grade = Some(Grade::Good);
        let tree = tree_of(vec![leaf]);
        assert_eq!(compute_score(&tree, GradeField::Grader), None);
        assert_eq!(compute_score(&tree, GradeField::Classifier), Some(1.0));
    }

    #[test]
    fn test_leaves_span_responses_in_order() {
        let mut tree = ResponseTree::new();
        tree.record(
            Response::new("r1", "first")
                .with_score(score("e1", Some(Grade::Good), false))
                .with_score(score("e2", Some(Grade::Good), false)),
        );
        tree.record(Response::new("r2", "second").with_score(score("e1", Some(Grade::Bad), false)));
        let order: Vec<_> = tree
            .leaves()
            .map(|l| (l.expectation_id.as_str(), l.grader_grade))
            .collect();
        assert_eq!(
            order,
            vec![
                ("e1", Some(Grade::Good)),
                ("e2", Some(Grade::Good)),
                ("e1", Some(Grade::Bad)),
            ]
        );
        let score = compute_score(&tree, GradeField::Grader).unwrap();
        assert!((score - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(compute_score(&tree, GradeField::Grader), Some(score));
    }

    #[test]
    fn test_record_replaces_in_place() {
        let mut tree = ResponseTree::new();
        tree.record(Response::new("r1", "a"));
        tree.record(Response::new("r2", "b"));
        tree.record(Response::new("r1", "a2"));
        let texts: Vec<_> = tree.responses().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["a2", "b"]);
    }

    #[test]
    fn test_apply_update_recomputes_from_full_tree() {
        let mut tree = tree_of(vec![
            score("e1", Some(Grade::Good), false),
            score("e2", None, false),
        ]);
        let outcome = apply_update(
            &mut tree,
            "r1",
            "e2",
            GradeUpdate::Grade {
                field: GradeField::Grader,
                grade: Some(Grade::Neutral),
            },
        )
        .unwrap();
        assert_eq!(outcome.leaf, score("e2", Some(Grade::Neutral), false));
        assert_eq!(outcome.grader_score, Some(0.75));

        let outcome = apply_update(&mut tree, "r1", "e1", GradeUpdate::Invalidated(true)).unwrap();
        assert!(outcome.leaf.invalidated);
        assert_eq!(outcome.grader_score, Some(0.5));
    }

    #[test]
    fn test_apply_update_unknown_leaf() {
        let mut tree = tree_of(vec![score("e1", None, false)]);
        let err = apply_update(&mut tree, "r9", "e1", GradeUpdate::Invalidated(true)).unwrap_err();
        assert!(matches!(err, TutorError::NotFound { kind: "response", .. }));
        let err = apply_update(&mut tree, "r1", "e9", GradeUpdate::Invalidated(true)).unwrap_err();
        assert!(matches!(err, TutorError::NotFound { kind: "expectation", .. }));
    }

    #[test]
    fn test_grade_parsing() {
        assert_eq!(Grade::parse_optional("Good").unwrap(), Some(Grade::Good));
        assert_eq!(Grade::parse_optional(" neutral ").unwrap(), Some(Grade::Neutral));
        assert_eq!(Grade::parse_optional("").unwrap(), None);
        assert!(matches!(
            Grade::parse_optional("excellent"),
            Err(TutorError::InvalidGrade(_))
        ));
        assert_eq!("classifierGrade".parse::<GradeField>().unwrap(), GradeField::Classifier);
        assert!("score".parse::<GradeField>().is_err());
    }

    #[test]
    fn test_tree_serializes_in_order() {
        let tree = tree_of(vec![score("e2", Some(Grade::Bad), false), score("e1", None, false)]);
        let json = serde_json::to_string(&tree).unwrap();
        let e2 = json.find("\"e2\"").unwrap();
        let e1 = json.find("\"e1\"").unwrap();
        assert!(e2 < e1);
        let back: ResponseTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
    }
}
