//! Aggregate statistics engine
//!
//! Dataset-level counts and distribution summaries. Everything here is keyed
//! by `BTreeMap` so the serialized key order is stable across runs.

use crate::loader::{LoadStats, LoadedRecords};
use crate::normalizer::{LongFormDataset, RejectionReason};
use crate::stats::{CategoricalSummary, NumericSummary};
use crate::{FaceView, QuestionType, ResponseRecord};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

/// Earliest and latest response timestamps
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

/// Summary block consumed by presentation layers; the key set never changes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    pub total_responses: usize,
    pub unique_participants: usize,
    pub unique_images: usize,
    pub responses_by_question_type: BTreeMap<QuestionType, usize>,
    pub responses_by_face_view: BTreeMap<FaceView, usize>,
    pub date_range: DateRange,
    pub rejected_rows: usize,
    pub rejections_by_reason: BTreeMap<RejectionReason, usize>,
    pub unparsed_timestamps: usize,
    pub files: LoadStats,
    /// Distribution of responses per participant
    pub participant_response_counts: NumericSummary,
    /// Distribution of responses per image
    pub image_response_counts: NumericSummary,
    /// SHA-256 over loaded file names and contents
    pub dataset_fingerprint: String,
}

/// Numeric summaries for one rating question
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingDescriptives {
    pub overall: NumericSummary,
    pub by_face_view: BTreeMap<FaceView, NumericSummary>,
    pub by_participant: BTreeMap<String, NumericSummary>,
    pub by_image: BTreeMap<String, NumericSummary>,
}

/// Frequency tables for one binary-choice question
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceDescriptives {
    pub overall: CategoricalSummary,
    pub by_face_view: BTreeMap<FaceView, CategoricalSummary>,
    pub by_participant: BTreeMap<String, CategoricalSummary>,
    pub by_image: BTreeMap<String, CategoricalSummary>,
}

/// Descriptive statistics per question type present in the dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptives {
    pub ratings: BTreeMap<QuestionType, RatingDescriptives>,
    pub choices: BTreeMap<QuestionType, ChoiceDescriptives>,
}

impl Descriptives {
    pub fn is_empty(&self) -> bool {
        self.ratings.is_empty() && self.choices.is_empty()
    }
}

pub fn choice_label(choice: bool) -> &'static str {
    if choice {
        "yes"
    } else {
        "no"
    }
}

/// Engine computing dataset summaries and descriptives
#[derive(Debug, Default)]
pub struct AggregateEngine;

impl AggregateEngine {
    pub fn new() -> Self {
        Self
    }

    /// Dataset-level summary block
    pub fn dataset_summary(&self, dataset: &LongFormDataset, loaded: &LoadedRecords) -> DatasetSummary {
        let records = dataset.records();

        let mut by_question: BTreeMap<QuestionType, usize> =
            QuestionType::ALL.iter().map(|q| (*q, 0)).collect();
        let mut by_view: BTreeMap<FaceView, usize> = FaceView::ALL.iter().map(|v| (*v, 0)).collect();
        let mut per_participant: BTreeMap<&str, usize> = BTreeMap::new();
        let mut per_image: BTreeMap<&str, usize> = BTreeMap::new();
        let mut date_range = DateRange::default();

        for record in records {
            *by_question.entry(record.question_type).or_insert(0) += 1;
            *by_view.entry(record.face_view).or_insert(0) += 1;
            *per_participant.entry(&record.participant_id).or_insert(0) += 1;
            *per_image.entry(&record.image_id).or_insert(0) += 1;
            if let Some(ts) = record.timestamp {
                date_range.start = Some(date_range.start.map_or(ts, |s| s.min(ts)));
                date_range.end = Some(date_range.end.map_or(ts, |e| e.max(ts)));
            }
        }

        DatasetSummary {
            total_responses: records.len(),
            unique_participants: per_participant.len(),
            unique_images: per_image.len(),
            responses_by_question_type: by_question,
            responses_by_face_view: by_view,
            date_range,
            rejected_rows: dataset.rejected_total(),
            rejections_by_reason: dataset.rejections().clone(),
            unparsed_timestamps: dataset.unparsed_timestamps(),
            files: loaded.stats.clone(),
            participant_response_counts: NumericSummary::from_observed(
                per_participant.values().map(|n| *n as f64),
            ),
            image_response_counts: NumericSummary::from_observed(
                per_image.values().map(|n| *n as f64),
            ),
            dataset_fingerprint: loaded.fingerprint(),
        }
    }

    /// Overall, per-participant, per-image and per-face-view summaries for every question type present
    pub fn descriptives(&self, dataset: &LongFormDataset) -> Descriptives {
        let mut out = Descriptives::default();

        for question in QuestionType::ALL {
            let records: Vec<&ResponseRecord> = dataset.by_question(question).collect();
            if records.is_empty() {
                continue;
            }
            if question.is_rating() {
                out.ratings.insert(question, rating_descriptives(&records));
            } else {
                out.choices.insert(question, choice_descriptives(&records));
            }
        }
        out
    }
}

fn group_by<'a, K: Ord>(
    records: &[&'a ResponseRecord],
    key: impl Fn(&ResponseRecord) -> K,
) -> BTreeMap<K, Vec<&'a ResponseRecord>> {
    let mut groups: BTreeMap<K, Vec<&'a ResponseRecord>> = BTreeMap::new();
    for &record in records {
        groups.entry(key(record)).or_default().push(record);
    }
    groups
}

fn numeric(records: &[&ResponseRecord]) -> NumericSummary {
    NumericSummary::from_values(records.iter().map(|r| r.value.as_rating()))
}

fn categorical(records: &[&ResponseRecord]) -> CategoricalSummary {
    CategoricalSummary::from_labels(
        records
            .iter()
            .filter_map(|r| r.value.as_choice())
            .map(choice_label),
    )
}

fn rating_descriptives(records: &[&ResponseRecord]) -> RatingDescriptives {
    RatingDescriptives {
        overall: numeric(records),
        by_face_view: group_by(records, |r| r.face_view)
            .into_iter()
            .map(|(k, v)| (k, numeric(&v)))
            .collect(),
        by_participant: group_by(records, |r| r.participant_id.clone())
            .into_iter()
            .map(|(k, v)| (k, numeric(&v)))
            .collect(),
        by_image: group_by(records, |r| r.image_id.clone())
            .into_iter()
            .map(|(k, v)| (k, numeric(&v)))
            .collect(),
    }
}

fn choice_descriptives(records: &[&ResponseRecord]) -> ChoiceDescriptives {
    ChoiceDescriptives {
        overall: categorical(records),
        by_face_view: group_by(records, |r| r.face_view)
            .into_iter()
            .map(|(k, v)| (k, categorical(&v)))
            .collect(),
        by_participant: group_by(records, |r| r.participant_id.clone())
            .into_iter()
            .map(|(k, v)| (k, categorical(&v)))
            .collect(),
        by_image: group_by(records, |r| r.image_id.clone())
            .into_iter()
            .map(|(k, v)| (k, categorical(&v)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResponseValue;
    use chrono::NaiveDate;

    fn record(participant: &str, image: &str, view: FaceView, question: QuestionType, value: ResponseValue) -> ResponseRecord {
        ResponseRecord {
            participant_id: participant.to_string(),
            image_id: image.to_string(),
            face_view: view,
            question_type: question,
            value,
            timestamp: None,
            source_file: format!("participant_{}.csv", participant),
            row: 1,
        }
    }

    /// 4 participants, 13 images, 538 trust ratings split 100/120/130/188
    fn uneven_dataset() -> LongFormDataset {
        let mut records = Vec::new();
        for (p, count) in [("P1", 100), ("P2", 120), ("P3", 130), ("P4", 188)] {
            for i in 0..count {
                let image = format!("img{:02}", i % 13);
                let view = FaceView::ALL[(i / 13) % 3];
                records.push(record(
                    p,
                    &image,
                    view,
                    QuestionType::TrustRating,
                    ResponseValue::Rating(1.0 + (i % 7) as f64),
                ));
            }
        }
        LongFormDataset::from_records(records, true)
    }

    #[test]
    fn test_uneven_participant_counts() {
        let dataset = uneven_dataset();
        let summary = AggregateEngine::new().dataset_summary(&dataset, &LoadedRecords::default());

        assert_eq!(summary.total_responses, 538);
        assert_eq!(summary.unique_participants, 4);
        assert_eq!(summary.unique_images, 13);
        assert_eq!(summary.responses_by_question_type[&QuestionType::TrustRating], 538);
        assert_eq!(summary.responses_by_question_type[&QuestionType::MascChoice], 0);

        let counts = &summary.participant_response_counts;
        assert_eq!(counts.count, 4);
        assert_eq!(counts.min, Some(100.0));
        assert_eq!(counts.max, Some(188.0));
        assert_eq!(counts.q1, Some(115.0));
        assert_eq!(counts.median, Some(125.0));
        assert_eq!(counts.q3, Some(144.5));

        let per_image = &summary.image_response_counts;
        assert_eq!(per_image.count, 13);
        let total: f64 = per_image.mean.unwrap() * 13.0;
        assert!((total - 538.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_dataset_summary() {
        let summary =
            AggregateEngine::new().dataset_summary(&LongFormDataset::default(), &LoadedRecords::default());
        assert_eq!(summary.total_responses, 0);
        assert_eq!(summary.unique_participants, 0);
        assert!(summary.date_range.start.is_none());
        assert_eq!(summary.participant_response_counts.count, 0);
        // key set stays complete even without data
        assert_eq!(summary.responses_by_face_view.len(), 3);
        assert_eq!(summary.responses_by_question_type.len(), 4);
    }

    #[test]
    fn test_date_range() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let mut a = record("P1", "img1", FaceView::Full, QuestionType::TrustRating, ResponseValue::Rating(3.0));
        a.timestamp = Some(day.and_hms_opt(14, 0, 0).unwrap());
        let mut b = record("P1", "img2", FaceView::Full, QuestionType::TrustRating, ResponseValue::Rating(3.0));
        b.timestamp = Some(day.and_hms_opt(9, 30, 0).unwrap());
        let c = record("P1", "img3", FaceView::Full, QuestionType::TrustRating, ResponseValue::Rating(3.0));

        let dataset = LongFormDataset::from_records(vec![a, b, c], false);
        let summary = AggregateEngine::new().dataset_summary(&dataset, &LoadedRecords::default());
        assert_eq!(summary.date_range.start, Some(day.and_hms_opt(9, 30, 0).unwrap()));
        assert_eq!(summary.date_range.end, Some(day.and_hms_opt(14, 0, 0).unwrap()));
    }

    #[test]
    fn test_descriptives_split_ratings_and_choices() {
        let dataset = LongFormDataset::from_records(
            vec![
                record("P1", "img1", FaceView::Full, QuestionType::TrustRating, ResponseValue::Rating(4.0)),
                record("P2", "img1", FaceView::Full, QuestionType::TrustRating, ResponseValue::Rating(6.0)),
                record("P1", "img1", FaceView::Left, QuestionType::MascChoice, ResponseValue::Choice(true)),
                record("P2", "img1", FaceView::Left, QuestionType::MascChoice, ResponseValue::Choice(true)),
                record("P3", "img1", FaceView::Left, QuestionType::MascChoice, ResponseValue::Choice(false)),
            ],
            false,
        );
        let d = AggregateEngine::new().descriptives(&dataset);

        let trust = &d.ratings[&QuestionType::TrustRating];
        assert_eq!(trust.overall.mean, Some(5.0));
        assert_eq!(trust.by_participant["P1"].std_dev, Some(0.0));
        assert_eq!(trust.by_face_view.len(), 1);

        let masc = &d.choices[&QuestionType::MascChoice];
        assert_eq!(masc.overall.mode.as_deref(), Some("yes"));
        assert_eq!(masc.by_face_view[&FaceView::Left].count, 3);
        assert!(!d.ratings.contains_key(&QuestionType::EmotionRating));
        assert!(!d.choices.contains_key(&QuestionType::FemChoice));
    }

    #[test]
    fn test_summary_serializes_stable_keys() {
        let summary =
            AggregateEngine::new().dataset_summary(&LongFormDataset::default(), &LoadedRecords::default());
        let json = serde_json::to_value(&summary).unwrap();
        for key in [
            "totalResponses",
            "uniqueParticipants",
            "uniqueImages",
            "responsesByQuestionType",
            "responsesByFaceView",
            "dateRange",
            "rejectedRows",
            "rejectionsByReason",
            "files",
            "participantResponseCounts",
            "imageResponseCounts",
            "datasetFingerprint",
        ] {
            assert!(json.get(key).is_some(), "missing key {}", key);
        }
        assert_eq!(json["responsesByFaceView"]["full"], 0);
    }
}
