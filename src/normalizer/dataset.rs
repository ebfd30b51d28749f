//! The normalized long-format dataset

use super::RejectionReason;
use crate::{FaceView, QuestionType, ResponseRecord};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Identity of one observation slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub participant_id: String,
    pub image_id: String,
    pub face_view: FaceView,
    pub question_type: QuestionType,
}

impl RecordKey {
    pub fn of(record: &ResponseRecord) -> Self {
        Self {
            participant_id: record.participant_id.clone(),
            image_id: record.image_id.clone(),
            face_view: record.face_view,
            question_type: record.question_type,
        }
    }
}

/// Read-only collection of normalized records in file-then-row order
#[derive(Debug, Clone, Default)]
pub struct LongFormDataset {
    records: Vec<ResponseRecord>,
    rejections: BTreeMap<RejectionReason, usize>,
    unparsed_timestamps: usize,
    repeated_trials_allowed: bool,
}

impl LongFormDataset {
    /// Build a dataset, enforcing the duplicate-key policy.
    ///
    /// Without repeated trials the first record for a key is kept and every
    /// later one is rejected as [`RejectionReason::DuplicateKey`].
    pub fn from_records(records: Vec<ResponseRecord>, allow_repeated_trials: bool) -> Self {
        let mut dataset = Self {
            records: Vec::with_capacity(records.len()),
            rejections: BTreeMap::new(),
            unparsed_timestamps: 0,
            repeated_trials_allowed: allow_repeated_trials,
        };

        let mut seen = HashSet::new();
        for record in records {
            if !allow_repeated_trials && !seen.insert(RecordKey::of(&record)) {
                dataset.reject(RejectionReason::DuplicateKey, 1);
                continue;
            }
            dataset.records.push(record);
        }
        dataset
    }

    pub(crate) fn reject(&mut self, reason: RejectionReason, count: usize) {
        if count > 0 {
            *self.rejections.entry(reason).or_insert(0) += count;
        }
    }

    pub(crate) fn set_unparsed_timestamps(&mut self, count: usize) {
        self.unparsed_timestamps = count;
    }

    pub fn records(&self) -> &[ResponseRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn rejections(&self) -> &BTreeMap<RejectionReason, usize> {
        &self.rejections
    }

    pub fn rejected_total(&self) -> usize {
        self.rejections.values().sum()
    }

    pub fn unparsed_timestamps(&self) -> usize {
        self.unparsed_timestamps
    }

    pub fn repeated_trials_allowed(&self) -> bool {
        self.repeated_trials_allowed
    }

    /// Records answering one question type
    pub fn by_question(&self, question: QuestionType) -> impl Iterator<Item = &ResponseRecord> {
        self.records
            .iter()
            .filter(move |r| r.question_type == question)
    }

    pub fn count_question(&self, question: QuestionType) -> usize {
        self.by_question(question).count()
    }

    pub fn participants(&self) -> BTreeSet<&str> {
        self.records
            .iter()
            .map(|r| r.participant_id.as_str())
            .collect()
    }

    pub fn images(&self) -> BTreeSet<&str> {
        self.records.iter().map(|r| r.image_id.as_str()).collect()
    }

    /// All trials recorded for one key, ordered by timestamp (untimed trials last, file order kept for ties)
    pub fn trials(&self, key: &RecordKey) -> Vec<&ResponseRecord> {
        let mut trials: Vec<&ResponseRecord> = self
            .records
            .iter()
            .filter(|r| {
                r.participant_id == key.participant_id
                    && r.image_id == key.image_id
                    && r.face_view == key.face_view
                    && r.question_type == key.question_type
            })
            .collect();
        trials.sort_by_key(|r| (r.timestamp.is_none(), r.timestamp));
        trials
    }
}
