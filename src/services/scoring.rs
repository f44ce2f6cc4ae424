use crate::dao::models::QuestionEntity;

/// Points and timing computed for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Score {
    /// Whether the chosen option is the correct one.
    pub is_correct: bool,
    /// Points awarded.
    pub points: i64,
    /// Time from the answer window opening to the submission.
    pub time_taken_ms: u64,
}

/// Score a submission received at `now_ms` against a window ending at `deadline_ms`.
///
/// A correct answer earns the question's base points plus a speed bonus of up to 100 points,
/// proportional to the share of the window left. Wrong and missing answers earn nothing.
pub fn score_answer(
    question: &QuestionEntity,
    selected_option: Option<usize>,
    limit_ms: u64,
    deadline_ms: u64,
    now_ms: u64,
) -> Score {
    let remaining_ms = deadline_ms.saturating_sub(now_ms).min(limit_ms);
    let time_taken_ms = limit_ms - remaining_ms;

    let is_correct = selected_option
        .and_then(|index| question.options.get(index))
        .is_some_and(|option| option.is_correct);

    let points = if is_correct {
        question.base_points + speed_bonus(remaining_ms, limit_ms)
    } else {
        0
    };

    Score {
        is_correct,
        points,
        time_taken_ms,
    }
}

fn speed_bonus(remaining_ms: u64, limit_ms: u64) -> i64 {
    if limit_ms == 0 {
        return 0;
    }
    i64::try_from(remaining_ms * 100 / limit_ms).unwrap_or_default()
}
