//! Review-queue priority.
//!
//! `score = clamp(100 + critical?50 + high?25 + maintainer?10
//!                + min(waitMinutes, 30) − 5·failedAttempts, 0, ∞)`

/// Inputs for one queued review.
#[derive(Debug, Clone, Copy)]
pub struct PriorityInput {
    pub has_critical_findings: bool,
    pub has_high_findings: bool,
    pub author_is_maintainer: bool,
    pub wait_minutes: u32,
    pub failed_attempts: u32,
}

/// Compute the priority score; higher sorts first.
pub fn score(input: &PriorityInput) -> u32 {
    let mut score: i64 = 100;
    if input.has_critical_findings {
        score += 50;
    }
    if input.has_high_findings {
        score += 25;
    }
    if input.author_is_maintainer {
        score += 10;
    }
    score += i64::from(input.wait_minutes.min(30));
    score -= 5 * i64::from(input.failed_attempts);
    score.max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_is_one_hundred() {
        let input = PriorityInput {
            has_critical_findings: false,
            has_high_findings: false,
            author_is_maintainer: false,
            wait_minutes: 0,
            failed_attempts: 0,
        };
        assert_eq!(score(&input), 100);
    }

    #[test]
    fn all_bonuses_stack_and_wait_caps_at_thirty() {
        let input = PriorityInput {
            has_critical_findings: true,
            has_high_findings: true,
            author_is_maintainer: true,
            wait_minutes: 300,
            failed_attempts: 0,
        };
        assert_eq!(score(&input), 100 + 50 + 25 + 10 + 30);
    }

    #[test]
    fn failures_subtract_and_score_floors_at_zero() {
        let input = PriorityInput {
            has_critical_findings: false,
            has_high_findings: false,
            author_is_maintainer: false,
            wait_minutes: 0,
            failed_attempts: 25,
        };
        assert_eq!(score(&input), 0);

        let mild = PriorityInput {
            failed_attempts: 3,
            ..input
        };
        assert_eq!(score(&mild), 85);
    }
}
