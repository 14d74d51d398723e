//! Summary report delivered over SMS on request.

use crate::store::ApplicationStatus;

use super::{DispatchError, Dispatcher};

impl Dispatcher {
    pub async fn report_text(&self) -> Result<String, DispatchError> {
        let counts = self.store.status_counts().await?;

        let total: i64 = counts.iter().map(|(_, n)| n).sum();
        let submitted = count_of(&counts, ApplicationStatus::Submitted);
        let in_flight = count_of(&counts, ApplicationStatus::Submitting)
            + count_of(&counts, ApplicationStatus::WaitingApproval);
        let needs_input = count_of(&counts, ApplicationStatus::WaitingApproval)
            + count_of(&counts, ApplicationStatus::NeedsUserInfo);
        let errored = count_of(&counts, ApplicationStatus::Error);

        let mut lines = vec![
            "📊 Daily report".to_string(),
            format!("Applications: {total}"),
            format!("Submitted: {submitted}"),
            format!("In flight: {in_flight}"),
            format!("Awaiting your input: {needs_input}"),
        ];
        if errored > 0 {
            lines.push(format!("Failed: {errored}"));
        }

        Ok(lines.join("\n"))
    }

    pub async fn pending_approval_count(&self) -> Result<usize, DispatchError> {
        let waiting = self
            .store
            .list_applications(Some(ApplicationStatus::WaitingApproval))
            .await?;
        let needs_info = self
            .store
            .list_applications(Some(ApplicationStatus::NeedsUserInfo))
            .await?;
        Ok(waiting.len() + needs_info.len())
    }
}

fn count_of(counts: &[(ApplicationStatus, i64)], status: ApplicationStatus) -> i64 {
    counts
        .iter()
        .find(|(s, _)| *s == status)
        .map(|(_, n)| *n)
        .unwrap_or(0)
}
