//! Form-filling policy: the standard field-mapping table and the custom
//! question resolution order (stored answer, then deterministic profile
//! answer, then the analyzer, then human approval).

use jobagent::payloads::{JobApplicationTask, UserData};

use crate::session::{PageAnalyzer, QuestionAnswer, SessionError};

/// Map a form-field label onto profile data per the standard table.
/// Matching is case-insensitive on label substrings.
pub fn map_standard_field(label: &str, user: &UserData) -> Option<String> {
    let label = label.to_lowercase();
    let has = |needle: &str| label.contains(needle);

    if has("first name") {
        return user.first_name.clone().or_else(|| split_name(user).map(|(f, _)| f));
    }
    if has("last name") {
        return user.last_name.clone().or_else(|| split_name(user).map(|(_, l)| l));
    }
    if has("full name") || has("name") {
        return Some(user.name.clone()).filter(|s| !s.is_empty());
    }
    if has("email") {
        return Some(user.email.clone()).filter(|s| !s.is_empty());
    }
    if has("phone") {
        return Some(user.phone.clone()).filter(|s| !s.is_empty());
    }
    if has("address") || has("street") {
        return user.address.clone();
    }
    if has("city") {
        return user.city.clone();
    }
    if has("state") || has("region") {
        return user.state.clone();
    }
    if has("zip") || has("postal") {
        return user.zip_code.clone();
    }
    if has("linkedin") {
        return user.linkedin_url.clone();
    }
    if has("github") {
        return user.github_url.clone();
    }
    if has("portfolio") || has("website") {
        return user.portfolio_url.clone().or_else(|| user.website.clone());
    }

    None
}

fn split_name(user: &UserData) -> Option<(String, String)> {
    let mut parts = user.name.split_whitespace();
    let first = parts.next()?.to_string();
    let last = parts.collect::<Vec<_>>().join(" ");
    if last.is_empty() {
        return None;
    }
    Some((first, last))
}

/// A deterministic answer derivable from profile data, with a confidence.
pub fn deterministic_answer(question: &str, user: &UserData) -> Option<(String, f64)> {
    let q = question.to_lowercase();

    if q.contains("years of experience") || q.contains("experience years") {
        return user.experience_years.clone().map(|v| (v, 0.95));
    }
    if q.contains("salary") || q.contains("compensation") {
        return user.salary_expectation.clone().map(|v| (v, 0.9));
    }
    if q.contains("when can you start") || q.contains("availability") || q.contains("start date") {
        return user.availability.clone().map(|v| (v, 0.85));
    }

    None
}

/// Resolve one custom question: stored answer first, then a deterministic
/// profile answer, then the analyzer's judgement.
pub async fn resolve_question(
    question: &str,
    task: &JobApplicationTask,
    analyzer: &dyn PageAnalyzer,
) -> Result<QuestionAnswer, SessionError> {
    if let Some(answer) = task
        .custom_answers
        .as_ref()
        .and_then(|answers| answers.get(question))
    {
        return Ok(QuestionAnswer::Answer {
            text: answer.clone(),
            confidence: 1.0,
        });
    }

    if let Some((text, confidence)) = deterministic_answer(question, &task.user_data) {
        tracing::debug!(question, confidence, "answered question from profile data");
        return Ok(QuestionAnswer::Answer { text, confidence });
    }

    analyzer.classify_question(question, &task.user_data).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserData {
        UserData {
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
            phone: "+15550001111".into(),
            address: Some("12 Analytical Way".into()),
            city: Some("London".into()),
            zip_code: Some("EC1A".into()),
            linkedin_url: Some("https://linkedin.com/in/ada".into()),
            website: Some("https://ada.dev".into()),
            experience_years: Some("12".into()),
            salary_expectation: Some("$180,000".into()),
            availability: Some("Two weeks notice".into()),
            ..Default::default()
        }
    }

    #[test]
    fn standard_table_matches_case_insensitively() {
        let u = user();

        assert_eq!(map_standard_field("First Name *", &u).as_deref(), Some("Ada"));
        assert_eq!(map_standard_field("LAST NAME", &u).as_deref(), Some("Lovelace"));
        assert_eq!(map_standard_field("Full name", &u).as_deref(), Some("Ada Lovelace"));
        assert_eq!(
            map_standard_field("Email address", &u).as_deref(),
            Some("ada@example.com")
        );
        assert_eq!(map_standard_field("Phone", &u).as_deref(), Some("+15550001111"));
        assert_eq!(
            map_standard_field("Street address", &u).as_deref(),
            Some("12 Analytical Way")
        );
        assert_eq!(map_standard_field("Zip / Postal code", &u).as_deref(), Some("EC1A"));
        assert_eq!(
            map_standard_field("LinkedIn profile", &u).as_deref(),
            Some("https://linkedin.com/in/ada")
        );
    }

    #[test]
    fn portfolio_falls_back_to_website() {
        let u = user();
        assert_eq!(
            map_standard_field("Portfolio URL", &u).as_deref(),
            Some("https://ada.dev")
        );
    }

    #[test]
    fn unmapped_labels_return_none() {
        assert_eq!(map_standard_field("Favorite color", &user()), None);
    }

    #[test]
    fn deterministic_answers_cover_experience_salary_availability() {
        let u = user();

        let (answer, confidence) =
            deterministic_answer("How many years of experience do you have?", &u).unwrap();
        assert_eq!(answer, "12");
        assert!(confidence > 0.9);

        let (answer, _) = deterministic_answer("Expected salary?", &u).unwrap();
        assert_eq!(answer, "$180,000");

        let (answer, _) = deterministic_answer("When can you start?", &u).unwrap();
        assert_eq!(answer, "Two weeks notice");

        assert!(deterministic_answer("Why do you want this job?", &u).is_none());
    }
}
