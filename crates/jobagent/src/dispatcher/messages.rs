//! User-facing SMS copy. Human-readable summaries only: no stack traces,
//! no credentials.

pub fn applied(role_title: &str, company: &str, confirmation: Option<&str>) -> String {
    let mut msg = format!(
        "✅ Application submitted successfully!\n\nJob: {role_title}\nCompany: {company}\nStatus: Submitted"
    );
    if let Some(reference) = confirmation {
        msg.push_str(&format!("\n\n{reference}"));
    }
    msg
}

pub fn failed(role_title: &str, company: &str, error: &str) -> String {
    format!(
        "❌ Application failed to submit\n\nJob: {role_title}\nCompany: {company}\nError: {error}\n\nPlease check the job posting manually."
    )
}

pub fn approval_needed(
    role_title: &str,
    company: &str,
    question: &str,
    screenshot_url: Option<&str>,
) -> String {
    let mut msg = format!(
        "🤔 Job application needs your input\n\nJob: {role_title}\nCompany: {company}\n\nQuestion: {question}\n\nPlease reply with your answer to continue the application."
    );
    if let Some(url) = screenshot_url {
        msg.push_str(&format!("\n\nScreenshot: {url}"));
    }
    msg
}

pub fn ingested(role_title: &str, company: &str) -> String {
    format!("📥 Got it! Queued an application for {role_title} at {company}.")
}

pub fn help() -> String {
    "🤖 Job Agent Commands:\n\
     • 'status' - Check application status\n\
     • 'report' - Get daily report\n\
     • 'stop' - Pause applications\n\
     • 'start' - Resume applications\n\
     • Or answer any pending questions"
        .to_string()
}

pub fn unmatched_reply() -> String {
    format!(
        "🤷 No application is waiting for input right now.\n\n{}",
        help()
    )
}

pub fn status(pending: usize) -> String {
    format!("📊 Status: {pending} applications need your input")
}

pub fn paused() -> String {
    "⏸️ Applications paused. Send 'start' to resume.".to_string()
}

pub fn resumed() -> String {
    "▶️ Applications resumed.".to_string()
}

pub fn answer_received() -> String {
    "✅ Got your response! I'll update the application accordingly.".to_string()
}
