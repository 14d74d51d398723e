use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use jobagent::broker::{MemoryBroker, QueueName, QueueTask, TaskBroker};
use jobagent::payloads::{
    JobApplicationTask, ReportedStatus, TaskCredentials, TaskPayload, UserData,
};

use jobagent_worker::outcome::{publish_outcome, Disposition};
use jobagent_worker::runner::{Outcome, RunLimits, TaskRunner, WorkerError};
use jobagent_worker::session::{
    BrowserSession, FormField, PageAnalysis, PageAnalyzer, PageKind, PageObservation,
    QuestionAnswer, SessionError,
};

// ---------------------------------------------------------------------------
// Scripted fakes: a linear sequence of pages; navigation-ish actions advance
// the cursor, and the analyzer resolves each page by URL.
// ---------------------------------------------------------------------------

struct ScriptState {
    pages: Vec<(PageObservation, PageAnalysis)>,
    cursor: usize,
    filled: Vec<(String, String)>,
    uploaded: Vec<(String, String)>,
    logged_in: Option<String>,
    observe_failures_left: u32,
    classify: HashMap<String, QuestionAnswer>,
}

#[derive(Clone)]
struct Script(Arc<Mutex<ScriptState>>);

impl Script {
    fn new(pages: Vec<(PageObservation, PageAnalysis)>) -> Self {
        Self(Arc::new(Mutex::new(ScriptState {
            pages,
            cursor: 0,
            filled: Vec::new(),
            uploaded: Vec::new(),
            logged_in: None,
            observe_failures_left: 0,
            classify: HashMap::new(),
        })))
    }

    fn with_observe_failures(self, n: u32) -> Self {
        self.0.lock().unwrap().observe_failures_left = n;
        self
    }

    fn with_classified(self, question: &str, answer: QuestionAnswer) -> Self {
        self.0.lock().unwrap().classify.insert(question.to_string(), answer);
        self
    }

    fn session(&self) -> ScriptedSession {
        ScriptedSession(self.clone())
    }

    fn filled(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().filled.clone()
    }

    fn uploaded(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().uploaded.clone()
    }

    fn logged_in(&self) -> Option<String> {
        self.0.lock().unwrap().logged_in.clone()
    }
}

struct ScriptedSession(Script);

fn advance(state: &mut ScriptState) {
    if state.cursor + 1 < state.pages.len() {
        state.cursor += 1;
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn goto(&mut self, _url: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn observe(&mut self) -> Result<PageObservation, SessionError> {
        let mut state = self.0 .0.lock().unwrap();
        if state.observe_failures_left > 0 {
            state.observe_failures_left -= 1;
            return Err(SessionError::Transient("flaky network".into()));
        }
        Ok(state.pages[state.cursor].0.clone())
    }

    async fn click_apply(&mut self) -> Result<(), SessionError> {
        advance(&mut self.0 .0.lock().unwrap());
        Ok(())
    }

    async fn login(
        &mut self,
        username: &str,
        _password: &SecretString,
    ) -> Result<(), SessionError> {
        let mut state = self.0 .0.lock().unwrap();
        state.logged_in = Some(username.to_string());
        advance(&mut state);
        Ok(())
    }

    async fn fill_field(&mut self, label: &str, value: &str) -> Result<(), SessionError> {
        self.0
             .0
            .lock()
            .unwrap()
            .filled
            .push((label.to_string(), value.to_string()));
        Ok(())
    }

    async fn upload_file(&mut self, label: &str, file_url: &str) -> Result<(), SessionError> {
        self.0
             .0
            .lock()
            .unwrap()
            .uploaded
            .push((label.to_string(), file_url.to_string()));
        Ok(())
    }

    async fn submit(&mut self) -> Result<(), SessionError> {
        advance(&mut self.0 .0.lock().unwrap());
        Ok(())
    }

    async fn screenshot(&mut self) -> Result<Option<String>, SessionError> {
        let state = self.0 .0.lock().unwrap();
        Ok(Some(format!("https://shots.local/{}.png", state.cursor)))
    }

    async fn serialize_state(&mut self) -> Result<String, SessionError> {
        let state = self.0 .0.lock().unwrap();
        Ok(format!("page-state-{}", state.cursor))
    }

    async fn restore_state(&mut self, blob: &str) -> Result<(), SessionError> {
        let mut state = self.0 .0.lock().unwrap();
        if let Some(cursor) = blob.strip_prefix("page-state-").and_then(|s| s.parse().ok()) {
            state.cursor = cursor;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

#[async_trait]
impl PageAnalyzer for Script {
    async fn analyze(&self, observation: &PageObservation) -> Result<PageAnalysis, SessionError> {
        let state = self.0.lock().unwrap();
        state
            .pages
            .iter()
            .find(|(obs, _)| obs.url == observation.url)
            .map(|(_, analysis)| analysis.clone())
            .ok_or_else(|| SessionError::Fatal(format!("no analysis for {}", observation.url)))
    }

    async fn classify_question(
        &self,
        question: &str,
        _user_data: &UserData,
    ) -> Result<QuestionAnswer, SessionError> {
        let state = self.0.lock().unwrap();
        Ok(state
            .classify
            .get(question)
            .cloned()
            .unwrap_or(QuestionAnswer::NeedsHuman))
    }
}

// ---------------------------------------------------------------------------
// Page builders
// ---------------------------------------------------------------------------

fn obs(url: &str) -> PageObservation {
    PageObservation {
        url: url.to_string(),
        title: Some("Acme Careers".to_string()),
        content: String::new(),
        has_password_field: false,
    }
}

fn page(url: &str, kind: PageKind) -> (PageObservation, PageAnalysis) {
    (
        obs(url),
        PageAnalysis {
            kind,
            fields: Vec::new(),
            custom_questions: Vec::new(),
            confirmation_text: None,
        },
    )
}

fn form_page(url: &str, custom_questions: Vec<String>) -> (PageObservation, PageAnalysis) {
    (
        obs(url),
        PageAnalysis {
            kind: PageKind::ApplicationForm,
            fields: vec![
                FormField {
                    label: "First Name".into(),
                    required: true,
                    is_upload: false,
                },
                FormField {
                    label: "Email".into(),
                    required: true,
                    is_upload: false,
                },
                FormField {
                    label: "Resume".into(),
                    required: true,
                    is_upload: true,
                },
            ],
            custom_questions,
            confirmation_text: None,
        },
    )
}

fn confirmation_page(url: &str) -> (PageObservation, PageAnalysis) {
    (
        obs(url),
        PageAnalysis {
            kind: PageKind::Confirmation,
            fields: Vec::new(),
            custom_questions: Vec::new(),
            confirmation_text: Some("Application received, ref XYZ".into()),
        },
    )
}

fn task(custom_answers: Option<Vec<(&str, &str)>>) -> JobApplicationTask {
    JobApplicationTask {
        job_id: 42,
        job_url: "https://boards.example.com/jobs/42".into(),
        company: "Acme Corp".into(),
        title: "Senior Backend Engineer".into(),
        application_id: 7,
        user_data: UserData {
            name: "Ada Lovelace".into(),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            email: "ada@example.com".into(),
            phone: "+15550001111".into(),
            resume_url: Some("https://blobs.local/resumes/7.pdf".into()),
            cover_letter_url: Some("https://blobs.local/cover-letters/7.pdf".into()),
            ..Default::default()
        },
        credentials: Some(TaskCredentials {
            username: "ada@example.com".into(),
            password: "hunter2".into(),
        }),
        custom_answers: custom_answers.map(|pairs| {
            pairs
                .into_iter()
                .map(|(q, a)| (q.to_string(), a.to_string()))
                .collect()
        }),
        ai_instructions: None,
        resume_from: None,
    }
}

fn envelope(payload: &JobApplicationTask, retries: u32) -> QueueTask {
    let mut task = QueueTask::new(
        QueueName::JobApplication,
        serde_json::to_value(payload).unwrap(),
        0,
    );
    task.retries = retries;
    task
}

// ---------------------------------------------------------------------------
// Runner behavior
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_fills_the_form_and_succeeds() {
    let script = Script::new(vec![
        page("https://boards.example.com/jobs/42", PageKind::JobDescription),
        form_page("https://boards.example.com/jobs/42/apply", vec![]),
        confirmation_page("https://boards.example.com/jobs/42/done"),
    ]);
    let mut session = script.session();

    let runner = TaskRunner::new(&script, RunLimits::default());
    let outcome = runner.run(&task(None), &mut session).await;

    match outcome {
        Outcome::Success {
            confirmation_message,
            ..
        } => {
            assert_eq!(
                confirmation_message.as_deref(),
                Some("Application received, ref XYZ")
            );
        }
        other => panic!("expected success, got {other:?}"),
    }

    let filled = script.filled();
    assert!(filled.contains(&("First Name".to_string(), "Ada".to_string())));
    assert!(filled.contains(&("Email".to_string(), "ada@example.com".to_string())));
    assert_eq!(
        script.uploaded(),
        vec![(
            "Resume".to_string(),
            "https://blobs.local/resumes/7.pdf".to_string()
        )]
    );
}

#[tokio::test]
async fn login_wall_uses_task_credentials() {
    let script = Script::new(vec![
        page("https://boards.example.com/login", PageKind::Login),
        form_page("https://boards.example.com/jobs/42/apply", vec![]),
        confirmation_page("https://boards.example.com/jobs/42/done"),
    ]);
    let mut session = script.session();

    let runner = TaskRunner::new(&script, RunLimits::default());
    let outcome = runner.run(&task(None), &mut session).await;

    assert!(matches!(outcome, Outcome::Success { .. }));
    assert_eq!(script.logged_in().as_deref(), Some("ada@example.com"));
}

#[tokio::test]
async fn login_wall_without_credentials_fails_terminally() {
    let script = Script::new(vec![page(
        "https://boards.example.com/login",
        PageKind::Login,
    )]);
    let mut session = script.session();

    let mut no_creds = task(None);
    no_creds.credentials = None;

    let runner = TaskRunner::new(&script, RunLimits::default());
    let outcome = runner.run(&no_creds, &mut session).await;

    match outcome {
        Outcome::Failure(e) => {
            assert!(!e.is_transient());
            assert!(e.to_string().contains("no credentials"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn stored_custom_answer_is_used_verbatim() {
    let script = Script::new(vec![
        form_page(
            "https://boards.example.com/jobs/42/apply",
            vec!["Expected salary?".to_string()],
        ),
        confirmation_page("https://boards.example.com/jobs/42/done"),
    ]);
    let mut session = script.session();

    let runner = TaskRunner::new(&script, RunLimits::default());
    let outcome = runner
        .run(&task(Some(vec![("Expected salary?", "120k")])), &mut session)
        .await;

    assert!(matches!(outcome, Outcome::Success { .. }));
    assert!(script
        .filled()
        .contains(&("Expected salary?".to_string(), "120k".to_string())));
}

#[tokio::test]
async fn unanswerable_question_suspends_with_resume_state() {
    let script = Script::new(vec![form_page(
        "https://boards.example.com/jobs/42/apply",
        vec!["Do you require visa sponsorship?".to_string()],
    )])
    .with_classified("Do you require visa sponsorship?", QuestionAnswer::NeedsHuman);
    let mut session = script.session();

    let runner = TaskRunner::new(&script, RunLimits::default());
    let outcome = runner.run(&task(None), &mut session).await;

    match outcome {
        Outcome::NeedsApproval {
            question,
            state_blob,
            screenshot_url,
            context,
        } => {
            assert_eq!(question, "Do you require visa sponsorship?");
            assert_eq!(state_blob.as_deref(), Some("page-state-0"));
            assert!(screenshot_url.is_some());
            assert_eq!(
                context.page_url.as_deref(),
                Some("https://boards.example.com/jobs/42/apply")
            );
        }
        other => panic!("expected needs-approval, got {other:?}"),
    }
}

#[tokio::test]
async fn resume_from_restores_saved_page_state() {
    let script = Script::new(vec![
        page("https://boards.example.com/jobs/42", PageKind::JobDescription),
        form_page("https://boards.example.com/jobs/42/apply", vec![]),
        confirmation_page("https://boards.example.com/jobs/42/done"),
    ]);
    let mut session = script.session();

    let mut resumed = task(None);
    resumed.resume_from = Some("page-state-1".to_string());

    let runner = TaskRunner::new(&script, RunLimits::default());
    let outcome = runner.run(&resumed, &mut session).await;

    // Jumped straight to the form; the description page was never visited.
    assert!(matches!(outcome, Outcome::Success { .. }));
    assert!(!script.filled().is_empty());
}

#[tokio::test]
async fn transient_observe_hiccups_are_retried_in_place() {
    let script = Script::new(vec![
        form_page("https://boards.example.com/jobs/42/apply", vec![]),
        confirmation_page("https://boards.example.com/jobs/42/done"),
    ])
    .with_observe_failures(2);
    let mut session = script.session();

    let runner = TaskRunner::new(&script, RunLimits::default());
    let outcome = runner.run(&task(None), &mut session).await;

    assert!(matches!(outcome, Outcome::Success { .. }));
}

#[tokio::test]
async fn persistent_transient_errors_surface_as_transient_failure() {
    let script = Script::new(vec![form_page(
        "https://boards.example.com/jobs/42/apply",
        vec![],
    )])
    .with_observe_failures(100);
    let mut session = script.session();

    let runner = TaskRunner::new(&script, RunLimits::default());
    let outcome = runner.run(&task(None), &mut session).await;

    match outcome {
        Outcome::Failure(e) => assert!(e.is_transient()),
        other => panic!("expected failure, got {other:?}"),
    }
}

#[tokio::test]
async fn unrecognized_pages_exhaust_the_look_budget() {
    let script = Script::new(vec![page(
        "https://boards.example.com/jobs/42",
        PageKind::Unknown,
    )]);
    let mut session = script.session();

    let runner = TaskRunner::new(&script, RunLimits::default());
    let outcome = runner.run(&task(None), &mut session).await;

    match outcome {
        Outcome::Failure(e) => assert!(e.to_string().contains("not recognized")),
        other => panic!("expected failure, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Outcome publication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn success_publishes_applied_update_and_result_record() {
    let broker = MemoryBroker::new();
    let payload = task(None);
    let envelope = envelope(&payload, 0);

    let disposition = publish_outcome(
        &broker,
        &envelope,
        &payload,
        Outcome::Success {
            confirmation_message: Some("Application received, ref XYZ".into()),
            submitted_at: chrono::Utc::now(),
            screenshot_url: None,
        },
        3,
    )
    .await
    .unwrap();
    assert_eq!(disposition, Disposition::Terminal);

    let update = broker
        .consume(QueueName::UpdateJobStatus, Duration::ZERO)
        .await
        .unwrap()
        .unwrap();

    // Credentials never leave the job_application queue.
    assert!(!update.payload.to_string().contains("hunter2"));

    let decoded = match TaskPayload::decode(&update).unwrap() {
        TaskPayload::UpdateJobStatus(p) => p,
        other => panic!("wrong payload: {other:?}"),
    };
    assert_eq!(decoded.status, ReportedStatus::Applied);
    assert_eq!(decoded.application_id, 7);
    assert!(decoded.submitted_at.is_some());

    let result = broker.fetch_result(&envelope.id).await.unwrap().unwrap();
    assert_eq!(result["status"], "applied");
}

#[tokio::test]
async fn needs_approval_publishes_the_update_and_request_pair() {
    let broker = MemoryBroker::new();
    let payload = task(None);
    let envelope = envelope(&payload, 0);

    publish_outcome(
        &broker,
        &envelope,
        &payload,
        Outcome::NeedsApproval {
            question: "Expected salary?".into(),
            state_blob: Some("page-state-1".into()),
            screenshot_url: Some("https://shots.local/1.png".into()),
            context: Default::default(),
        },
        3,
    )
    .await
    .unwrap();

    let update = broker
        .consume(QueueName::UpdateJobStatus, Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    let decoded = match TaskPayload::decode(&update).unwrap() {
        TaskPayload::UpdateJobStatus(p) => p,
        other => panic!("wrong payload: {other:?}"),
    };
    assert_eq!(decoded.status, ReportedStatus::WaitingApproval);

    let approval = broker
        .consume(QueueName::ApprovalRequest, Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    assert!(!approval.payload.to_string().contains("hunter2"));
    let decoded = match TaskPayload::decode(&approval).unwrap() {
        TaskPayload::ApprovalRequest(p) => p,
        other => panic!("wrong payload: {other:?}"),
    };
    assert_eq!(decoded.question, "Expected salary?");
    assert_eq!(decoded.current_state.as_deref(), Some("page-state-1"));
}

#[tokio::test(start_paused = true)]
async fn transient_failure_requeues_with_backoff_and_bumped_retries() {
    let broker = MemoryBroker::new();
    let payload = task(None);
    let envelope = envelope(&payload, 1);

    let disposition = publish_outcome(
        &broker,
        &envelope,
        &payload,
        Outcome::Failure(WorkerError::Transient("socket reset".into())),
        3,
    )
    .await
    .unwrap();
    assert_eq!(disposition, Disposition::Requeued { delay_secs: 2 });

    let requeued = broker
        .consume(QueueName::JobApplication, Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(requeued.id, envelope.id);
    assert_eq!(requeued.retries, 2);

    // No terminal outcome was produced.
    assert!(broker
        .consume(QueueName::UpdateJobStatus, Duration::ZERO)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn exhausted_retry_budget_means_terminal_failure() {
    let broker = MemoryBroker::new();
    let payload = task(None);
    let envelope = envelope(&payload, 3);

    let disposition = publish_outcome(
        &broker,
        &envelope,
        &payload,
        Outcome::Failure(WorkerError::Transient("form submit timed out".into())),
        3,
    )
    .await
    .unwrap();
    assert_eq!(disposition, Disposition::Terminal);

    let update = broker
        .consume(QueueName::UpdateJobStatus, Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    let decoded = match TaskPayload::decode(&update).unwrap() {
        TaskPayload::UpdateJobStatus(p) => p,
        other => panic!("wrong payload: {other:?}"),
    };
    assert_eq!(decoded.status, ReportedStatus::Failed);
    assert_eq!(
        decoded.error_message.as_deref(),
        Some("form submit timed out")
    );

    // The task is gone for good.
    assert!(broker
        .consume(QueueName::JobApplication, Duration::ZERO)
        .await
        .unwrap()
        .is_none());
}
