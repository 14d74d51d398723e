//! Postgres store adapter.
//!
//! State transitions lock the application row (`SELECT ... FOR UPDATE`) so
//! concurrent drain loops linearize per application. No lock is held across
//! an external call: every method is a single short transaction.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use crate::security::role_unique_hash;

use super::model::*;
use super::transitions::{self, AppEvent};
use super::{ApplicationStore, StoreError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AppRow {
    id: i64,
    role_id: i64,
    profile_id: i64,
    status: String,
    queue_task_id: Option<String>,
    attempts: i32,
    resume_url: Option<String>,
    cover_letter_url: Option<String>,
    custom_answers: Value,
    approval_context: Option<Value>,
    screenshot_url: Option<String>,
    error_message: Option<String>,
    notes: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AppRow {
    fn into_application(self) -> Result<Application, StoreError> {
        let status = ApplicationStatus::from_str(&self.status).map_err(StoreError::Conflict)?;
        let custom_answers: BTreeMap<String, String> =
            serde_json::from_value(self.custom_answers).unwrap_or_default();

        Ok(Application {
            id: self.id,
            role_id: self.role_id,
            profile_id: self.profile_id,
            status,
            queue_task_id: self.queue_task_id,
            attempts: self.attempts,
            resume_url: self.resume_url,
            cover_letter_url: self.cover_letter_url,
            custom_answers,
            approval_context: self.approval_context,
            screenshot_url: self.screenshot_url,
            error_message: self.error_message,
            notes: self.notes,
            submitted_at: self.submitted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: i64,
    company_id: i64,
    title: String,
    description: String,
    posting_url: String,
    unique_hash: String,
    status: String,
    rank_score: Option<f64>,
    rank_rationale: Option<String>,
    location: Option<String>,
    requirements: Option<String>,
    salary_range: Option<String>,
    created_at: DateTime<Utc>,
}

impl RoleRow {
    fn into_role(self) -> Result<Role, StoreError> {
        let status = RoleStatus::from_str(&self.status).map_err(StoreError::Conflict)?;
        Ok(Role {
            id: self.id,
            company_id: self.company_id,
            title: self.title,
            description: self.description,
            posting_url: self.posting_url,
            unique_hash: self.unique_hash,
            status,
            rank_score: self.rank_score,
            rank_rationale: self.rank_rationale,
            location: self.location,
            requirements: self.requirements,
            salary_range: self.salary_range,
            created_at: self.created_at,
        })
    }
}

const APP_COLUMNS: &str = "id, role_id, profile_id, status, queue_task_id, attempts, \
     resume_url, cover_letter_url, custom_answers, approval_context, \
     screenshot_url, error_message, notes, submitted_at, created_at, updated_at";

const ROLE_COLUMNS: &str = "id, company_id, title, description, posting_url, unique_hash, \
     status, rank_score, rank_rationale, location, requirements, salary_range, created_at";

#[async_trait]
impl ApplicationStore for PgStore {
    async fn upsert_profile(&self, headline: &str, summary: &str) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing: Option<i64> =
            sqlx::query_scalar("SELECT id FROM profiles ORDER BY id LIMIT 1 FOR UPDATE")
                .fetch_optional(&mut *tx)
                .await?;

        let id = match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE profiles SET headline = $2, summary = $3, updated_at = now() \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(headline)
                .bind(summary)
                .execute(&mut *tx)
                .await?;
                id
            }
            None => {
                sqlx::query_scalar(
                    "INSERT INTO profiles (headline, summary) VALUES ($1, $2) RETURNING id",
                )
                .bind(headline)
                .bind(summary)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        Ok(id)
    }

    async fn default_profile(&self) -> Result<Option<Profile>, StoreError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: i64,
            headline: String,
            summary: String,
            created_at: DateTime<Utc>,
            updated_at: DateTime<Utc>,
        }

        let row = sqlx::query_as::<_, Row>(
            "SELECT id, headline, summary, created_at, updated_at \
             FROM profiles ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Profile {
            id: r.id,
            headline: r.headline,
            summary: r.summary,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }))
    }

    async fn set_preference(
        &self,
        profile_id: i64,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (profile_id, key, value)
            VALUES ($1, $2, $3)
            ON CONFLICT (profile_id, key)
            DO UPDATE SET value = EXCLUDED.value, last_updated = now()
            "#,
        )
        .bind(profile_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn preference(
        &self,
        profile_id: i64,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT value FROM user_preferences WHERE profile_id = $1 AND key = $2",
        )
        .bind(profile_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }

    async fn preferences(&self, profile_id: i64) -> Result<BTreeMap<String, String>, StoreError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM user_preferences WHERE profile_id = $1")
                .bind(profile_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().collect())
    }

    async fn store_credential(
        &self,
        profile_id: i64,
        site_hostname: &str,
        username: &str,
        encrypted_password: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (profile_id, site_hostname, username, encrypted_password)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (profile_id, site_hostname)
            DO UPDATE SET username = EXCLUDED.username,
                          encrypted_password = EXCLUDED.encrypted_password
            "#,
        )
        .bind(profile_id)
        .bind(site_hostname)
        .bind(username)
        .bind(encrypted_password)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn credential_for_host(
        &self,
        profile_id: i64,
        hostname: &str,
    ) -> Result<Option<Credential>, StoreError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: i64,
            profile_id: i64,
            site_hostname: String,
            username: String,
            encrypted_password: String,
        }

        let row = sqlx::query_as::<_, Row>(
            "SELECT id, profile_id, site_hostname, username, encrypted_password \
             FROM credentials WHERE profile_id = $1 AND site_hostname = $2",
        )
        .bind(profile_id)
        .bind(hostname)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Credential {
            id: r.id,
            profile_id: r.profile_id,
            site_hostname: r.site_hostname,
            username: r.username,
            encrypted_password: r.encrypted_password,
        }))
    }

    async fn get_or_create_company(&self, name: &str) -> Result<Company, StoreError> {
        let mut tx = self.pool.begin().await?;
        let company = get_or_create_company_tx(&mut tx, name).await?;
        tx.commit().await?;
        Ok(company)
    }

    async fn upsert_role(&self, new_role: NewRole) -> Result<(Role, bool), StoreError> {
        let mut tx = self.pool.begin().await?;

        let company = get_or_create_company_tx(&mut tx, &new_role.company_name).await?;
        let hash = role_unique_hash(&company.name, &new_role.title);

        let existing = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE unique_hash = $1 FOR UPDATE"
        ))
        .bind(&hash)
        .fetch_optional(&mut *tx)
        .await?;

        let (role, created) = match existing {
            Some(row) => {
                let role = row.into_role()?;
                // A re-scrape invalidates any previous ranking.
                let next_status = if role.status == RoleStatus::Ranked {
                    RoleStatus::Sourced
                } else {
                    role.status
                };

                let updated = sqlx::query_as::<_, RoleRow>(&format!(
                    r#"
                    UPDATE roles
                    SET description = $2, posting_url = $3, location = $4,
                        requirements = $5, salary_range = $6, status = $7
                    WHERE id = $1
                    RETURNING {ROLE_COLUMNS}
                    "#
                ))
                .bind(role.id)
                .bind(&new_role.description)
                .bind(&new_role.posting_url)
                .bind(&new_role.location)
                .bind(&new_role.requirements)
                .bind(&new_role.salary_range)
                .bind(next_status.as_str())
                .fetch_one(&mut *tx)
                .await?;

                (updated.into_role()?, false)
            }
            None => {
                let inserted = sqlx::query_as::<_, RoleRow>(&format!(
                    r#"
                    INSERT INTO roles (
                        company_id, title, description, posting_url, unique_hash,
                        status, location, requirements, salary_range
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    RETURNING {ROLE_COLUMNS}
                    "#
                ))
                .bind(company.id)
                .bind(&new_role.title)
                .bind(&new_role.description)
                .bind(&new_role.posting_url)
                .bind(&hash)
                .bind(RoleStatus::Sourced.as_str())
                .bind(&new_role.location)
                .bind(&new_role.requirements)
                .bind(&new_role.salary_range)
                .fetch_one(&mut *tx)
                .await?;

                (inserted.into_role()?, true)
            }
        };

        tx.commit().await?;
        Ok((role, created))
    }

    async fn get_role(&self, role_id: i64) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query_as::<_, RoleRow>(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"
        ))
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RoleRow::into_role).transpose()
    }

    async fn set_role_status(&self, role_id: i64, status: RoleStatus) -> Result<(), StoreError> {
        let res = sqlx::query("UPDATE roles SET status = $2 WHERE id = $1")
            .bind(role_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("role"));
        }
        Ok(())
    }

    async fn set_role_rank(
        &self,
        role_id: i64,
        score: f64,
        rationale: &str,
    ) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE roles
            SET rank_score = $2,
                rank_rationale = $3,
                status = CASE WHEN status = 'sourced' THEN 'ranked' ELSE status END
            WHERE id = $1
            "#,
        )
        .bind(role_id)
        .bind(score.clamp(0.0, 1.0))
        .bind(rationale)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("role"));
        }
        Ok(())
    }

    async fn company_name(&self, company_id: i64) -> Result<String, StoreError> {
        let name: Option<String> = sqlx::query_scalar("SELECT name FROM companies WHERE id = $1")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await?;
        name.ok_or(StoreError::NotFound("company"))
    }

    async fn active_application(
        &self,
        profile_id: i64,
        role_id: i64,
    ) -> Result<Option<Application>, StoreError> {
        let row = sqlx::query_as::<_, AppRow>(&format!(
            r#"
            SELECT {APP_COLUMNS}
            FROM applications
            WHERE profile_id = $1 AND role_id = $2
              AND status IN ('draft', 'needs_user_info', 'ready_to_submit',
                             'submitting', 'waiting_approval')
            ORDER BY id
            LIMIT 1
            "#
        ))
        .bind(profile_id)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AppRow::into_application).transpose()
    }

    async fn create_application(
        &self,
        profile_id: i64,
        role_id: i64,
    ) -> Result<Application, StoreError> {
        let mut tx = self.pool.begin().await?;

        let active: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM applications
            WHERE profile_id = $1 AND role_id = $2
              AND status IN ('draft', 'needs_user_info', 'ready_to_submit',
                             'submitting', 'waiting_approval')
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(profile_id)
        .bind(role_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(id) = active {
            tx.rollback().await?;
            return Err(StoreError::Conflict(format!(
                "active application {id} already exists for profile {profile_id} role {role_id}"
            )));
        }

        let row = sqlx::query_as::<_, AppRow>(&format!(
            r#"
            INSERT INTO applications (role_id, profile_id, status)
            VALUES ($1, $2, 'draft')
            RETURNING {APP_COLUMNS}
            "#
        ))
        .bind(role_id)
        .bind(profile_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_application()
    }

    async fn get_application(&self, id: i64) -> Result<Option<Application>, StoreError> {
        let row = sqlx::query_as::<_, AppRow>(&format!(
            "SELECT {APP_COLUMNS} FROM applications WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AppRow::into_application).transpose()
    }

    async fn list_applications(
        &self,
        status: Option<ApplicationStatus>,
    ) -> Result<Vec<ApplicationListItem>, StoreError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            id: i64,
            role_title: String,
            company_name: String,
            status: String,
            created_at: DateTime<Utc>,
            submitted_at: Option<DateTime<Utc>>,
        }

        let base = r#"
            SELECT a.id, r.title AS role_title, c.name AS company_name,
                   a.status, a.created_at, a.submitted_at
            FROM applications a
            JOIN roles r ON r.id = a.role_id
            JOIN companies c ON c.id = r.company_id
        "#;

        let rows = match status {
            Some(filter) => {
                sqlx::query_as::<_, Row>(&format!(
                    "{base} WHERE a.status = $1 ORDER BY a.created_at DESC"
                ))
                .bind(filter.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Row>(&format!("{base} ORDER BY a.created_at DESC"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter()
            .map(|r| {
                let status = ApplicationStatus::from_str(&r.status).map_err(StoreError::Conflict)?;
                Ok(ApplicationListItem {
                    id: r.id,
                    role_title: r.role_title,
                    company_name: r.company_name,
                    status,
                    created_at: r.created_at,
                    submitted_at: r.submitted_at,
                })
            })
            .collect()
    }

    async fn apply_event(&self, id: i64, event: AppEvent) -> Result<Application, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, AppRow>(&format!(
            "SELECT {APP_COLUMNS} FROM applications WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound("application"))?;

        let current = row.into_application()?;
        let next = transitions::apply(current.status, &event)?;

        let (queue_task_id, submitted_at, error_message) = match &event {
            AppEvent::TaskPublished { task_id } | AppEvent::ApprovalResumed { task_id } => {
                (Some(task_id.clone()), current.submitted_at, current.error_message.clone())
            }
            AppEvent::WorkerApplied { submitted_at } => {
                (None, Some(*submitted_at), current.error_message.clone())
            }
            AppEvent::WorkerWaitingApproval => (
                current.queue_task_id.clone(),
                current.submitted_at,
                current.error_message.clone(),
            ),
            AppEvent::WorkerNeedsUserInfo => {
                (None, current.submitted_at, current.error_message.clone())
            }
            AppEvent::WorkerFailed { error_message } => {
                (None, current.submitted_at, Some(error_message.clone()))
            }
            AppEvent::DocumentsReady | AppEvent::UserAdvanced { .. } => (
                current.queue_task_id.clone(),
                current.submitted_at,
                current.error_message.clone(),
            ),
        };

        let updated = sqlx::query_as::<_, AppRow>(&format!(
            r#"
            UPDATE applications
            SET status = $2, queue_task_id = $3, submitted_at = $4,
                error_message = $5, updated_at = now()
            WHERE id = $1
            RETURNING {APP_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(next.as_str())
        .bind(&queue_task_id)
        .bind(submitted_at)
        .bind(&error_message)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        updated.into_application()
    }

    async fn set_artifacts(
        &self,
        id: i64,
        resume_url: &str,
        cover_letter_url: &str,
    ) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE applications \
             SET resume_url = $2, cover_letter_url = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(resume_url)
        .bind(cover_letter_url)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("application"));
        }
        Ok(())
    }

    async fn set_result_fields(
        &self,
        id: i64,
        notes: Option<&str>,
        screenshot_url: Option<&str>,
    ) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE applications
            SET notes = COALESCE($2, notes),
                screenshot_url = COALESCE($3, screenshot_url),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(notes)
        .bind(screenshot_url)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("application"));
        }
        Ok(())
    }

    async fn record_approval_context(&self, id: i64, context: Value) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE applications SET approval_context = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(&context)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("application"));
        }
        Ok(())
    }

    async fn merge_custom_answer(
        &self,
        id: i64,
        question: &str,
        answer: &str,
    ) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE applications
            SET custom_answers = custom_answers || jsonb_build_object($2::text, $3::text),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(question)
        .bind(answer)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound("application"));
        }
        Ok(())
    }

    async fn increment_attempts(&self, id: i64) -> Result<i32, StoreError> {
        let attempts: Option<i32> = sqlx::query_scalar(
            "UPDATE applications SET attempts = attempts + 1, updated_at = now() \
             WHERE id = $1 RETURNING attempts",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        attempts.ok_or(StoreError::NotFound("application"))
    }

    async fn stale_submitting(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Application>, StoreError> {
        let rows = sqlx::query_as::<_, AppRow>(&format!(
            r#"
            SELECT {APP_COLUMNS}
            FROM applications
            WHERE status = 'submitting' AND updated_at < $1
            ORDER BY updated_at ASC
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AppRow::into_application).collect()
    }

    async fn oldest_waiting_approval(
        &self,
        profile_id: i64,
    ) -> Result<Option<Application>, StoreError> {
        let row = sqlx::query_as::<_, AppRow>(&format!(
            r#"
            SELECT {APP_COLUMNS}
            FROM applications
            WHERE profile_id = $1 AND status = 'waiting_approval'
            ORDER BY updated_at ASC
            LIMIT 1
            "#
        ))
        .bind(profile_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AppRow::into_application).transpose()
    }

    async fn record_unmatched_inbound(
        &self,
        from_number: &str,
        body: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO unmatched_inbound (from_number, body) VALUES ($1, $2)")
            .bind(from_number)
            .bind(body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_dead_letter(
        &self,
        queue: &str,
        payload: &Value,
        reason: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO dead_letters (queue, payload, reason) VALUES ($1, $2, $3)")
            .bind(queue)
            .bind(payload)
            .bind(reason)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn status_counts(&self) -> Result<Vec<(ApplicationStatus, i64)>, StoreError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM applications GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(status, count)| {
                let status = ApplicationStatus::from_str(&status).map_err(StoreError::Conflict)?;
                Ok((status, count))
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let _: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

async fn get_or_create_company_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    name: &str,
) -> Result<Company, StoreError> {
    #[derive(sqlx::FromRow)]
    struct Row {
        id: i64,
        name: String,
        website: Option<String>,
    }

    let trimmed = name.trim();

    let existing = sqlx::query_as::<_, Row>(
        "SELECT id, name, website FROM companies WHERE lower(name) = lower($1)",
    )
    .bind(trimmed)
    .fetch_optional(&mut **tx)
    .await?;

    let row = match existing {
        Some(row) => row,
        None => {
            sqlx::query_as::<_, Row>(
                "INSERT INTO companies (name) VALUES ($1) RETURNING id, name, website",
            )
            .bind(trimmed)
            .fetch_one(&mut **tx)
            .await?
        }
    };

    Ok(Company {
        id: row.id,
        name: row.name,
        website: row.website,
    })
}
