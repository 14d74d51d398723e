use std::env;

use jobagent::broker::{RedisBroker, TaskBroker};
use jobagent::external::{HttpCollaborators, RoleRanker};
use jobagent::security::CredentialCipher;
use jobagent::store::{ApplicationStore, NewRole, PgStore};
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "jobagentctl <command>\n\
             Commands:\n\
             - reset\n\
             - seed\n\
             - stats\n\
             - show <application_id>\n\
             - rank <role_id>\n\
             - store-credential <hostname> <username> <password>\n\
             \n\
             Uses DATABASE_URL (and REDIS_URL for stats).\n"
        );
        std::process::exit(2);
    }

    dotenvy::dotenv().ok();

    let url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;
    let store = PgStore::new(pool.clone());

    match args[1].as_str() {
        "reset" => reset(&pool).await?,
        "seed" => seed(&store).await?,
        "stats" => stats(&store).await?,
        "show" => {
            let id: i64 = args
                .get(2)
                .expect("usage: jobagentctl show <application_id>")
                .parse()?;
            show(&store, id).await?;
        }
        "rank" => {
            let id: i64 = args
                .get(2)
                .expect("usage: jobagentctl rank <role_id>")
                .parse()?;
            rank(&store, id).await?;
        }
        "store-credential" => {
            let hostname = args.get(2).expect("hostname required");
            let username = args.get(3).expect("username required");
            let password = args.get(4).expect("password required");
            store_credential(&store, hostname, username, password).await?;
        }
        other => {
            eprintln!("Unknown command: {other}");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn reset(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        TRUNCATE TABLE
            dead_letters,
            unmatched_inbound,
            applications,
            roles,
            companies,
            credentials,
            user_preferences,
            profiles
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(pool)
    .await?;

    println!("reset OK");
    Ok(())
}

async fn seed(store: &PgStore) -> anyhow::Result<()> {
    let profile_id = store
        .upsert_profile(
            "Staff engineer, distributed systems",
            "Ten years building event-driven backends.",
        )
        .await?;

    for (key, value) in [
        ("name", "Ada Lovelace"),
        ("first_name", "Ada"),
        ("last_name", "Lovelace"),
        ("email", "ada@example.com"),
        ("phone", "+15550001111"),
        ("experience_years", "10"),
        ("salary_expectation", "$170,000"),
        ("availability", "Two weeks notice"),
    ] {
        store.set_preference(profile_id, key, value).await?;
    }

    let (role, created) = store
        .upsert_role(NewRole {
            title: "Senior Backend Engineer".into(),
            description: "Own the order pipeline.".into(),
            posting_url: "https://boards.example.com/jobs/1".into(),
            company_name: "Acme Corp".into(),
            location: Some("Remote".into()),
            requirements: None,
            salary_range: None,
        })
        .await?;

    println!("+ profile id={profile_id}");
    println!("+ role id={} created={created}", role.id);
    Ok(())
}

async fn stats(store: &PgStore) -> anyhow::Result<()> {
    let counts = store.status_counts().await?;
    if counts.is_empty() {
        println!("applications: none");
    }
    for (status, count) in counts {
        println!("applications.{status} = {count}");
    }

    if let Ok(redis_url) = env::var("REDIS_URL") {
        let broker = RedisBroker::connect(&redis_url).await?;
        for (queue, len) in broker.queue_stats().await? {
            println!("queue.{queue} = {len}");
        }
    }

    Ok(())
}

async fn show(store: &PgStore, id: i64) -> anyhow::Result<()> {
    let Some(app) = store.get_application(id).await? else {
        eprintln!("application {id} not found");
        std::process::exit(1);
    };

    println!(
        "APPLICATION: id={} role_id={} profile_id={} status={} attempts={}",
        app.id, app.role_id, app.profile_id, app.status, app.attempts
    );
    println!("  queue_task_id = {:?}", app.queue_task_id);
    println!("  resume_url = {:?}", app.resume_url);
    println!("  cover_letter_url = {:?}", app.cover_letter_url);
    println!("  submitted_at = {:?}", app.submitted_at);
    println!("  error_message = {:?}", app.error_message);
    if let Some(context) = &app.approval_context {
        println!("  approval_context = {context}");
    }
    if !app.custom_answers.is_empty() {
        println!("  custom_answers:");
        for (question, answer) in &app.custom_answers {
            println!("    {question} => {answer}");
        }
    }

    Ok(())
}

async fn rank(store: &PgStore, role_id: i64) -> anyhow::Result<()> {
    let role = store.get_role(role_id).await?.expect("role not found");
    let profile = store
        .default_profile()
        .await?
        .expect("seed a profile first");

    let ranker_url =
        env::var("STAGEHAND_URL").unwrap_or_else(|_| "http://localhost:3100".to_string());
    let ranker = HttpCollaborators::new(ranker_url);

    let result = ranker.rank(&role.description, &profile.summary).await?;
    store
        .set_role_rank(role_id, result.score, &result.rationale)
        .await?;

    println!(
        "+ role {role_id} ranked score={:.2} rationale={}",
        result.score, result.rationale
    );
    Ok(())
}

async fn store_credential(
    store: &PgStore,
    hostname: &str,
    username: &str,
    password: &str,
) -> anyhow::Result<()> {
    let key = env::var("ENCRYPTION_KEY").expect("ENCRYPTION_KEY must be set");
    let cipher = CredentialCipher::from_base64(&key)?;

    let profile = store
        .default_profile()
        .await?
        .expect("seed a profile first");

    let ciphertext = cipher.encrypt(password)?;
    store
        .store_credential(profile.id, hostname, username, &ciphertext)
        .await?;

    println!("+ credential stored for {hostname}");
    Ok(())
}
