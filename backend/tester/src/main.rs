use anyhow::{Context, Result, bail};
use clap::Parser;
use reqwest::{Client, Response};
use serde_json::{Value, json};

#[derive(Parser, Debug)]
#[command(name = "tester")]
#[command(about = "Smoke test a running server", long_about = None)]
struct Cli {
    #[arg(long, env = "BASE_URL", default_value = "http://localhost:5000")]
    base_url: String,

    /// A seeded test student
    #[arg(long, default_value = "arjun.male@sggs.ac.in")]
    email: String,

    #[arg(long, default_value_t = 8)]
    score: u8,
}

async fn report(step: &str, response: Response) -> Result<Value> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    println!("{step}: {status}");

    if !status.is_success() {
        bail!("{step} failed: {body}");
    }

    Ok(body)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let base = cli.base_url.trim_end_matches('/');
    let client = Client::builder().cookie_store(true).build()?;

    report(
        "login",
        client
            .post(format!("{base}/api/auth/login"))
            .json(&json!({ "email": cli.email }))
            .send()
            .await?,
    )
    .await?;

    let user = report(
        "user",
        client.get(format!("{base}/api/auth/user")).send().await?,
    )
    .await?;
    println!("  signed in as {}", user["email"]);

    let profiles = report(
        "random profiles",
        client
            .get(format!("{base}/api/profiles/random?limit=5"))
            .send()
            .await?,
    )
    .await?;

    let Some(target) = profiles
        .as_array()
        .and_then(|profiles| profiles.first())
        .and_then(|profile| profile["id"].as_str())
    else {
        println!("  nobody left to rate");
        return Ok(());
    };

    let rating = report(
        "rate",
        client
            .post(format!("{base}/api/ratings"))
            .json(&json!({ "targetUserId": target, "score": cli.score }))
            .send()
            .await?,
    )
    .await
    .context("rating was not accepted")?;
    println!("  rating {} stored", rating["id"]);

    Ok(())
}
